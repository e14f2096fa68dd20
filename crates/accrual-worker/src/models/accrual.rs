//! 积分计算服务的响应
//!
//! `GET /api/orders/{number}` 返回 `{"order": "...", "status": "...", "accrual": 500}`，
//! accrual 只在 PROCESSED 时出现。

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::order::{OrderStatus, OrderUpdate};
use crate::error::{AccrualError, Result};

/// 计算服务侧的订单状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemoteAccrualStatus {
    /// 已登记，尚未开始计算
    Registered,
    Invalid,
    Processing,
    Processed,
}

impl RemoteAccrualStatus {
    /// 映射到账本状态，REGISTERED 与 PROCESSING 都视为计算中
    pub fn to_order_status(self) -> OrderStatus {
        match self {
            Self::Registered | Self::Processing => OrderStatus::Processing,
            Self::Invalid => OrderStatus::Invalid,
            Self::Processed => OrderStatus::Processed,
        }
    }
}

/// 计算服务对单个订单的应答
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteAccrualResult {
    #[serde(rename = "order")]
    pub order_number: String,
    pub status: RemoteAccrualStatus,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "rust_decimal::serde::float_option"
    )]
    pub accrual: Option<Decimal>,
}

impl RemoteAccrualResult {
    /// 转换为账本变更
    ///
    /// 以请求的订单号为准：应答中的订单号不一致或积分为负都视为无法解析的响应。
    /// 非 PROCESSED 状态下的积分没有意义，一律丢弃；PROCESSED 但缺少积分按 0 处理。
    pub fn into_update(self, requested_number: &str) -> Result<OrderUpdate> {
        if self.order_number != requested_number {
            return Err(AccrualError::decode(
                requested_number,
                format!("应答订单号不一致: {}", self.order_number),
            ));
        }

        if let Some(accrual) = self.accrual.filter(|a| *a < Decimal::ZERO) {
            return Err(AccrualError::decode(
                requested_number,
                format!("积分不能为负: {accrual}"),
            ));
        }

        let status = self.status.to_order_status();
        let accrual = match status {
            OrderStatus::Processed => Some(self.accrual.unwrap_or(Decimal::ZERO)),
            _ => None,
        };

        Ok(OrderUpdate {
            number: requested_number.to_string(),
            status,
            accrual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(body: &str) -> RemoteAccrualResult {
        serde_json::from_str(body).unwrap()
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            RemoteAccrualStatus::Registered.to_order_status(),
            OrderStatus::Processing
        );
        assert_eq!(
            RemoteAccrualStatus::Processing.to_order_status(),
            OrderStatus::Processing
        );
        assert_eq!(
            RemoteAccrualStatus::Invalid.to_order_status(),
            OrderStatus::Invalid
        );
        assert_eq!(
            RemoteAccrualStatus::Processed.to_order_status(),
            OrderStatus::Processed
        );
    }

    #[test]
    fn test_decode_processed() {
        let result = parse(r#"{"order":"4561261212345467","status":"PROCESSED","accrual":500}"#);
        assert_eq!(result.status, RemoteAccrualStatus::Processed);
        assert_eq!(result.accrual, Some(Decimal::from(500)));

        let update = result.into_update("4561261212345467").unwrap();
        assert_eq!(update.status, OrderStatus::Processed);
        assert_eq!(update.accrual, Some(Decimal::from(500)));
    }

    #[test]
    fn test_decode_fractional_accrual() {
        let result = parse(r#"{"order":"79927398713","status":"PROCESSED","accrual":729.98}"#);
        let update = result.into_update("79927398713").unwrap();
        assert_eq!(update.accrual, Some(Decimal::new(72998, 2)));
    }

    #[test]
    fn test_accrual_missing_or_irrelevant() {
        let registered = parse(r#"{"order":"111","status":"REGISTERED"}"#);
        assert_eq!(registered.accrual, None);
        let update = registered.into_update("111").unwrap();
        assert_eq!(update.status, OrderStatus::Processing);
        assert_eq!(update.accrual, None);

        // 非 PROCESSED 状态下携带的积分被丢弃
        let invalid = parse(r#"{"order":"111","status":"INVALID","accrual":10}"#);
        assert_eq!(invalid.into_update("111").unwrap().accrual, None);

        let processed = parse(r#"{"order":"111","status":"PROCESSED"}"#);
        assert_eq!(
            processed.into_update("111").unwrap().accrual,
            Some(Decimal::ZERO)
        );
    }

    #[test]
    fn test_mismatched_order_number() {
        let result = parse(r#"{"order":"222","status":"PROCESSED","accrual":1}"#);
        let err = result.into_update("111").unwrap_err();
        assert!(matches!(err, AccrualError::Decode { ref order_number, .. } if order_number == "111"));
    }

    #[test]
    fn test_negative_accrual_rejected() {
        let result = parse(r#"{"order":"111","status":"PROCESSED","accrual":-5}"#);
        assert!(matches!(
            result.into_update("111"),
            Err(AccrualError::Decode { .. })
        ));
    }

    #[test]
    fn test_unknown_status_is_decode_failure() {
        let result = serde_json::from_str::<RemoteAccrualResult>(
            r#"{"order":"111","status":"LOST","accrual":1}"#,
        );
        assert!(result.is_err());
    }
}
