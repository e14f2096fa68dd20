//! 订单实体
//!
//! 订单由提交流程创建（状态 NEW），此后只有对账 Worker 会修改其状态和积分，
//! 直到进入终态。

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 订单状态
///
/// 只允许 NEW → PROCESSING → {INVALID, PROCESSED}，终态不再被对账访问
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// 已上传，尚未被计算服务受理
    #[default]
    New,
    /// 计算中
    Processing,
    /// 计算服务拒绝，不会产生积分
    Invalid,
    /// 计算完成，积分已确定
    Processed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Processing => "PROCESSING",
            Self::Invalid => "INVALID",
            Self::Processed => "PROCESSED",
        }
    }

    /// 终态订单不再进入待对账集合
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Invalid | Self::Processed)
    }

    /// 状态只能前进，同状态写入视为幂等
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        match self {
            Self::New => true,
            Self::Processing => next != Self::New,
            Self::Invalid | Self::Processed => *self == next,
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 订单
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    /// 订单号（Luhn 合法的数字串，全局唯一）
    pub number: String,
    #[sqlx(rename = "user_id")]
    pub owner_id: Uuid,
    pub status: OrderStatus,
    /// 仅在 PROCESSED 后有意义
    #[sqlx(default)]
    pub accrual: Option<Decimal>,
    pub uploaded_at: DateTime<Utc>,
}

impl Order {
    /// 新上传的订单
    pub fn new(number: impl Into<String>, owner_id: Uuid, uploaded_at: DateTime<Utc>) -> Self {
        Self {
            number: number.into(),
            owner_id,
            status: OrderStatus::New,
            accrual: None,
            uploaded_at,
        }
    }

    pub fn is_pending(&self) -> bool {
        !self.status.is_terminal()
    }

    /// 应用对账结果，返回是否发生了变化
    ///
    /// 终态订单或不合法的状态回退会被忽略
    pub fn apply(&mut self, update: &OrderUpdate) -> bool {
        if self.status.is_terminal() || !self.status.can_transition_to(update.status) {
            return false;
        }
        let changed = self.status != update.status || self.accrual != update.accrual;
        self.status = update.status;
        self.accrual = update.accrual;
        changed
    }
}

/// 写回账本的订单变更
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderUpdate {
    pub number: String,
    pub status: OrderStatus,
    pub accrual: Option<Decimal>,
}
