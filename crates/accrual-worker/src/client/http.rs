//! 基于 reqwest 的积分计算服务客户端

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use loyalty_shared::config::AccrualConfig;
use loyalty_shared::error::InfraError;
use loyalty_shared::observability::metrics;
use tracing::{debug, instrument};

use super::{RateLimiter, RemoteClient};
use crate::error::{AccrualError, Result};
use crate::models::RemoteAccrualResult;

/// HTTP 客户端
///
/// 请求前先从限流器拿令牌，失败的请求同样消耗令牌。
pub struct HttpAccrualClient {
    http: reqwest::Client,
    base_url: String,
    limiter: Arc<RateLimiter>,
}

impl HttpAccrualClient {
    /// 3xx 不跟随，按非 2xx 应答处理，保证每次查询只发出一个请求
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        limiter: Arc<RateLimiter>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| InfraError::Internal(format!("无法创建 HTTP 客户端: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            limiter,
        })
    }

    /// 按配置创建，限流器由调用方持有并注入
    pub fn from_config(config: &AccrualConfig, limiter: Arc<RateLimiter>) -> Result<Self> {
        Self::new(config.base_url(), config.request_timeout(), limiter)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// 每秒请求预算
    pub fn rps(&self) -> u32 {
        self.limiter.rps()
    }

    fn order_url(&self, order_number: &str) -> String {
        format!("{}/api/orders/{}", self.base_url, order_number)
    }

    async fn request(&self, order_number: &str) -> Result<RemoteAccrualResult> {
        let response = self
            .http
            .get(self.order_url(order_number))
            .send()
            .await
            .map_err(|e| AccrualError::transport(order_number, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AccrualError::transport(
                order_number,
                format!("HTTP {}", status.as_u16()),
            ));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| AccrualError::transport(order_number, e))?;

        serde_json::from_slice(&body).map_err(|e| AccrualError::decode(order_number, e))
    }
}

#[async_trait]
impl RemoteClient for HttpAccrualClient {
    #[instrument(skip(self), fields(base_url = %self.base_url))]
    async fn fetch(&self, order_number: &str) -> Result<RemoteAccrualResult> {
        self.limiter.acquire().await;

        let result = self.request(order_number).await;
        let outcome = match &result {
            Ok(_) => "ok",
            Err(AccrualError::Decode { .. }) => "decode",
            Err(_) => "transport",
        };
        metrics::record_remote_request(outcome);

        match &result {
            Ok(r) => debug!(status = ?r.status, accrual = ?r.accrual, "积分服务应答"),
            Err(e) => debug!(error = %e, "积分服务请求失败"),
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base: &str) -> HttpAccrualClient {
        let limiter = Arc::new(RateLimiter::new(100).unwrap());
        HttpAccrualClient::new(base, Duration::from_millis(200), limiter).unwrap()
    }

    #[test]
    fn test_order_url() {
        let c = client("http://localhost:8081/");
        assert_eq!(c.base_url(), "http://localhost:8081");
        assert_eq!(
            c.order_url("4561261212345467"),
            "http://localhost:8081/api/orders/4561261212345467"
        );
        assert_eq!(c.rps(), 100);
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transport_error() {
        // 端口 9 (discard) 在测试环境中通常无人监听
        let c = client("http://127.0.0.1:9");
        let err = c.fetch("111").await.unwrap_err();
        assert!(matches!(err, AccrualError::Transport { ref order_number, .. } if order_number == "111"));
    }
}
