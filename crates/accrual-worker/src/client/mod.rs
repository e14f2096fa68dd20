//! 积分计算服务客户端
//!
//! 服务层只依赖 `RemoteClient`，HTTP 实现和测试桩可以互换。

mod http;
mod rate_limiter;

pub use http::HttpAccrualClient;
pub use rate_limiter::RateLimiter;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::RemoteAccrualResult;

/// 外部积分计算服务
///
/// 每次调用恰好发出一次外部请求，不做重试。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// 查询单个订单的计算结果
    async fn fetch(&self, order_number: &str) -> Result<RemoteAccrualResult>;
}
