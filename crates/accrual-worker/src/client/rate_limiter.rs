//! 出站请求限流
//!
//! 令牌按固定间隔（1s / rps）逐个补充，桶容量为 1，
//! 因此任意一秒的滑动窗口内最多发出 rps 个请求。

use std::num::NonZeroU32;

use governor::{DefaultDirectRateLimiter, Quota};
use loyalty_shared::error::InfraError;

use crate::error::Result;

/// 进程内共享的限流器，所有对账周期共用同一份令牌状态
pub struct RateLimiter {
    inner: DefaultDirectRateLimiter,
    rps: NonZeroU32,
}

impl RateLimiter {
    pub fn new(rps: u32) -> Result<Self> {
        let rps = NonZeroU32::new(rps)
            .ok_or_else(|| InfraError::invalid("accrual.rate_limit_rps", "必须大于 0"))?;
        let quota = Quota::per_second(rps).allow_burst(NonZeroU32::MIN);

        Ok(Self {
            inner: governor::RateLimiter::direct(quota),
            rps,
        })
    }

    /// 等待直到拿到一个令牌
    ///
    /// 只会挂起当前调用方，不会丢弃或排队请求；future 被 drop 时不消耗令牌。
    pub async fn acquire(&self) {
        self.inner.until_ready().await;
    }

    /// 不等待，立即尝试拿一个令牌
    pub fn try_acquire(&self) -> bool {
        self.inner.check().is_ok()
    }

    /// 每秒请求预算
    pub fn rps(&self) -> u32 {
        self.rps.get()
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter").field("rps", &self.rps).finish()
    }
}
