//! 熔断器 (Circuit Breaker) 模块
//!
//! 标准三态熔断器，用于保护对外部服务（如积分计算服务）的调用。
//! 连续失败次数达到阈值时跳闸（Open），冷却期结束后放行少量探测请求
//! （Half-Open），首个探测成功即恢复（Closed），探测失败则重新跳闸并重新计时。
//!
//! 熔断器实例由调用方显式创建并注入，`Clone` 后共享同一份状态。

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{info, warn};

/// 熔断器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// 正常放行所有请求
    Closed,
    /// 断路器跳闸，拒绝所有请求
    Open,
    /// 允许少量探测请求，成功则恢复
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// 熔断器配置
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// 连续失败多少次后跳闸（默认 5）
    pub failure_threshold: u32,
    /// 跳闸后多久进入半开状态（默认 60 秒）
    pub recovery_timeout: Duration,
    /// 半开状态允许同时在途的探测请求数（默认 1）
    pub half_open_permits: u32,
    /// 熔断器名称，用于日志和指标区分不同的服务调用
    pub name: String,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            half_open_permits: 1,
            name: "default".to_string(),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }

    pub fn with_half_open_permits(mut self, permits: u32) -> Self {
        self.half_open_permits = permits;
        self
    }
}

/// 熔断器内部状态，受 Mutex 保护
struct InnerState {
    state: CircuitState,
    /// Closed→Open 转换依据
    consecutive_failures: u32,
    /// Open→HalfOpen 计时起点
    opened_at: Option<Instant>,
    /// HalfOpen 中已放行、尚未返回结果的探测请求数
    half_open_attempts: u32,
    /// 每次进入 HalfOpen 加一，探测配额只归还给放行它的那一轮
    half_open_epoch: u64,
}

/// 放行类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Trial { epoch: u64 },
}

/// 熔断器
///
/// 线程安全，可通过 Clone 在多个调用方间共享。
/// 典型用法：
/// ```ignore
/// let cb = CircuitBreaker::new(config);
/// let resp = cb.call(|| client.fetch(&order_number)).await?;
/// ```
#[derive(Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Arc<Mutex<InnerState>>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.config.name)
            .field("state", &self.state())
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        info!(
            name = %config.name,
            failure_threshold = config.failure_threshold,
            recovery_timeout_ms = config.recovery_timeout.as_millis() as u64,
            half_open_permits = config.half_open_permits,
            "熔断器已创建"
        );

        Self {
            config,
            inner: Arc::new(Mutex::new(InnerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                half_open_attempts: 0,
                half_open_epoch: 0,
            })),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// 获取当前状态（用于监控和日志）
    ///
    /// Open 状态冷却期已过时报告为 HalfOpen，实际转换发生在下一次请求时。
    pub fn state(&self) -> CircuitState {
        let inner = self.inner.lock();
        if inner.state == CircuitState::Open && self.cooldown_elapsed(&inner) {
            return CircuitState::HalfOpen;
        }
        inner.state
    }

    /// 当前连续失败次数
    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }

    /// 判断是否允许发起请求
    ///
    /// Closed：始终允许
    /// Open：冷却期到期则转为 HalfOpen 并允许
    /// HalfOpen：在探测配额内允许
    pub fn allow_request(&self) -> bool {
        self.try_admit().is_some()
    }

    fn try_admit(&self) -> Option<Admission> {
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitState::Closed => Some(Admission::Normal),
            CircuitState::Open => {
                if self.cooldown_elapsed(&inner) {
                    self.transition_to(&mut inner, CircuitState::HalfOpen);
                    inner.half_open_attempts = 1;
                    Some(Admission::Trial {
                        epoch: inner.half_open_epoch,
                    })
                } else {
                    None
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_attempts < self.config.half_open_permits {
                    inner.half_open_attempts += 1;
                    Some(Admission::Trial {
                        epoch: inner.half_open_epoch,
                    })
                } else {
                    None
                }
            }
        }
    }

    /// 记录调用成功
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                // 一次探测成功即恢复
                self.transition_to(&mut inner, CircuitState::Closed);
            }
            CircuitState::Open => {}
        }
    }

    /// 记录调用失败
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    self.transition_to(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                inner.consecutive_failures += 1;
                self.transition_to(&mut inner, CircuitState::Open);
            }
            // 跳闸前放行的请求迟到的失败，不延长冷却期
            CircuitState::Open => {}
        }
    }

    /// 执行受熔断器保护的异步调用
    ///
    /// 熔断器拒绝时不会调用 f。探测请求在返回结果前被取消（future 被 drop）
    /// 时归还探测配额，避免半开状态被永久占满。
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let Some(admission) = self.try_admit() else {
            record_circuit_breaker_rejection(&self.config.name);
            return Err(CircuitBreakerError::Open {
                name: self.config.name.clone(),
            });
        };

        let mut guard = TrialGuard {
            breaker: self,
            epoch: match admission {
                Admission::Trial { epoch } => Some(epoch),
                Admission::Normal => None,
            },
        };
        let outcome = f().await;
        guard.epoch = None;

        match outcome {
            Ok(result) => {
                self.record_success();
                Ok(result)
            }
            Err(e) => {
                self.record_failure();
                Err(CircuitBreakerError::ServiceError(e))
            }
        }
    }

    fn release_trial(&self, epoch: u64) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen
            && inner.half_open_epoch == epoch
            && inner.half_open_attempts > 0
        {
            inner.half_open_attempts -= 1;
        }
    }

    fn cooldown_elapsed(&self, inner: &InnerState) -> bool {
        inner
            .opened_at
            .is_some_and(|opened| opened.elapsed() >= self.config.recovery_timeout)
    }

    /// 状态转换（在锁内调用）
    fn transition_to(&self, inner: &mut InnerState, new_state: CircuitState) {
        let old_state = inner.state;
        inner.state = new_state;

        match new_state {
            CircuitState::Open => {
                inner.opened_at = Some(Instant::now());
                inner.half_open_attempts = 0;
                warn!(
                    name = %self.config.name,
                    from = %old_state,
                    consecutive_failures = inner.consecutive_failures,
                    "熔断器跳闸：后续请求将被拒绝直到冷却期结束"
                );
            }
            CircuitState::HalfOpen => {
                inner.half_open_attempts = 0;
                inner.half_open_epoch += 1;
                info!(
                    name = %self.config.name,
                    permits = self.config.half_open_permits,
                    "熔断器进入半开状态：允许探测请求"
                );
            }
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
                inner.opened_at = None;
                inner.half_open_attempts = 0;
                info!(name = %self.config.name, "熔断器恢复：服务已恢复正常");
            }
        }

        record_circuit_breaker_transition(&self.config.name, old_state, new_state);
    }
}

/// 探测请求被取消时归还配额
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    /// 探测请求所属的半开轮次，调用返回后清空
    epoch: Option<u64>,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if let Some(epoch) = self.epoch {
            self.breaker.release_trial(epoch);
        }
    }
}

/// 熔断器错误
#[derive(Debug)]
pub enum CircuitBreakerError<E> {
    /// 熔断器跳闸，请求被拒绝
    Open { name: String },
    /// 底层服务调用失败
    ServiceError(E),
}

impl<E: std::fmt::Display> std::fmt::Display for CircuitBreakerError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open { name } => write!(f, "熔断器 '{}' 处于跳闸状态，请求被拒绝", name),
            Self::ServiceError(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::fmt::Display + std::fmt::Debug> std::error::Error for CircuitBreakerError<E> {}

// ─── Prometheus 指标 ─────────────────────────────────────────────────

fn record_circuit_breaker_transition(name: &str, from: CircuitState, to: CircuitState) {
    metrics::counter!(
        "circuit_breaker_transitions_total",
        "name" => name.to_string(),
        "from" => from.to_string(),
        "to" => to.to_string()
    )
    .increment(1);

    let state_value = match to {
        CircuitState::Closed => 0.0,
        CircuitState::HalfOpen => 1.0,
        CircuitState::Open => 2.0,
    };
    metrics::gauge!(
        "circuit_breaker_state",
        "name" => name.to_string()
    )
    .set(state_value);
}

fn record_circuit_breaker_rejection(name: &str) {
    metrics::counter!(
        "circuit_breaker_rejections_total",
        "name" => name.to_string()
    )
    .increment(1);
}
