//! 对账错误分类
//!
//! 一次对账中出现的任何错误都会终止该次对账并整体回滚，
//! 但不会终止进程：错误被上报后，下一个周期照常执行。
//! 只有 `Cancelled`（收到关闭信号）和 `Config`（启动配置无效）会让调度循环退出。

use loyalty_shared::circuit_breaker::CircuitBreakerError;
use loyalty_shared::error::InfraError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AccrualError {
    #[error("积分服务请求失败: order={order_number}, {message}")]
    Transport {
        order_number: String,
        message: String,
    },

    #[error("积分服务响应无法解析: order={order_number}, {message}")]
    Decode {
        order_number: String,
        message: String,
    },

    #[error("熔断器 '{name}' 处于跳闸状态，请求被拒绝")]
    BreakerOpen { name: String },

    #[error("账本操作失败: {operation} - {message}")]
    Storage { operation: String, message: String },

    #[error("无法开启事务: {0}")]
    TransactionBegin(String),

    #[error("无法提交事务: {0}")]
    TransactionCommit(String),

    #[error("对账 Worker 已取消")]
    Cancelled,

    #[error(transparent)]
    Config(#[from] InfraError),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, AccrualError>;

/// 错误类别，用作日志字段和指标标签
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Transport,
    Decode,
    BreakerOpen,
    Storage,
    TransactionBegin,
    TransactionCommit,
    Cancelled,
    Config,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transport => "TRANSPORT",
            Self::Decode => "DECODE",
            Self::BreakerOpen => "BREAKER_OPEN",
            Self::Storage => "STORAGE",
            Self::TransactionBegin => "TRANSACTION_BEGIN",
            Self::TransactionCommit => "TRANSACTION_COMMIT",
            Self::Cancelled => "CANCELLED",
            Self::Config => "CONFIG",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AccrualError {
    pub fn transport(order_number: &str, message: impl std::fmt::Display) -> Self {
        Self::Transport {
            order_number: order_number.to_string(),
            message: message.to_string(),
        }
    }

    pub fn decode(order_number: &str, message: impl std::fmt::Display) -> Self {
        Self::Decode {
            order_number: order_number.to_string(),
            message: message.to_string(),
        }
    }

    pub fn storage(operation: &str, message: impl std::fmt::Display) -> Self {
        Self::Storage {
            operation: operation.to_string(),
            message: message.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport { .. } => ErrorKind::Transport,
            Self::Decode { .. } => ErrorKind::Decode,
            Self::BreakerOpen { .. } => ErrorKind::BreakerOpen,
            Self::Storage { .. } => ErrorKind::Storage,
            Self::TransactionBegin(_) => ErrorKind::TransactionBegin,
            Self::TransactionCommit(_) => ErrorKind::TransactionCommit,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    /// 是否只影响当前这一次对账（进程继续按周期运行）
    pub fn is_pass_scoped(&self) -> bool {
        !matches!(self, Self::Cancelled | Self::Config(_))
    }
}

impl From<CircuitBreakerError<AccrualError>> for AccrualError {
    fn from(err: CircuitBreakerError<AccrualError>) -> Self {
        match err {
            CircuitBreakerError::Open { name } => Self::BreakerOpen { name },
            CircuitBreakerError::ServiceError(e) => e,
        }
    }
}
