//! 对账领域模型
//!
//! 订单账本实体与外部积分计算服务的响应

pub mod accrual;
pub mod order;

pub use accrual::{RemoteAccrualResult, RemoteAccrualStatus};
pub use order::{Order, OrderStatus, OrderUpdate};
