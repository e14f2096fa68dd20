//! 积分对账 Worker
//!
//! 后台定时扫描尚未得到最终结论的订单，向外部积分计算服务（accrual）查询
//! 每个订单的计算结果，并在同一个事务中写回订单账本。
//!
//! ## 模块结构
//!
//! - `models`: 订单与外部计算结果模型
//! - `error`: 错误分类
//! - `client`: 限流的外部服务 HTTP 客户端
//! - `ledger`: 订单账本访问（PostgreSQL / 内存实现）
//! - `service`: 单次对账流程
//! - `scheduler`: 固定间隔调度与错误上报

pub mod client;
pub mod error;
pub mod ledger;
pub mod models;
pub mod scheduler;
pub mod service;

pub use client::{HttpAccrualClient, RateLimiter, RemoteClient};
pub use error::{AccrualError, ErrorKind, Result};
pub use ledger::{LedgerGateway, LedgerTransaction, MemoryLedger, PgLedger};
pub use models::{Order, OrderStatus, OrderUpdate, RemoteAccrualResult, RemoteAccrualStatus};
pub use scheduler::{ErrorReporter, ErrorSink, Scheduler};
pub use service::{PassReport, ReconciliationService};
