//! 订单账本访问
//!
//! 一次对账对应一个事务：`begin` 借出事务，`commit` / `rollback` 归还。
//! 事务对象在未提交时被 drop 等同于回滚，对账被取消时无需额外清理。

mod memory;
mod postgres;

pub use memory::{MemoryLedger, MemoryLedgerStats};
pub use postgres::PgLedger;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::OrderUpdate;

/// 账本入口，负责开启事务
#[async_trait]
pub trait LedgerGateway: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>>;
}

/// 单次对账的事务
#[async_trait]
pub trait LedgerTransaction: Send {
    /// 所有非终态订单号，按上传时间升序
    async fn list_pending(&mut self) -> Result<Vec<String>>;

    /// 写回状态与积分；终态订单不会被修改，重复写入相同的值是无操作
    async fn apply_result(&mut self, update: &OrderUpdate) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}
