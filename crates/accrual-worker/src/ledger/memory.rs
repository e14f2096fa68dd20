//! 内存账本
//!
//! 用于测试和本地联调。事务开启时复制一份快照，所有读写都在快照上进行，
//! 提交时才写回共享状态，语义上等同于 REPEATABLE READ。

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{LedgerGateway, LedgerTransaction};
use crate::error::{AccrualError, Result};
use crate::models::{Order, OrderUpdate};

/// 事务统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryLedgerStats {
    pub begun: usize,
    pub committed: usize,
    pub rolled_back: usize,
    /// 已提交的订单变更数
    pub writes: usize,
}

#[derive(Default)]
struct Failures {
    begin: bool,
    list: bool,
    commit: bool,
    rollback: bool,
    apply: HashSet<String>,
}

#[derive(Default)]
struct MemoryState {
    orders: HashMap<String, Order>,
    failures: Failures,
    stats: MemoryLedgerStats,
}

/// 内存账本，Clone 共享同一份数据
#[derive(Clone, Default)]
pub struct MemoryLedger {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_orders(orders: impl IntoIterator<Item = Order>) -> Self {
        let ledger = Self::new();
        for order in orders {
            ledger.insert(order);
        }
        ledger
    }

    pub fn insert(&self, order: Order) {
        self.state.lock().orders.insert(order.number.clone(), order);
    }

    pub fn get(&self, number: &str) -> Option<Order> {
        self.state.lock().orders.get(number).cloned()
    }

    pub fn stats(&self) -> MemoryLedgerStats {
        self.state.lock().stats
    }

    // ==================== 故障注入 ====================

    pub fn fail_begin(&self, fail: bool) {
        self.state.lock().failures.begin = fail;
    }

    pub fn fail_list(&self, fail: bool) {
        self.state.lock().failures.list = fail;
    }

    pub fn fail_commit(&self, fail: bool) {
        self.state.lock().failures.commit = fail;
    }

    /// 回滚返回错误，快照仍然被丢弃
    pub fn fail_rollback(&self, fail: bool) {
        self.state.lock().failures.rollback = fail;
    }

    /// 写回指定订单时返回存储错误
    pub fn fail_apply_for(&self, number: impl Into<String>) {
        self.state.lock().failures.apply.insert(number.into());
    }

    pub fn clear_failures(&self) {
        self.state.lock().failures = Failures::default();
    }
}

#[async_trait]
impl LedgerGateway for MemoryLedger {
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>> {
        let mut state = self.state.lock();
        if state.failures.begin {
            return Err(AccrualError::TransactionBegin(
                "connection pool exhausted".to_string(),
            ));
        }
        state.stats.begun += 1;

        Ok(Box::new(MemoryLedgerTx {
            shared: Arc::clone(&self.state),
            snapshot: state.orders.clone(),
            dirty: BTreeSet::new(),
            finished: false,
        }))
    }
}

struct MemoryLedgerTx {
    shared: Arc<Mutex<MemoryState>>,
    snapshot: HashMap<String, Order>,
    dirty: BTreeSet<String>,
    finished: bool,
}

#[async_trait]
impl LedgerTransaction for MemoryLedgerTx {
    async fn list_pending(&mut self) -> Result<Vec<String>> {
        if self.shared.lock().failures.list {
            return Err(AccrualError::storage("list_pending", "relation \"orders\" is locked"));
        }

        let mut pending: Vec<&Order> = self.snapshot.values().filter(|o| o.is_pending()).collect();
        pending.sort_by(|a, b| {
            a.uploaded_at
                .cmp(&b.uploaded_at)
                .then_with(|| a.number.cmp(&b.number))
        });
        Ok(pending.into_iter().map(|o| o.number.clone()).collect())
    }

    async fn apply_result(&mut self, update: &OrderUpdate) -> Result<()> {
        if self.shared.lock().failures.apply.contains(&update.number) {
            return Err(AccrualError::storage(
                "apply_result",
                format!("write rejected for order {}", update.number),
            ));
        }

        // 与 UPDATE ... WHERE 一致：订单不存在时影响 0 行，不是错误
        let changed = self
            .snapshot
            .get_mut(&update.number)
            .is_some_and(|order| order.apply(update));
        if changed {
            self.dirty.insert(update.number.clone());
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut this = self;
        this.finished = true;
        let mut state = this.shared.lock();
        if state.failures.commit {
            state.stats.rolled_back += 1;
            return Err(AccrualError::TransactionCommit(
                "could not serialize access due to concurrent update".to_string(),
            ));
        }

        for number in &this.dirty {
            if let Some(order) = this.snapshot.get(number) {
                state.orders.insert(number.clone(), order.clone());
            }
        }
        state.stats.committed += 1;
        state.stats.writes += this.dirty.len();
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let mut this = self;
        this.finished = true;
        let mut state = this.shared.lock();
        state.stats.rolled_back += 1;
        if state.failures.rollback {
            return Err(AccrualError::storage("rollback", "connection reset by peer"));
        }
        Ok(())
    }
}

impl Drop for MemoryLedgerTx {
    fn drop(&mut self) {
        if !self.finished {
            self.shared.lock().stats.rolled_back += 1;
        }
    }
}
