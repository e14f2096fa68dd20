//! PostgreSQL 账本
//!
//! orders 表由订单提交流程维护，这里只读取待对账订单并更新状态与积分。

use async_trait::async_trait;
use loyalty_shared::database::Database;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, instrument};

use super::{LedgerGateway, LedgerTransaction};
use crate::error::{AccrualError, Result};
use crate::models::OrderUpdate;

const LIST_PENDING_SQL: &str = r#"
    SELECT number
    FROM orders
    WHERE status NOT IN ('INVALID', 'PROCESSED')
    ORDER BY uploaded_at ASC
"#;

const APPLY_RESULT_SQL: &str = r#"
    UPDATE orders
    SET status = $1, accrual = $2
    WHERE number = $3
      AND status NOT IN ('INVALID', 'PROCESSED')
"#;

/// 基于连接池的账本
#[derive(Clone)]
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn from_database(db: &Database) -> Self {
        Self::new(db.pool().clone())
    }
}

#[async_trait]
impl LedgerGateway for PgLedger {
    /// 开启 REPEATABLE READ 事务，整次对账看到同一份待对账集合
    #[instrument(skip(self))]
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AccrualError::TransactionBegin(e.to_string()))?;

        // 必须是事务中的第一条语句
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
            .execute(&mut *tx)
            .await
            .map_err(|e| AccrualError::TransactionBegin(e.to_string()))?;

        Ok(Box::new(PgLedgerTx { tx }))
    }
}

/// 未提交时 drop 会由 sqlx 自动回滚
struct PgLedgerTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTransaction for PgLedgerTx {
    async fn list_pending(&mut self) -> Result<Vec<String>> {
        sqlx::query_scalar::<_, String>(LIST_PENDING_SQL)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| AccrualError::storage("list_pending", e))
    }

    async fn apply_result(&mut self, update: &OrderUpdate) -> Result<()> {
        let result = sqlx::query(APPLY_RESULT_SQL)
            .bind(update.status)
            .bind(update.accrual)
            .bind(&update.number)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| AccrualError::storage("apply_result", e))?;

        if result.rows_affected() == 0 {
            debug!(order_number = %update.number, "订单不存在或已是终态，未更新");
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| AccrualError::TransactionCommit(e.to_string()))
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| AccrualError::storage("rollback", e))
    }
}
