//! 单次对账流程
//!
//! 一次对账 = 一个事务：列出待对账订单，按上传时间顺序逐个经熔断器查询计算服务，
//! 把结果写回账本，全部成功后提交。任何一步出错都会立即终止并整体回滚，
//! 本次已写入的变更一并撤销，未处理的订单留到下一个周期。

use std::sync::Arc;
use std::time::Instant;

use loyalty_shared::circuit_breaker::CircuitBreaker;
use loyalty_shared::luhn;
use loyalty_shared::observability::metrics;
use tracing::{debug, error, info, instrument, warn};

use crate::client::RemoteClient;
use crate::error::Result;
use crate::ledger::{LedgerGateway, LedgerTransaction};

/// 指标中的 Worker 名称
pub const WORKER_NAME: &str = "accrual";

/// 一次成功对账的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    /// 本次看到的待对账订单数
    pub pending: usize,
    /// 写回账本的订单数
    pub applied: usize,
}

/// 对账服务
///
/// 熔断器和客户端（含限流器）在启动时创建后注入，所有周期共享同一份状态。
pub struct ReconciliationService {
    ledger: Arc<dyn LedgerGateway>,
    client: Arc<dyn RemoteClient>,
    breaker: CircuitBreaker,
}

impl ReconciliationService {
    pub fn new(
        ledger: Arc<dyn LedgerGateway>,
        client: Arc<dyn RemoteClient>,
        breaker: CircuitBreaker,
    ) -> Self {
        Self {
            ledger,
            client,
            breaker,
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// 执行一次对账
    ///
    /// future 被 drop（关闭信号）时，未提交的事务随之回滚。
    #[instrument(name = "reconciliation_pass", skip(self))]
    pub async fn run_pass(&self) -> Result<PassReport> {
        let started = Instant::now();
        let result = self.reconcile().await;
        let elapsed = started.elapsed();

        match &result {
            Ok(report) => {
                metrics::record_pass("success", elapsed.as_secs_f64());
                if report.pending > 0 {
                    info!(
                        pending = report.pending,
                        applied = report.applied,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "对账完成"
                    );
                }
            }
            Err(e) => {
                metrics::record_pass("failure", elapsed.as_secs_f64());
                warn!(
                    error = %e,
                    kind = %e.kind(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "对账失败，本次变更已回滚"
                );
            }
        }
        metrics::set_worker_last_run(WORKER_NAME);

        result
    }

    async fn reconcile(&self) -> Result<PassReport> {
        let mut tx = self.ledger.begin().await?;
        let outcome = self.process_pending(&mut *tx).await;

        match outcome {
            Ok(report) => {
                tx.commit().await?;
                Ok(report)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    error!(
                        error = %rollback_err,
                        cause = %e,
                        "事务回滚失败"
                    );
                }
                Err(e)
            }
        }
    }

    async fn process_pending(&self, tx: &mut dyn LedgerTransaction) -> Result<PassReport> {
        let pending = tx.list_pending().await?;
        metrics::set_pending_orders(pending.len());

        if pending.is_empty() {
            debug!("没有待对账的订单");
            return Ok(PassReport::default());
        }

        let mut applied = 0;
        for order_number in &pending {
            if !luhn::is_valid(order_number) {
                warn!(order_number = %order_number, "订单号未通过 Luhn 校验，仍按待对账处理");
            }

            let update = self
                .breaker
                .call(|| async {
                    self.client
                        .fetch(order_number)
                        .await?
                        .into_update(order_number)
                })
                .await?;

            tx.apply_result(&update).await?;
            metrics::record_order_applied(update.status.as_str());
            debug!(
                order_number = %order_number,
                status = %update.status,
                accrual = ?update.accrual,
                "订单已更新"
            );
            applied += 1;
        }

        Ok(PassReport {
            pending: pending.len(),
            applied,
        })
    }
}
