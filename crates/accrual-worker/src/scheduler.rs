//! 对账调度
//!
//! 固定周期触发对账。对账在调度循环内直接 await，同一时刻最多只有一次对账在运行；
//! 对账超时错过的周期直接跳过，不会补跑。对账失败的错误投递到有界队列，
//! 队列满或消费端已关闭时丢弃并记录，调度循环永远不会因此阻塞。

use std::sync::Arc;
use std::time::Duration;

use loyalty_shared::error::InfraError;
use loyalty_shared::observability::metrics;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::{AccrualError, Result};
use crate::service::ReconciliationService;

/// 对账错误的投递端
#[derive(Clone)]
pub struct ErrorSink {
    tx: mpsc::Sender<AccrualError>,
}

impl ErrorSink {
    /// 创建容量为 `capacity` 的错误队列
    pub fn channel(capacity: usize) -> Result<(Self, mpsc::Receiver<AccrualError>)> {
        if capacity == 0 {
            return Err(InfraError::invalid("worker.error_queue_capacity", "必须大于 0").into());
        }
        let (tx, rx) = mpsc::channel(capacity);
        Ok((Self { tx }, rx))
    }

    /// 投递错误，不等待；返回是否成功入队
    pub fn report(&self, err: AccrualError) -> bool {
        match self.tx.try_send(err) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(err)) => {
                warn!(kind = %err.kind(), error = %err, "错误队列已满，丢弃错误");
                metrics::record_error_dropped(err.kind().as_str());
                false
            }
            Err(mpsc::error::TrySendError::Closed(err)) => {
                warn!(kind = %err.kind(), error = %err, "错误队列已关闭，丢弃错误");
                metrics::record_error_dropped(err.kind().as_str());
                false
            }
        }
    }
}

/// 错误队列的消费端，逐条记录日志
pub struct ErrorReporter {
    rx: mpsc::Receiver<AccrualError>,
}

impl ErrorReporter {
    pub fn new(rx: mpsc::Receiver<AccrualError>) -> Self {
        Self { rx }
    }

    /// 持续消费直到所有投递端都已 drop，返回处理的错误数
    pub async fn run(mut self) -> usize {
        let mut reported = 0;
        while let Some(err) = self.rx.recv().await {
            error!(kind = %err.kind(), error = %err, "对账失败");
            reported += 1;
        }
        info!(reported, "错误上报已停止");
        reported
    }
}

/// 对账调度器
pub struct Scheduler {
    service: Arc<ReconciliationService>,
    interval: Duration,
}

impl Scheduler {
    pub fn new(service: Arc<ReconciliationService>, interval: Duration) -> Result<Self> {
        if interval.is_zero() {
            return Err(InfraError::invalid("worker.tick_interval_ms", "必须大于 0").into());
        }
        Ok(Self { service, interval })
    }

    /// 运行调度循环，直到收到关闭信号
    ///
    /// 关闭信号为 `true` 或发送端被 drop 都视为取消，总是返回 `Err(Cancelled)`。
    /// 正在进行的对账会被直接放弃，其事务随之回滚。
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>, sink: ErrorSink) -> Result<()> {
        let mut ticker =
            tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            interval_ms = self.interval.as_millis() as u64,
            "对账调度已启动"
        );

        loop {
            tokio::select! {
                // 偏向关闭信号
                biased;

                _ = shutdown_requested(&mut shutdown) => break,
                _ = ticker.tick() => {}
            }

            tokio::select! {
                biased;

                _ = shutdown_requested(&mut shutdown) => {
                    info!("对账进行中收到关闭信号，放弃本次对账");
                    break;
                }
                result = self.service.run_pass() => {
                    match result {
                        Ok(report) => debug!(pending = report.pending, applied = report.applied, "本周期对账结束"),
                        Err(e) => {
                            sink.report(e);
                        }
                    }
                }
            }
        }

        info!("对账调度已停止");
        Err(AccrualError::Cancelled)
    }
}

/// 等待关闭信号；发送端被 drop 同样视为关闭
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
