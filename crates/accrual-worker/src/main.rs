//! 积分对账 Worker
//!
//! 周期性地向积分计算服务查询待对账订单的结果并写回订单账本。

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use loyalty_shared::{
    circuit_breaker::{CircuitBreaker, CircuitBreakerConfig},
    config::AppConfig,
    database::Database,
    observability,
};
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};

use accrual_worker::{
    ErrorReporter, ErrorSink, HttpAccrualClient, PgLedger, RateLimiter, ReconciliationService,
    Scheduler,
};

const SERVICE_NAME: &str = "accrual-worker";

/// 关闭信号发出后等待调度器退出的最长时间
const SHUTDOWN_GRACE: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() -> Result<()> {
    // 1. .env 只用于本地开发，不存在时忽略
    let _ = dotenvy::dotenv();

    // 2. 加载并校验配置，无效配置直接退出
    let config = AppConfig::load(SERVICE_NAME)?;
    config.validate()?;

    // 3. 日志与指标
    let _guard = observability::init(&config.service_name, &config.observability).await?;

    info!("Starting accrual-worker...");
    info!(
        environment = %config.environment,
        accrual = %config.accrual.base_url(),
        rps = config.accrual.rate_limit_rps,
        tick_interval_ms = config.worker.tick_interval_ms,
        "Configuration loaded"
    );

    // 4. 数据库连接池
    let db = Database::connect(&config.database).await?;
    info!("Database connection established");

    // 5. 限流器、客户端、熔断器在进程内各只有一份，由服务持有
    let limiter = Arc::new(RateLimiter::new(config.accrual.rate_limit_rps)?);
    let client = Arc::new(HttpAccrualClient::from_config(&config.accrual, limiter)?);

    let breaker_settings = &config.circuit_breaker;
    let breaker = CircuitBreaker::new(
        CircuitBreakerConfig::new("accrual-service")
            .with_failure_threshold(breaker_settings.failure_threshold)
            .with_recovery_timeout(breaker_settings.recovery_timeout())
            .with_half_open_permits(breaker_settings.half_open_permits),
    );

    let ledger = Arc::new(PgLedger::from_database(&db));
    let service = Arc::new(ReconciliationService::new(ledger, client, breaker));
    let scheduler = Scheduler::new(service, config.worker.tick_interval())?;
    info!("Services initialized");

    // 6. 错误上报与调度循环
    let (sink, errors) = ErrorSink::channel(config.worker.error_queue_capacity)?;
    let reporter = tokio::spawn(ErrorReporter::new(errors).run());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut worker = tokio::spawn(async move { scheduler.run(shutdown_rx, sink).await });

    // 7. 等待退出信号；调度器提前退出同样结束进程
    tokio::select! {
        _ = shutdown_signal() => {}
        result = &mut worker => {
            warn!(?result, "Scheduler exited unexpectedly");
        }
    }

    // 8. 通知调度器退出，最多等待 SHUTDOWN_GRACE
    let _ = shutdown_tx.send(true);
    if !worker.is_finished() {
        match tokio::time::timeout(SHUTDOWN_GRACE, &mut worker).await {
            Ok(Ok(result)) => info!(?result, "Scheduler stopped"),
            Ok(Err(e)) => warn!(error = %e, "Scheduler task failed"),
            Err(_) => {
                warn!(
                    grace_secs = SHUTDOWN_GRACE.as_secs(),
                    "Scheduler did not stop in time, aborting"
                );
                worker.abort();
            }
        }
    }

    // 调度器退出后 sink 被 drop，上报任务消费完剩余错误后结束
    if let Ok(reported) = reporter.await {
        info!(reported, "Error reporter drained");
    }

    db.close().await;
    info!("Service shutdown complete");
    Ok(())
}

/// 优雅关闭信号处理
///
/// 监听 Ctrl+C 和 SIGTERM 信号，用于 Kubernetes 优雅关闭
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown..."),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
    }
}
