//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。
//! 未安装 recorder 时（如单元测试）记录函数均为空操作。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Metrics 资源守卫
pub struct MetricsHandle {
    server_handle: tokio::task::JoinHandle<()>,
}

impl Drop for MetricsHandle {
    fn drop(&mut self) {
        self.server_handle.abort();
    }
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 与 `/health` 端点。
pub async fn init(service_name: &str, port: u16) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    register_common_metrics(service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle { server_handle })
}

/// 注册指标描述，出现在 /metrics 端点的 HELP 注释中
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!("accrual_passes_total", "Total number of reconciliation passes");
    metrics::describe_histogram!(
        "accrual_pass_duration_seconds",
        "Reconciliation pass duration in seconds"
    );
    metrics::describe_gauge!(
        "accrual_pending_orders",
        "Number of pending orders seen by the last pass"
    );
    metrics::describe_counter!(
        "accrual_orders_applied_total",
        "Order updates written to the ledger"
    );
    metrics::describe_counter!(
        "accrual_remote_requests_total",
        "Requests issued to the accrual service"
    );
    metrics::describe_counter!(
        "accrual_error_sink_dropped_total",
        "Pass errors dropped because the error queue was full"
    );
    metrics::describe_gauge!(
        "accrual_worker_last_run_timestamp",
        "Unix timestamp of the last finished pass"
    );
    metrics::describe_counter!(
        "circuit_breaker_transitions_total",
        "Circuit breaker state transitions"
    );
    metrics::describe_counter!(
        "circuit_breaker_rejections_total",
        "Calls rejected by an open circuit breaker"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(server_handle)
}

// ============================================================================
// 对账 Worker 指标
// ============================================================================

/// 记录一次对账的结果与耗时
#[inline]
pub fn record_pass(outcome: &str, duration_secs: f64) {
    metrics::counter!(
        "accrual_passes_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);

    metrics::histogram!("accrual_pass_duration_seconds").record(duration_secs);
}

/// 更新待对账订单数
#[inline]
pub fn set_pending_orders(count: usize) {
    metrics::gauge!("accrual_pending_orders").set(count as f64);
}

/// 记录写回账本的订单
#[inline]
pub fn record_order_applied(status: &str) {
    metrics::counter!(
        "accrual_orders_applied_total",
        "status" => status.to_string()
    )
    .increment(1);
}

/// 记录一次外部请求，outcome 取值 ok / transport / decode
#[inline]
pub fn record_remote_request(outcome: &str) {
    metrics::counter!(
        "accrual_remote_requests_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// 记录因错误队列已满而被丢弃的错误
#[inline]
pub fn record_error_dropped(kind: &str) {
    metrics::counter!(
        "accrual_error_sink_dropped_total",
        "kind" => kind.to_string()
    )
    .increment(1);
}

/// 记录 Worker 最近一次运行时间，供告警判断 Worker 是否存活
#[inline]
pub fn set_worker_last_run(worker: &str) {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default();
    metrics::gauge!(
        "accrual_worker_last_run_timestamp",
        "worker" => worker.to_string()
    )
    .set(now);
}
