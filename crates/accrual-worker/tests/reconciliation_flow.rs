//! 对账全流程测试
//!
//! 调度器 + 对账服务 + 熔断器 + HTTP 客户端 + 内存账本，
//! 外部计算服务由本地 axum 桩服务模拟。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use accrual_worker::{
    AccrualError, ErrorKind, ErrorSink, HttpAccrualClient, MemoryLedger, Order, OrderStatus,
    RateLimiter, ReconciliationService, Scheduler,
};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use loyalty_shared::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use loyalty_shared::test_utils::luhn_order_number;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::sync::watch;
use uuid::Uuid;

// ==================== 桩服务 ====================

#[derive(Clone, Default)]
struct AccrualStub {
    /// 订单号 -> (status, accrual)
    answers: Arc<Mutex<HashMap<String, (String, Option<i64>)>>>,
    healthy: Arc<AtomicBool>,
    hits: Arc<AtomicUsize>,
}

impl AccrualStub {
    fn answer(&self, number: &str, status: &str, accrual: Option<i64>) {
        self.answers
            .lock()
            .insert(number.to_string(), (status.to_string(), accrual));
    }
}

async fn order_handler(
    State(stub): State<AccrualStub>,
    Path(number): Path<String>,
) -> impl IntoResponse {
    stub.hits.fetch_add(1, Ordering::SeqCst);
    if !stub.healthy.load(Ordering::SeqCst) {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    let answer = stub.answers.lock().get(&number).cloned();
    match answer {
        Some((status, accrual)) => Json(serde_json::json!({
            "order": number,
            "status": status,
            "accrual": accrual
        }))
        .into_response(),
        None => Json(serde_json::json!({
            "order": number,
            "status": "REGISTERED"
        }))
        .into_response(),
    }
}

async fn spawn_stub(stub: AccrualStub) -> String {
    let app = Router::new()
        .route("/api/orders/{number}", get(order_handler))
        .with_state(stub);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

// ==================== 辅助函数 ====================

struct Harness {
    ledger: MemoryLedger,
    service: Arc<ReconciliationService>,
}

fn harness(base_url: &str, breaker: CircuitBreaker, orders: Vec<Order>) -> Harness {
    let ledger = MemoryLedger::with_orders(orders);
    let limiter = Arc::new(RateLimiter::new(200).unwrap());
    let client =
        HttpAccrualClient::new(base_url, Duration::from_secs(2), limiter).unwrap();
    let service = Arc::new(ReconciliationService::new(
        Arc::new(ledger.clone()),
        Arc::new(client),
        breaker,
    ));
    Harness { ledger, service }
}

fn order(number: &str, age_secs: i64) -> Order {
    Order::new(
        number,
        Uuid::new_v4(),
        Utc::now() - chrono::Duration::seconds(age_secs),
    )
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ==================== 测试 ====================

#[tokio::test]
async fn test_scheduler_reconciles_orders_to_terminal_states() {
    let processed = luhn_order_number(456126121234546);
    let invalid = luhn_order_number(7992739871);
    let waiting = luhn_order_number(1234567890);

    let stub = AccrualStub::default();
    stub.healthy.store(true, Ordering::SeqCst);
    stub.answer(&processed, "PROCESSED", Some(500));
    stub.answer(&invalid, "INVALID", None);
    let base_url = spawn_stub(stub.clone()).await;

    let h = harness(
        &base_url,
        CircuitBreaker::new(CircuitBreakerConfig::new("accrual-flow")),
        vec![order(&processed, 30), order(&invalid, 20), order(&waiting, 10)],
    );
    let scheduler = Scheduler::new(Arc::clone(&h.service), Duration::from_millis(20)).unwrap();
    let (sink, _errors) = ErrorSink::channel(8).unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = tokio::spawn(async move { scheduler.run(shutdown_rx, sink).await });

    let ledger = h.ledger.clone();
    let (p, i, w) = (processed.clone(), invalid.clone(), waiting.clone());
    wait_until(move || {
        ledger.get(&p).is_some_and(|o| o.status == OrderStatus::Processed)
            && ledger.get(&i).is_some_and(|o| o.status == OrderStatus::Invalid)
            && ledger.get(&w).is_some_and(|o| o.status == OrderStatus::Processing)
    })
    .await;

    assert_eq!(
        h.ledger.get(&processed).unwrap().accrual,
        Some(Decimal::from(500))
    );
    assert_eq!(h.ledger.get(&invalid).unwrap().accrual, None);

    // 终态订单不再被查询：之后的周期只查询仍在计算中的订单
    let hits_before = stub.hits.load(Ordering::SeqCst);
    let ledger = h.ledger.clone();
    let committed = ledger.stats().committed;
    wait_until(move || ledger.stats().committed >= committed + 3).await;
    let extra_hits = stub.hits.load(Ordering::SeqCst) - hits_before;
    let extra_passes = h.ledger.stats().committed - committed;
    assert!(extra_hits <= extra_passes + 1, "terminal orders were re-queried");

    // 计算服务给出结论后，下一周期写入终态
    stub.answer(&waiting, "PROCESSED", Some(42));
    let ledger = h.ledger.clone();
    let w = waiting.clone();
    wait_until(move || ledger.get(&w).is_some_and(|o| o.status == OrderStatus::Processed)).await;

    shutdown_tx.send(true).unwrap();
    assert!(matches!(worker.await.unwrap(), Err(AccrualError::Cancelled)));
}

#[tokio::test]
async fn test_outage_trips_breaker_and_stops_remote_calls() {
    let stub = AccrualStub::default();
    let base_url = spawn_stub(stub.clone()).await;

    let number = luhn_order_number(1111);
    let breaker = CircuitBreaker::new(
        CircuitBreakerConfig::new("accrual-flow")
            .with_failure_threshold(2)
            .with_recovery_timeout(Duration::from_secs(60)),
    );
    let h = harness(&base_url, breaker, vec![order(&number, 1)]);
    let scheduler = Scheduler::new(Arc::clone(&h.service), Duration::from_millis(10)).unwrap();
    let (sink, mut errors) = ErrorSink::channel(16).unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = tokio::spawn(async move { scheduler.run(shutdown_rx, sink).await });

    let mut kinds = Vec::new();
    for _ in 0..4 {
        kinds.push(errors.recv().await.unwrap().kind());
    }
    assert_eq!(
        kinds,
        vec![
            ErrorKind::Transport,
            ErrorKind::Transport,
            ErrorKind::BreakerOpen,
            ErrorKind::BreakerOpen
        ]
    );
    assert_eq!(stub.hits.load(Ordering::SeqCst), 2);
    assert_eq!(h.service.breaker().state(), CircuitState::Open);
    assert_eq!(h.ledger.get(&number).unwrap().status, OrderStatus::New);

    shutdown_tx.send(true).unwrap();
    assert!(matches!(worker.await.unwrap(), Err(AccrualError::Cancelled)));
}

#[tokio::test]
async fn test_breaker_recovers_after_cooldown() {
    let stub = AccrualStub::default();
    let base_url = spawn_stub(stub.clone()).await;

    let number = luhn_order_number(2222);
    stub.answer(&number, "PROCESSED", Some(7));
    let breaker = CircuitBreaker::new(
        CircuitBreakerConfig::new("accrual-flow")
            .with_failure_threshold(1)
            .with_recovery_timeout(Duration::from_millis(100)),
    );
    let h = harness(&base_url, breaker, vec![order(&number, 1)]);

    let err = h.service.run_pass().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    let err = h.service.run_pass().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BreakerOpen);

    stub.healthy.store(true, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(150)).await;

    let report = h.service.run_pass().await.unwrap();
    assert_eq!(report.applied, 1);
    assert_eq!(h.service.breaker().state(), CircuitState::Closed);
    assert_eq!(h.service.breaker().consecutive_failures(), 0);
    assert_eq!(h.ledger.get(&number).unwrap().status, OrderStatus::Processed);
}

#[tokio::test]
async fn test_one_bad_order_blocks_the_whole_pass() {
    let stub = AccrualStub::default();
    stub.healthy.store(true, Ordering::SeqCst);
    let base_url = spawn_stub(stub.clone()).await;

    stub.answer("111", "PROCESSED", Some(100));
    // 未知状态值，应答无法解析
    stub.answer("222", "LOST", None);

    let h = harness(
        &base_url,
        CircuitBreaker::new(CircuitBreakerConfig::new("accrual-flow")),
        vec![order("111", 20), order("222", 10)],
    );

    let err = h.service.run_pass().await.unwrap_err();
    assert!(matches!(err, AccrualError::Decode { ref order_number, .. } if order_number == "222"));
    assert_eq!(h.ledger.get("111").unwrap().status, OrderStatus::New);
    assert_eq!(h.ledger.get("222").unwrap().status, OrderStatus::New);
    assert_eq!(h.ledger.stats().writes, 0);
}
