mod common;

use common::{fast_config, orders, ScriptedTransport};
use order_gate::domain::OrderStatus;
use order_gate::persistence::MemoryStore;
use order_gate::transport::{DownstreamFailure, FailureClass};
use order_gate::{AppConfig, CircuitState, GateError, OrderGate, TaskOutcome};
use std::sync::Arc;

fn unavailable() -> DownstreamFailure {
    DownstreamFailure::new(Some(503), FailureClass::Unavailable, "maintenance window")
}

/// An open circuit rejects a 50-order batch without touching the transport.
#[tokio::test]
async fn open_circuit_rejects_batch_without_downstream_calls() {
    let transport = Arc::new(ScriptedTransport::healthy());
    let store = Arc::new(MemoryStore::with_orders(1..=50));
    let gate = OrderGate::from_config(&fast_config(), transport.clone(), store.clone(), None);

    for _ in 0..5 {
        gate.breaker().record_failure("connection pool exhausted");
    }
    assert_eq!(gate.circuit_status().phase, CircuitState::Open);

    let err = gate.submit_batch(orders(50)).await.unwrap_err();
    assert!(matches!(err, GateError::CircuitOpen { .. }));
    assert!(err.retry_after_secs().is_some());

    assert_eq!(transport.bulk_calls(), 0);
    assert_eq!(transport.single_calls(), 0);
    assert_eq!(store.get(1).await.unwrap().version, 0);
}

/// 120 orders exceed the per-order fallback limit: after the bulk retries are
/// spent the batch fails without any individual calls.
#[tokio::test]
async fn large_batch_bulk_outage_skips_fallback() {
    let transport = Arc::new(ScriptedTransport::bulk_failing(unavailable()));
    let mut config = fast_config();
    config.circuit_breaker.failure_threshold = 50;
    let gate = OrderGate::from_config(
        &config,
        transport.clone(),
        Arc::new(MemoryStore::with_orders(1..=120)),
        None,
    );

    let err = gate.submit_batch(orders(120)).await.unwrap_err();
    assert!(matches!(err, GateError::Downstream { .. }));
    assert!(err.is_retryable());
    assert_eq!(transport.bulk_calls(), 3);
    assert_eq!(transport.single_calls(), 0);
}

/// Small batches fall back to per-order submission and persist the survivors.
#[tokio::test]
async fn small_batch_bulk_outage_falls_back_per_order() {
    let transport = Arc::new(ScriptedTransport::bulk_failing(unavailable()).rejecting([4]));
    let store = Arc::new(MemoryStore::with_orders(1..=8));
    let gate = OrderGate::from_config(&fast_config(), transport.clone(), store.clone(), None);

    let result = gate.submit_batch(orders(8)).await.unwrap();

    assert_eq!(transport.bulk_calls(), 3);
    assert_eq!(transport.single_calls(), 8);
    assert_eq!(result.success_count, 7);
    assert!(matches!(&result[3], TaskOutcome::Failure(reason) if reason.contains("rejected")));

    let persisted = store.get(1).await.unwrap();
    assert_eq!(persisted.status, OrderStatus::Submitted);
    assert_eq!(persisted.version, 1);
    assert_eq!(store.get(4).await.unwrap().version, 0);
}

/// With the bulk path disabled, 120 orders run through the executor in
/// chunks of 50; two rejected orders leave 118 persisted rows.
#[tokio::test]
async fn per_order_routing_reports_each_outcome_in_place() {
    let transport = Arc::new(ScriptedTransport::healthy().rejecting([17, 42]));
    let store = Arc::new(MemoryStore::with_orders(1..=120));
    let mut config = fast_config();
    config.fallback.bulk_enabled = false;
    let gate = OrderGate::from_config(&config, transport.clone(), store.clone(), None);

    let result = gate.submit_batch(orders(120)).await.unwrap();

    assert_eq!(result.len(), 120);
    assert_eq!(result.success_count, 118);
    assert_eq!(result.failure_count, 2);
    assert!(result[16].is_failure());
    assert!(result[41].is_failure());
    assert_eq!(
        result[0].success().map(|ack| ack.exchange_order_id.as_str()),
        Some("EX-1")
    );

    assert_eq!(transport.bulk_calls(), 0);
    assert_eq!(transport.single_calls(), 120);
    assert_eq!(store.get(17).await.unwrap().version, 0);
    assert_eq!(store.get(120).await.unwrap().version, 1);
    assert_eq!(gate.executor().limiter().in_flight(), 0);
}

/// Default configuration: one bulk call answers for all 120 orders and two
/// of them are rejected; each outcome lands at its input position.
#[tokio::test]
async fn bulk_rejections_keep_their_positions_with_default_config() {
    let transport = Arc::new(ScriptedTransport::healthy().rejecting([7, 31]));
    let store = Arc::new(MemoryStore::with_orders(1..=120));
    let gate = OrderGate::from_config(&AppConfig::default(), transport.clone(), store.clone(), None);

    let result = gate.submit_batch(orders(120)).await.unwrap();

    assert_eq!(result.len(), 120);
    assert_eq!(result.success_count, 118);
    assert_eq!(result.failure_count, 2);
    assert!(matches!(&result[6], TaskOutcome::Failure(reason) if reason.contains("order 7 rejected")));
    assert!(result[30].is_failure());
    assert_eq!(
        result[7].success().map(|ack| ack.exchange_order_id.as_str()),
        Some("EX-8")
    );

    assert_eq!(transport.bulk_calls(), 1);
    assert_eq!(transport.single_calls(), 0);
    assert_eq!(store.get(7).await.unwrap().version, 0);
    assert_eq!(store.get(31).await.unwrap().version, 0);
    for id in (1..=120).filter(|id| ![7, 31].contains(id)) {
        let row = store.get(id).await.unwrap();
        assert_eq!((row.status, row.version), (OrderStatus::Accepted, 1));
    }
}

/// Memory pressure above its threshold rejects with a bounded retry hint.
#[tokio::test]
async fn memory_pressure_reports_overload() {
    let transport = Arc::new(ScriptedTransport::healthy());
    let gate = OrderGate::from_config(
        &fast_config(),
        transport.clone(),
        Arc::new(MemoryStore::new()),
        None,
    );
    gate.memory_gauge().set(0.9);

    let state = gate.is_overloaded();
    assert!(state.overloaded);
    assert_eq!(state.retry_after_secs, 276);

    match gate.submit_batch(orders(3)).await {
        Err(GateError::Overloaded { retry_after_secs }) => assert_eq!(retry_after_secs, 276),
        other => panic!("expected Overloaded, got {:?}", other.map(|r| r.len())),
    }
    assert_eq!(transport.bulk_calls(), 0);
}
