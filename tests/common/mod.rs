#![allow(dead_code)]

use async_trait::async_trait;
use order_gate::config::AppConfig;
use order_gate::domain::{Order, OrderSide};
use order_gate::transport::{Acknowledgement, BulkItem, DownstreamFailure, OrderTransport};
use rust_decimal_macros::dec;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Transport whose behavior is fixed up front and whose calls are counted
#[derive(Default)]
pub struct ScriptedTransport {
    pub bulk_failure: Option<DownstreamFailure>,
    pub failing_ids: HashSet<i64>,
    pub bulk_calls: AtomicUsize,
    pub single_calls: AtomicUsize,
}

impl ScriptedTransport {
    pub fn healthy() -> Self {
        Self::default()
    }

    pub fn bulk_failing(failure: DownstreamFailure) -> Self {
        Self {
            bulk_failure: Some(failure),
            ..Default::default()
        }
    }

    pub fn rejecting(mut self, ids: impl IntoIterator<Item = i64>) -> Self {
        self.failing_ids.extend(ids);
        self
    }

    pub fn bulk_calls(&self) -> usize {
        self.bulk_calls.load(Ordering::SeqCst)
    }

    pub fn single_calls(&self) -> usize {
        self.single_calls.load(Ordering::SeqCst)
    }
}

impl ScriptedTransport {
    fn answer(&self, order: &Order, status: &str) -> Result<Acknowledgement, DownstreamFailure> {
        if self.failing_ids.contains(&order.id) {
            return Err(DownstreamFailure::new(
                Some(422),
                order_gate::FailureClass::Other,
                format!("order {} rejected", order.id),
            ));
        }
        Ok(Acknowledgement::new(format!("EX-{}", order.id), status))
    }
}

#[async_trait]
impl OrderTransport for ScriptedTransport {
    async fn submit(&self, order: &Order) -> Result<Acknowledgement, DownstreamFailure> {
        self.single_calls.fetch_add(1, Ordering::SeqCst);
        self.answer(order, "SUBMITTED")
    }

    async fn submit_bulk(&self, orders: &[Order]) -> Result<Vec<BulkItem>, DownstreamFailure> {
        self.bulk_calls.fetch_add(1, Ordering::SeqCst);
        match &self.bulk_failure {
            Some(failure) => Err(failure.clone()),
            None => Ok(orders.iter().map(|o| self.answer(o, "ACCEPTED")).collect()),
        }
    }
}

pub fn orders(count: i64) -> Vec<Order> {
    (1..=count)
        .map(|id| Order::limit(id, 0, "BTC-USD", OrderSide::Buy, dec!(0.5), dec!(64000)))
        .collect()
}

/// Defaults with sleeps shortened so tests stay fast
pub fn fast_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.overload.memory_sample_interval_ms = 0;
    config.executor.chunk_pause_ms = 1;
    config.fallback.retry.base_delay_ms = 1;
    config
}
