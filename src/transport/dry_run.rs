use async_trait::async_trait;
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use super::{Acknowledgement, BulkItem, DownstreamFailure, OrderTransport};
use crate::config::DryRunConfig;
use crate::domain::Order;

/// Acknowledges every order locally without contacting the execution service
#[derive(Debug)]
pub struct DryRunTransport {
    max_latency: Duration,
    single_calls: AtomicU64,
    bulk_calls: AtomicU64,
}

impl DryRunTransport {
    pub fn new(config: &DryRunConfig) -> Self {
        Self {
            max_latency: Duration::from_millis(config.max_latency_ms),
            single_calls: AtomicU64::new(0),
            bulk_calls: AtomicU64::new(0),
        }
    }

    pub fn single_calls(&self) -> u64 {
        self.single_calls.load(Ordering::Relaxed)
    }

    pub fn bulk_calls(&self) -> u64 {
        self.bulk_calls.load(Ordering::Relaxed)
    }

    async fn simulate_latency(&self) {
        let max_ms = self.max_latency.as_millis() as u64;
        if max_ms == 0 {
            return;
        }
        let ms = rand::thread_rng().gen_range(0..=max_ms);
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    fn acknowledge(order: &Order) -> Acknowledgement {
        debug!(
            "[DRY RUN] {} {} {} @ {:?}",
            order.side, order.quantity, order.symbol, order.limit_price
        );
        Acknowledgement::new(format!("dry-{}", Uuid::new_v4()), "SUBMITTED")
    }
}

#[async_trait]
impl OrderTransport for DryRunTransport {
    async fn submit(&self, order: &Order) -> Result<Acknowledgement, DownstreamFailure> {
        self.single_calls.fetch_add(1, Ordering::Relaxed);
        self.simulate_latency().await;
        Ok(Self::acknowledge(order))
    }

    async fn submit_bulk(&self, orders: &[Order]) -> Result<Vec<BulkItem>, DownstreamFailure> {
        self.bulk_calls.fetch_add(1, Ordering::Relaxed);
        self.simulate_latency().await;
        Ok(orders.iter().map(|order| Ok(Self::acknowledge(order))).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::OrderSide;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_dry_run_acknowledges_in_order() {
        let transport = DryRunTransport::new(&DryRunConfig {
            enabled: true,
            max_latency_ms: 0,
        });
        let orders = vec![
            Order::limit(1, 0, "BTC-USD", OrderSide::Buy, dec!(1), dec!(100)),
            Order::limit(2, 0, "ETH-USD", OrderSide::Sell, dec!(3), dec!(10)),
        ];

        let acks: Vec<_> = transport
            .submit_bulk(&orders)
            .await
            .unwrap()
            .into_iter()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert_eq!(acks.len(), 2);
        assert!(acks.iter().all(|a| a.status == "SUBMITTED"));
        assert_ne!(acks[0].exchange_order_id, acks[1].exchange_order_id);

        transport.submit(&orders[0]).await.unwrap();
        assert_eq!(transport.bulk_calls(), 1);
        assert_eq!(transport.single_calls(), 1);
    }
}
