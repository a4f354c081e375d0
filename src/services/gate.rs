//! Order Gate
//!
//! Entry point for bulk order submission. Every batch passes, in order:
//! structural validation, the circuit breaker, the overload detector, the
//! fallback coordinator, and finally a single transactional status write.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use crate::config::AppConfig;
use crate::coordination::{CircuitBreaker, CircuitStatus, OverloadDetector, OverloadState};
use crate::domain::{
    BatchResult, Order, OrderStatus, StatusNormalizer, StatusUpdate, SubmissionContext,
};
use crate::error::{GateError, Result};
use crate::executor::BatchExecutor;
use crate::fallback::FallbackCoordinator;
use crate::monitoring::{
    spawn_memory_sampler, PoolHealth, ProbeError, RequestTracker, ResourceMonitors,
    UtilizationGauge,
};
use crate::persistence::{BatchPersistence, StatusStore};
use crate::transport::{Acknowledgement, OrderTransport};

/// Admission-controlled bulk submission
pub struct OrderGate {
    detector: OverloadDetector,
    breaker: Arc<CircuitBreaker>,
    executor: Arc<BatchExecutor>,
    coordinator: FallbackCoordinator,
    persistence: BatchPersistence,
    normalizer: StatusNormalizer,
    requests: Arc<RequestTracker>,
    memory: Arc<UtilizationGauge>,
    memory_sample_interval: Duration,
}

impl OrderGate {
    /// Wire every component from one resolved configuration.
    ///
    /// `pool_health` feeds both the overload detector's pool probe and the
    /// breaker's recovery check; without it both read as healthy.
    pub fn from_config(
        config: &AppConfig,
        transport: Arc<dyn OrderTransport>,
        store: Arc<dyn StatusStore>,
        pool_health: Option<Arc<dyn PoolHealth>>,
    ) -> Self {
        let mut breaker = CircuitBreaker::new(config.circuit_breaker.clone());
        if let Some(health) = &pool_health {
            breaker = breaker.with_health_probe(Arc::clone(health));
        }
        let breaker = Arc::new(breaker);

        let executor = Arc::new(BatchExecutor::with_own_limiter(
            config.executor.clone(),
            Arc::clone(&breaker),
        ));
        let requests = Arc::new(RequestTracker::new(config.overload.max_concurrent_requests));
        let memory = Arc::new(UtilizationGauge::new());

        let mut monitors = ResourceMonitors::new()
            .with_thread_pool(executor.limiter())
            .with_memory(memory.clone())
            .with_requests(requests.clone());
        if let Some(health) = pool_health {
            monitors = monitors.with_db_pool(Arc::new(
                move || -> std::result::Result<f64, ProbeError> { health.utilization() },
            ));
        }

        let coordinator = FallbackCoordinator::new(
            config.fallback.clone(),
            transport,
            Arc::clone(&executor),
            Arc::clone(&breaker),
        );

        Self {
            detector: OverloadDetector::new(config.overload.clone(), monitors),
            breaker,
            executor,
            coordinator,
            persistence: BatchPersistence::new(config.persistence.clone(), store),
            normalizer: StatusNormalizer::default(),
            requests,
            memory,
            memory_sample_interval: Duration::from_millis(config.overload.memory_sample_interval_ms),
        }
    }

    /// Start sampling system memory into the overload detector.
    /// Returns `None` when sampling is disabled.
    pub fn start_memory_sampler(&self) -> Option<JoinHandle<()>> {
        if self.memory_sample_interval.is_zero() {
            return None;
        }
        Some(spawn_memory_sampler(
            Arc::clone(&self.memory),
            self.memory_sample_interval,
        ))
    }

    /// Submit a batch and persist the resulting statuses.
    ///
    /// Admission failures (`CircuitOpen`, `Overloaded`) are returned before any
    /// downstream call is made. Per-order failures are reported in the result
    /// and their rows are left untouched.
    #[instrument(skip_all, fields(orders = orders.len()))]
    pub async fn submit_batch(&self, orders: Vec<Order>) -> Result<BatchResult<Acknowledgement>> {
        if orders.is_empty() {
            return Ok(BatchResult::empty());
        }
        validate_batch(&orders)?;

        let ctx = SubmissionContext::new(orders.len());
        let _request = self.requests.enter();

        self.breaker.admit()?;

        let overload = self.detector.check();
        if overload.overloaded {
            return Err(GateError::Overloaded {
                retry_after_secs: overload.retry_after_secs,
            });
        }

        let keys: Vec<(i64, i64)> = orders.iter().map(|o| (o.id, o.version)).collect();
        let outcome = self.coordinator.submit(&ctx, orders).await?;

        let updates: Vec<StatusUpdate> = outcome
            .result
            .successes()
            .map(|(index, ack)| {
                let (order_id, version) = keys[index];
                let status = self
                    .normalizer
                    .normalize(&ack.status)
                    .unwrap_or(OrderStatus::Submitted);
                StatusUpdate::new(order_id, version, status)
                    .with_extra(serde_json::json!({ "exchange_order_id": ack.exchange_order_id }))
            })
            .collect();

        if let Err(e) = self.persistence.apply_status_updates(&updates).await {
            warn!(
                "Request {}: {} orders submitted but status write failed: {}",
                ctx.request_id,
                updates.len(),
                e
            );
            return Err(e);
        }

        info!(
            "Request {} finished as {} in {}ms: {} succeeded, {} failed",
            ctx.request_id,
            outcome.phase,
            ctx.elapsed_ms(),
            outcome.result.success_count,
            outcome.result.failure_count
        );
        Ok(outcome.result)
    }

    /// Current overload signal; reading it does not count toward admission debouncing
    pub fn is_overloaded(&self) -> OverloadState {
        self.detector.state()
    }

    pub fn circuit_status(&self) -> CircuitStatus {
        self.breaker.status()
    }

    pub fn breaker(&self) -> Arc<CircuitBreaker> {
        Arc::clone(&self.breaker)
    }

    pub fn executor(&self) -> Arc<BatchExecutor> {
        Arc::clone(&self.executor)
    }

    pub fn memory_gauge(&self) -> Arc<UtilizationGauge> {
        Arc::clone(&self.memory)
    }
}

fn validate_batch(orders: &[Order]) -> Result<()> {
    let mut ids = HashSet::with_capacity(orders.len());
    for order in orders {
        order.validate()?;
        if !ids.insert(order.id) {
            return Err(GateError::Validation(format!(
                "order {} appears more than once in the batch",
                order.id
            )));
        }
    }
    Ok(())
}
