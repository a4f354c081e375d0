//! Bulk Admission Circuit Breaker
//!
//! Counts operational failures against the shared backend and rejects bulk
//! work once a threshold is reached. Recovery requires both a quiet period
//! since the last failure and a healthy connection pool.

use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::CircuitBreakerConfig;
use crate::error::{GateError, Result};
use crate::monitoring::PoolHealth;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CircuitState {
    /// Normal operation - bulk work admitted
    Closed,
    /// Failure threshold reached - bulk work rejected
    Open,
}

impl CircuitState {
    fn from_u8(raw: u8) -> Self {
        if raw == OPEN {
            CircuitState::Open
        } else {
            CircuitState::Closed
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
        }
    }
}

const CLOSED: u8 = 0;
const OPEN: u8 = 1;

/// Read-only view for callers
#[derive(Debug, Clone, Serialize)]
pub struct CircuitStatus {
    pub phase: CircuitState,
    pub failure_count: u32,
    pub last_failure_at_millis: Option<i64>,
    pub total_trips: u64,
}

/// Circuit breaker guarding bulk admission
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    phase: AtomicU8,
    failure_count: AtomicU32,
    /// 0 until the first failure
    last_failure_at_ms: AtomicI64,
    total_trips: AtomicU64,
    health: Option<Arc<dyn PoolHealth>>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker without a pool health probe
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            phase: AtomicU8::new(CLOSED),
            failure_count: AtomicU32::new(0),
            last_failure_at_ms: AtomicI64::new(0),
            total_trips: AtomicU64::new(0),
            health: None,
        }
    }

    /// Create with default configuration
    pub fn with_defaults() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }

    /// Attach the pool health probe consulted on admission and recovery
    pub fn with_health_probe(mut self, health: Arc<dyn PoolHealth>) -> Self {
        self.health = Some(health);
        self
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Get current state
    pub fn state(&self) -> CircuitState {
        CircuitState::from_u8(self.phase.load(Ordering::SeqCst))
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count.load(Ordering::SeqCst)
    }

    /// Record an operational failure
    pub fn record_failure(&self, reason: &str) {
        let failures = self.failure_count.fetch_add(1, Ordering::SeqCst).saturating_add(1);
        self.last_failure_at_ms
            .store(Utc::now().timestamp_millis(), Ordering::SeqCst);

        debug!("Operational failure #{}: {}", failures, reason);

        if failures >= self.config.failure_threshold
            && self
                .phase
                .compare_exchange(CLOSED, OPEN, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            self.total_trips.fetch_add(1, Ordering::SeqCst);
            warn!(
                "Circuit breaker TRIPPED after {} failures (last: {})",
                failures, reason
            );
        }
    }

    /// Record a success; failures decay by one instead of resetting
    pub fn record_success(&self) {
        let _ = self
            .failure_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    /// Whether bulk work may proceed.
    ///
    /// While open, the pool is only probed once the recovery window since the
    /// last failure has elapsed. Concurrent callers may both probe; the probe
    /// has no side effects.
    pub fn allow_operation(&self) -> bool {
        if self.state() == CircuitState::Closed {
            return true;
        }

        if self.time_until_recovery_ms() > 0 {
            return false;
        }

        if self.pool_healthy() {
            self.close();
            true
        } else {
            debug!("Recovery window elapsed but pool still unhealthy; staying open");
            false
        }
    }

    /// Admission gate combining the breaker state with an instantaneous
    /// pool health check. An unhealthy pool while closed counts as a failure.
    pub fn admit(&self) -> Result<()> {
        if !self.allow_operation() {
            return Err(GateError::CircuitOpen {
                failure_count: self.failure_count(),
                retry_after_secs: ms_to_secs_ceil(self.time_until_recovery_ms()).max(1),
            });
        }

        if !self.pool_healthy() {
            self.record_failure("connection pool unhealthy at admission");
            return Err(GateError::Overloaded {
                retry_after_secs: ms_to_secs_ceil(self.config.recovery_timeout_ms).max(1),
            });
        }

        Ok(())
    }

    /// Pool below the critical utilization with nobody waiting.
    /// Probe errors read as healthy.
    pub fn pool_healthy(&self) -> bool {
        let Some(health) = &self.health else {
            return true;
        };

        match health.utilization() {
            Ok(utilization) if utilization >= self.config.critical_pool_utilization => {
                debug!("Pool utilization {:.2} at or above critical", utilization);
                return false;
            }
            Ok(_) => {}
            Err(e) => debug!("Pool utilization unreadable, assuming healthy: {}", e),
        }

        match health.waiting() {
            Ok(0) => true,
            Ok(waiting) => {
                debug!("{} callers waiting for a connection", waiting);
                false
            }
            Err(e) => {
                debug!("Pool wait queue unreadable, assuming healthy: {}", e);
                true
            }
        }
    }

    /// Remaining quiet period before an open circuit may probe, in ms
    pub fn time_until_recovery_ms(&self) -> u64 {
        if self.state() == CircuitState::Closed {
            return 0;
        }
        let last = self.last_failure_at_ms.load(Ordering::SeqCst);
        let elapsed = Utc::now().timestamp_millis().saturating_sub(last).max(0) as u64;
        // strictly greater than the window is required to recover
        (self.config.recovery_timeout_ms + 1).saturating_sub(elapsed)
    }

    /// Close the circuit (resume normal operation)
    fn close(&self) {
        if self
            .phase
            .compare_exchange(OPEN, CLOSED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.failure_count.store(0, Ordering::SeqCst);
            info!("Circuit breaker CLOSED - normal operation resumed");
        }
    }

    /// Force close the circuit (manual reset)
    pub fn force_close(&self) {
        self.phase.store(CLOSED, Ordering::SeqCst);
        self.failure_count.store(0, Ordering::SeqCst);
        warn!("Circuit breaker force-closed");
    }

    pub fn status(&self) -> CircuitStatus {
        let last = self.last_failure_at_ms.load(Ordering::SeqCst);
        CircuitStatus {
            phase: self.state(),
            failure_count: self.failure_count(),
            last_failure_at_millis: (last > 0).then_some(last),
            total_trips: self.total_trips.load(Ordering::SeqCst),
        }
    }
}

fn ms_to_secs_ceil(ms: u64) -> u64 {
    ms.div_ceil(1000)
}
