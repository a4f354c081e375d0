use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;

use crate::error::{GateError, Result};
use crate::monitoring::{ProbeError, ResourceMonitor};

/// Fixed pool of permits bounding concurrent downstream operations
#[derive(Debug)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    max_permits: usize,
    permit_timeout: Duration,
    in_flight: Arc<AtomicUsize>,
}

impl ConcurrencyLimiter {
    pub fn new(max_permits: usize, permit_timeout: Duration) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_permits)),
            max_permits,
            permit_timeout,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Wait up to the configured timeout for a permit
    pub async fn acquire(&self) -> Result<LimiterPermit> {
        let permit = timeout(self.permit_timeout, self.semaphore.clone().acquire_owned())
            .await
            .map_err(|_| GateError::PermitTimeout {
                waited_ms: self.permit_timeout.as_millis() as u64,
            })?
            .map_err(|_| GateError::Internal("concurrency limiter closed".to_string()))?;

        self.in_flight.fetch_add(1, Ordering::SeqCst);
        Ok(LimiterPermit {
            _permit: permit,
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    pub fn max_permits(&self) -> usize {
        self.max_permits
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Operations currently holding a permit
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

impl ResourceMonitor for ConcurrencyLimiter {
    fn utilization(&self) -> std::result::Result<f64, ProbeError> {
        if self.max_permits == 0 {
            return Err(ProbeError::Unavailable("limiter has no permits".to_string()));
        }
        let used = self.max_permits.saturating_sub(self.available());
        Ok(used as f64 / self.max_permits as f64)
    }
}

/// Held for the duration of one operation; releases its permit on drop
#[derive(Debug)]
pub struct LimiterPermit {
    _permit: OwnedSemaphorePermit,
    in_flight: Arc<AtomicUsize>,
}

impl Drop for LimiterPermit {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}
