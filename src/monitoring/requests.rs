use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::{ProbeError, ResourceMonitor};

/// Counts in-flight submissions against a configured capacity
#[derive(Debug)]
pub struct RequestTracker {
    active: AtomicUsize,
    capacity: usize,
}

impl RequestTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            active: AtomicUsize::new(0),
            capacity,
        }
    }

    /// Mark a request in flight until the guard drops
    pub fn enter(self: &Arc<Self>) -> RequestGuard {
        self.active.fetch_add(1, Ordering::SeqCst);
        RequestGuard {
            tracker: Arc::clone(self),
        }
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl ResourceMonitor for RequestTracker {
    fn utilization(&self) -> Result<f64, ProbeError> {
        if self.capacity == 0 {
            return Err(ProbeError::Unavailable("request capacity is zero".to_string()));
        }
        Ok(self.active() as f64 / self.capacity as f64)
    }
}

/// Decrements the tracker on drop
#[derive(Debug)]
pub struct RequestGuard {
    tracker: Arc<RequestTracker>,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.tracker.active.fetch_sub(1, Ordering::SeqCst);
    }
}
