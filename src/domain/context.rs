use std::time::{Duration, Instant};
use uuid::Uuid;

/// Per-submission context passed explicitly down the call chain
#[derive(Debug, Clone)]
pub struct SubmissionContext {
    pub request_id: Uuid,
    pub batch_size: usize,
    started_at: Instant,
}

impl SubmissionContext {
    pub fn new(batch_size: usize) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            batch_size,
            started_at: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }
}
