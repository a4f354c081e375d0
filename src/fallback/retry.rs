use std::collections::BTreeSet;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::transport::DownstreamFailure;

/// Backoff schedule and trigger rules for bulk submission retries
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay_ms: u64,
    multiplier: f64,
    trigger_status_codes: BTreeSet<u16>,
}

impl RetryPolicy {
    /// Retries after the first bulk call, so a submission makes at most
    /// `1 + max_retries` bulk calls
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before retry `k` (0-based): `base * multiplier^k`
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(retry.min(i32::MAX as u32) as i32);
        let ms = (self.base_delay_ms as f64 * factor).min(u64::MAX as f64);
        Duration::from_millis(ms as u64)
    }

    /// Sum of every backoff delay in the schedule
    pub fn total_backoff(&self) -> Duration {
        (0..self.max_retries).map(|k| self.delay_for(k)).sum()
    }

    /// Caller-visible budget: one call timeout plus all backoff delays
    pub fn total_timeout_budget(&self, call_timeout: Duration) -> Duration {
        call_timeout + self.total_backoff()
    }

    /// A failure qualifies for retry and fallback when its status code is a
    /// configured trigger or its class is transport-level
    pub fn should_trigger(&self, failure: &DownstreamFailure) -> bool {
        failure
            .status
            .is_some_and(|code| self.trigger_status_codes.contains(&code))
            || failure.class.is_transient()
    }
}

impl From<RetryConfig> for RetryPolicy {
    fn from(config: RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay_ms: config.base_delay_ms,
            multiplier: config.multiplier,
            trigger_status_codes: config.trigger_status_codes,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryConfig::default().into()
    }
}
