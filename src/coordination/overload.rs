//! Overload Detection
//!
//! OR-combines independent utilization thresholds into a single overload
//! signal and scales the suggested retry delay with the observed pressure.
//! Unreadable probes never contribute a breach.

use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, warn};

use crate::config::OverloadConfig;
use crate::monitoring::{ResourceKind, ResourceMonitors, ResourceUtilizationSnapshot};

/// Result of one overload evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OverloadState {
    pub overloaded: bool,
    /// Within `[base, max]` when overloaded, otherwise 0
    pub retry_after_secs: u64,
}

impl OverloadState {
    pub fn healthy() -> Self {
        Self {
            overloaded: false,
            retry_after_secs: 0,
        }
    }
}

/// Combines resource probes into an overload decision
pub struct OverloadDetector {
    config: OverloadConfig,
    monitors: ResourceMonitors,
    breach_streak: AtomicU32,
}

impl OverloadDetector {
    pub fn new(config: OverloadConfig, monitors: ResourceMonitors) -> Self {
        Self {
            config,
            monitors,
            breach_streak: AtomicU32::new(0),
        }
    }

    pub fn config(&self) -> &OverloadConfig {
        &self.config
    }

    fn threshold(&self, kind: ResourceKind) -> f64 {
        match kind {
            ResourceKind::ThreadPool => self.config.thread_pool_threshold,
            ResourceKind::DbPool => self.config.db_pool_threshold,
            ResourceKind::Memory => self.config.memory_threshold,
            ResourceKind::RequestRatio => self.config.request_ratio_threshold,
        }
    }

    /// Current readings of every probe
    pub fn snapshot(&self) -> ResourceUtilizationSnapshot {
        self.monitors.snapshot()
    }

    /// Resources whose reading is strictly above their threshold
    pub fn breaches(&self, snapshot: &ResourceUtilizationSnapshot) -> Vec<(ResourceKind, f64)> {
        ResourceKind::ALL
            .iter()
            .filter_map(|kind| {
                snapshot
                    .get(*kind)
                    .filter(|value| *value > self.threshold(*kind))
                    .map(|value| (*kind, value))
            })
            .collect()
    }

    /// Admission-time evaluation: records the reading in the breach streak.
    ///
    /// With `consecutive_detections > 1` overload is only declared after that
    /// many breaching evaluations in a row; a clean read resets the streak.
    pub fn check(&self) -> OverloadState {
        let snapshot = self.snapshot();
        let breaches = self.breaches(&snapshot);

        if breaches.is_empty() {
            self.breach_streak.store(0, Ordering::Relaxed);
            return OverloadState::healthy();
        }

        let streak = self
            .breach_streak
            .fetch_add(1, Ordering::Relaxed)
            .saturating_add(1);
        let required = self.config.consecutive_detections.max(1);
        if streak < required {
            debug!(
                "Resource breach {}/{} before overload: {:?}",
                streak, required, breaches
            );
            return OverloadState::healthy();
        }

        let retry_after_secs = self.retry_delay_for(snapshot.max_utilization());
        warn!(
            "Overload detected ({}), suggesting retry after {}s",
            breaches
                .iter()
                .map(|(kind, value)| format!("{}={:.2}", kind, value))
                .collect::<Vec<_>>()
                .join(", "),
            retry_after_secs
        );
        OverloadState {
            overloaded: true,
            retry_after_secs,
        }
    }

    /// What `check` would answer right now, without touching the breach streak
    pub fn state(&self) -> OverloadState {
        let snapshot = self.snapshot();
        if self.breaches(&snapshot).is_empty() {
            return OverloadState::healthy();
        }

        let streak = self.breach_streak.load(Ordering::Relaxed).saturating_add(1);
        if streak < self.config.consecutive_detections.max(1) {
            return OverloadState::healthy();
        }
        OverloadState {
            overloaded: true,
            retry_after_secs: self.retry_delay_for(snapshot.max_utilization()),
        }
    }

    pub fn is_overloaded(&self) -> bool {
        self.state().overloaded
    }

    /// `base + (max - base) * peak utilization`, clamped to `[base, max]`
    pub fn retry_delay_seconds(&self) -> u64 {
        self.retry_delay_for(self.snapshot().max_utilization())
    }

    fn retry_delay_for(&self, peak: f64) -> u64 {
        let base = self.config.base_retry_delay_secs;
        let max = self.config.max_retry_delay_secs.max(base);
        let span = (max - base) as f64;
        let delay = base as f64 + span * peak.clamp(0.0, 1.0);
        (delay.round() as u64).clamp(base, max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::{ProbeError, ResourceMonitor, UtilizationGauge};
    use std::sync::Arc;

    struct Probes {
        thread_pool: Arc<UtilizationGauge>,
        db_pool: Arc<UtilizationGauge>,
        memory: Arc<UtilizationGauge>,
        requests: Arc<UtilizationGauge>,
    }

    fn detector(config: OverloadConfig) -> (OverloadDetector, Probes) {
        let probes = Probes {
            thread_pool: Arc::new(UtilizationGauge::with_value(0.0)),
            db_pool: Arc::new(UtilizationGauge::with_value(0.0)),
            memory: Arc::new(UtilizationGauge::with_value(0.0)),
            requests: Arc::new(UtilizationGauge::with_value(0.0)),
        };
        let monitors = ResourceMonitors::new()
            .with_thread_pool(probes.thread_pool.clone())
            .with_db_pool(probes.db_pool.clone())
            .with_memory(probes.memory.clone())
            .with_requests(probes.requests.clone());
        (OverloadDetector::new(config, monitors), probes)
    }

    #[test]
    fn test_below_every_threshold_is_not_overloaded() {
        let (detector, probes) = detector(OverloadConfig::default());
        probes.thread_pool.set(0.90);
        probes.db_pool.set(0.95);
        probes.memory.set(0.85);
        probes.requests.set(0.89);

        let state = detector.state();
        assert!(!state.overloaded);
        assert_eq!(state.retry_after_secs, 0);
    }

    #[test]
    fn test_any_single_breach_declares_overload() {
        for kind in ResourceKind::ALL {
            let (detector, probes) = detector(OverloadConfig::default());
            match kind {
                ResourceKind::ThreadPool => probes.thread_pool.set(0.91),
                ResourceKind::DbPool => probes.db_pool.set(0.96),
                ResourceKind::Memory => probes.memory.set(0.86),
                ResourceKind::RequestRatio => probes.requests.set(0.91),
            }
            assert!(detector.is_overloaded(), "{} breach should overload", kind);
        }
    }

    #[test]
    fn test_failing_probes_fail_open() {
        struct Broken;
        impl ResourceMonitor for Broken {
            fn utilization(&self) -> Result<f64, ProbeError> {
                Err(ProbeError::Unavailable("pool metrics offline".to_string()))
            }
        }

        let monitors = ResourceMonitors::new()
            .with_thread_pool(Arc::new(Broken))
            .with_db_pool(Arc::new(Broken))
            .with_memory(Arc::new(UtilizationGauge::new()))
            .with_requests(Arc::new(Broken));
        let detector = OverloadDetector::new(OverloadConfig::default(), monitors);

        assert!(!detector.is_overloaded());
        assert_eq!(detector.state(), OverloadState::healthy());
    }

    #[test]
    fn test_retry_delay_scales_with_peak_utilization() {
        let (detector, probes) = detector(OverloadConfig::default());
        assert_eq!(detector.retry_delay_seconds(), 60);

        probes.memory.set(0.5);
        assert_eq!(detector.retry_delay_seconds(), 180);

        probes.db_pool.set(1.0);
        assert_eq!(detector.retry_delay_seconds(), 300);

        let state = detector.state();
        assert!(state.overloaded);
        assert!((60..=300).contains(&state.retry_after_secs));
        assert_eq!(state.retry_after_secs, 300);
    }

    #[test]
    fn test_debounce_requires_consecutive_breaches() {
        let config = OverloadConfig {
            consecutive_detections: 3,
            ..Default::default()
        };
        let (detector, probes) = detector(config);
        probes.thread_pool.set(0.99);

        assert!(!detector.check().overloaded);
        assert!(!detector.check().overloaded);
        assert!(detector.check().overloaded);

        // a clean read resets the streak
        probes.thread_pool.set(0.10);
        assert!(!detector.check().overloaded);
        probes.thread_pool.set(0.99);
        assert!(!detector.check().overloaded);
    }

    #[test]
    fn test_reading_state_leaves_streak_alone() {
        let config = OverloadConfig {
            consecutive_detections: 2,
            ..Default::default()
        };
        let (detector, probes) = detector(config);
        probes.thread_pool.set(0.99);

        for _ in 0..5 {
            assert!(!detector.is_overloaded());
        }
        // the first admission check only starts the streak
        assert!(!detector.check().overloaded);
        assert!(detector.is_overloaded());
        assert!(detector.is_overloaded());
        assert!(detector.check().overloaded);
    }
}
