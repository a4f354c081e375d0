use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{ProbeError, ResourceMonitor};

const EMPTY: u64 = u64::MAX;

/// Lock-free utilization gauge fed by an external sampler
#[derive(Debug)]
pub struct UtilizationGauge {
    bits: AtomicU64,
}

impl UtilizationGauge {
    /// A gauge with no reading; probing it fails until the first `set`
    pub fn new() -> Self {
        Self {
            bits: AtomicU64::new(EMPTY),
        }
    }

    pub fn with_value(ratio: f64) -> Self {
        let gauge = Self::new();
        gauge.set(ratio);
        gauge
    }

    pub fn set(&self, ratio: f64) {
        let ratio = if ratio.is_finite() {
            ratio.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.bits.store(ratio.to_bits(), Ordering::Relaxed);
    }

    /// Set from a used/capacity pair; zero capacity reads as idle
    pub fn set_ratio(&self, used: u64, capacity: u64) {
        if capacity == 0 {
            self.set(0.0);
        } else {
            self.set(used as f64 / capacity as f64);
        }
    }

    pub fn clear(&self) {
        self.bits.store(EMPTY, Ordering::Relaxed);
    }

    pub fn get(&self) -> Option<f64> {
        match self.bits.load(Ordering::Relaxed) {
            EMPTY => None,
            bits => Some(f64::from_bits(bits)),
        }
    }
}

impl Default for UtilizationGauge {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceMonitor for UtilizationGauge {
    fn utilization(&self) -> Result<f64, ProbeError> {
        self.get().ok_or(ProbeError::NoReading)
    }
}

/// Memory utilization from `/proc/meminfo` contents: `1 - MemAvailable / MemTotal`
pub fn parse_meminfo(contents: &str) -> Option<f64> {
    let mut total = None;
    let mut available = None;

    for line in contents.lines() {
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("MemTotal:") => total = parts.next().and_then(|v| v.parse::<u64>().ok()),
            Some("MemAvailable:") => available = parts.next().and_then(|v| v.parse::<u64>().ok()),
            _ => {}
        }
        if total.is_some() && available.is_some() {
            break;
        }
    }

    match (total, available) {
        (Some(total), Some(available)) if total > 0 => {
            Some(1.0 - available.min(total) as f64 / total as f64)
        }
        _ => None,
    }
}

/// Periodically sample system memory into `gauge`.
///
/// The gauge is cleared whenever a sample cannot be taken, so the overload
/// detector sees an unreadable probe rather than a stale value.
pub fn spawn_memory_sampler(gauge: Arc<UtilizationGauge>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        let mut warned = false;
        loop {
            ticker.tick().await;
            match tokio::fs::read_to_string("/proc/meminfo").await {
                Ok(contents) => match parse_meminfo(&contents) {
                    Some(ratio) => gauge.set(ratio),
                    None => {
                        debug!("Could not parse /proc/meminfo");
                        gauge.clear();
                    }
                },
                Err(e) => {
                    if !warned {
                        warn!("Memory sampling disabled: {}", e);
                        warned = true;
                    }
                    gauge.clear();
                }
            }
        }
    })
}
