//! Resource probes
//!
//! Every probe is a cheap, read-only view of one scarce resource expressed
//! as a utilization ratio in `[0.0, 1.0]`. Probes may fail; callers treat a
//! failed probe as healthy.

pub mod gauge;
pub mod requests;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

pub use gauge::{spawn_memory_sampler, UtilizationGauge};
pub use requests::{RequestGuard, RequestTracker};

/// Why a probe could not produce a reading
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error("probe has no reading yet")]
    NoReading,
    #[error("probe unavailable: {0}")]
    Unavailable(String),
}

/// A read-only utilization probe
pub trait ResourceMonitor: Send + Sync {
    /// Current utilization ratio in `[0.0, 1.0]`
    fn utilization(&self) -> Result<f64, ProbeError>;
}

impl<F> ResourceMonitor for F
where
    F: Fn() -> Result<f64, ProbeError> + Send + Sync,
{
    fn utilization(&self) -> Result<f64, ProbeError> {
        self()
    }
}

/// Instantaneous health of the shared connection pool
pub trait PoolHealth: Send + Sync {
    /// Fraction of the pool's connections checked out
    fn utilization(&self) -> Result<f64, ProbeError>;
    /// Callers currently waiting for a connection
    fn waiting(&self) -> Result<usize, ProbeError>;
}

/// The resources watched by the overload detector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    ThreadPool,
    DbPool,
    Memory,
    RequestRatio,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 4] = [
        ResourceKind::ThreadPool,
        ResourceKind::DbPool,
        ResourceKind::Memory,
        ResourceKind::RequestRatio,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::ThreadPool => "thread_pool",
            ResourceKind::DbPool => "db_pool",
            ResourceKind::Memory => "memory",
            ResourceKind::RequestRatio => "request_ratio",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One probe per resource; a missing probe never reports overload
#[derive(Clone, Default)]
pub struct ResourceMonitors {
    pub thread_pool: Option<Arc<dyn ResourceMonitor>>,
    pub db_pool: Option<Arc<dyn ResourceMonitor>>,
    pub memory: Option<Arc<dyn ResourceMonitor>>,
    pub requests: Option<Arc<dyn ResourceMonitor>>,
}

impl ResourceMonitors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_thread_pool(mut self, monitor: Arc<dyn ResourceMonitor>) -> Self {
        self.thread_pool = Some(monitor);
        self
    }

    pub fn with_db_pool(mut self, monitor: Arc<dyn ResourceMonitor>) -> Self {
        self.db_pool = Some(monitor);
        self
    }

    pub fn with_memory(mut self, monitor: Arc<dyn ResourceMonitor>) -> Self {
        self.memory = Some(monitor);
        self
    }

    pub fn with_requests(mut self, monitor: Arc<dyn ResourceMonitor>) -> Self {
        self.requests = Some(monitor);
        self
    }

    pub fn get(&self, kind: ResourceKind) -> Option<&Arc<dyn ResourceMonitor>> {
        match kind {
            ResourceKind::ThreadPool => self.thread_pool.as_ref(),
            ResourceKind::DbPool => self.db_pool.as_ref(),
            ResourceKind::Memory => self.memory.as_ref(),
            ResourceKind::RequestRatio => self.requests.as_ref(),
        }
    }

    /// Read one probe, clamped to `[0, 1]`; `None` when absent or failing
    pub fn read(&self, kind: ResourceKind) -> Option<f64> {
        let monitor = self.get(kind)?;
        match monitor.utilization() {
            Ok(value) if value.is_finite() => Some(value.clamp(0.0, 1.0)),
            Ok(value) => {
                tracing::debug!("Ignoring non-finite {} reading {}", kind, value);
                None
            }
            Err(e) => {
                tracing::debug!("Probe {} unreadable, treating as healthy: {}", kind, e);
                None
            }
        }
    }

    pub fn snapshot(&self) -> ResourceUtilizationSnapshot {
        ResourceUtilizationSnapshot {
            thread_pool: self.read(ResourceKind::ThreadPool),
            db_pool: self.read(ResourceKind::DbPool),
            memory: self.read(ResourceKind::Memory),
            request_ratio: self.read(ResourceKind::RequestRatio),
            taken_at: Utc::now(),
        }
    }
}

/// Point-in-time readings; `None` marks an absent or unreadable probe
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceUtilizationSnapshot {
    pub thread_pool: Option<f64>,
    pub db_pool: Option<f64>,
    pub memory: Option<f64>,
    pub request_ratio: Option<f64>,
    pub taken_at: DateTime<Utc>,
}

impl ResourceUtilizationSnapshot {
    pub fn get(&self, kind: ResourceKind) -> Option<f64> {
        match kind {
            ResourceKind::ThreadPool => self.thread_pool,
            ResourceKind::DbPool => self.db_pool,
            ResourceKind::Memory => self.memory,
            ResourceKind::RequestRatio => self.request_ratio,
        }
    }

    /// Highest readable utilization, 0.0 when nothing is readable
    pub fn max_utilization(&self) -> f64 {
        ResourceKind::ALL
            .iter()
            .filter_map(|kind| self.get(*kind))
            .fold(0.0, f64::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_skips_failing_probes() {
        let monitors = ResourceMonitors::new()
            .with_thread_pool(Arc::new(|| -> Result<f64, ProbeError> { Ok(0.4) }))
            .with_memory(Arc::new(|| -> Result<f64, ProbeError> {
                Err(ProbeError::Unavailable("no /proc".into()))
            }))
            .with_requests(Arc::new(|| -> Result<f64, ProbeError> { Ok(1.7) }));

        let snap = monitors.snapshot();
        assert_eq!(snap.thread_pool, Some(0.4));
        assert_eq!(snap.db_pool, None);
        assert_eq!(snap.memory, None);
        assert_eq!(snap.request_ratio, Some(1.0));
        assert_eq!(snap.max_utilization(), 1.0);
    }

    #[test]
    fn test_max_utilization_of_empty_snapshot() {
        let snap = ResourceMonitors::new().snapshot();
        assert_eq!(snap.max_utilization(), 0.0);
    }
}
