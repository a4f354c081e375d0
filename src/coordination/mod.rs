//! Coordination Layer for Bulk Admission
//!
//! This module decides whether new bulk work may reach the shared backend:
//! - Overload detection from resource utilization probes
//! - Circuit breaker for consecutive operational failures

pub mod circuit_breaker;
pub mod overload;

pub use circuit_breaker::{CircuitBreaker, CircuitState, CircuitStatus};
pub use overload::{OverloadDetector, OverloadState};
