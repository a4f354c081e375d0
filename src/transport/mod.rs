//! Downstream order-execution transport
//!
//! The gate never speaks the execution protocol itself. Adapters implement
//! [`OrderTransport`] and classify their own failures into a [`FailureClass`]
//! so retry and fallback decisions never depend on message text.

pub mod dry_run;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::Order;

pub use dry_run::DryRunTransport;

/// Coarse failure classification produced by the transport adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Could not reach the downstream service
    Connectivity,
    /// Downstream did not answer in time
    Timeout,
    /// Downstream answered but is unavailable (maintenance, shedding load)
    Unavailable,
    /// Anything else (rejections, malformed requests, internal errors)
    Other,
}

impl FailureClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureClass::Connectivity => "connectivity",
            FailureClass::Timeout => "timeout",
            FailureClass::Unavailable => "unavailable",
            FailureClass::Other => "other",
        }
    }

    /// Classes that describe the transport rather than the request
    pub fn is_transient(&self) -> bool {
        !matches!(self, FailureClass::Other)
    }
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A failed downstream call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownstreamFailure {
    pub status: Option<u16>,
    pub class: FailureClass,
    pub message: String,
}

impl DownstreamFailure {
    pub fn new(status: Option<u16>, class: FailureClass, message: impl Into<String>) -> Self {
        Self {
            status,
            class,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(None, FailureClass::Timeout, message)
    }
}

impl std::fmt::Display for DownstreamFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(code) => write!(f, "HTTP {} ({}): {}", code, self.class, self.message),
            None => write!(f, "{}: {}", self.class, self.message),
        }
    }
}

impl std::error::Error for DownstreamFailure {}

/// Downstream acknowledgement for one order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acknowledgement {
    pub exchange_order_id: String,
    /// Raw downstream status, normalized by [`crate::domain::StatusNormalizer`]
    pub status: String,
}

impl Acknowledgement {
    pub fn new(exchange_order_id: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            exchange_order_id: exchange_order_id.into(),
            status: status.into(),
        }
    }
}

/// Per-order result of a bulk call
pub type BulkItem = Result<Acknowledgement, DownstreamFailure>;

/// The order-execution service
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderTransport: Send + Sync {
    /// Submit a single order
    async fn submit(&self, order: &Order) -> Result<Acknowledgement, DownstreamFailure>;

    /// Submit a batch in one call.
    ///
    /// The outer error fails the whole call. Otherwise one result is returned
    /// per order, in input order, so the service can accept some orders and
    /// reject others.
    async fn submit_bulk(&self, orders: &[Order]) -> Result<Vec<BulkItem>, DownstreamFailure>;
}
