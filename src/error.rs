use thiserror::Error;

use crate::transport::DownstreamFailure;

/// Main error type for the admission gate
#[derive(Error, Debug)]
pub enum GateError {
    // Backpressure errors
    #[error("System overloaded, retry after {retry_after_secs}s")]
    Overloaded { retry_after_secs: u64 },

    #[error("Circuit breaker open ({failure_count} failures), retry after {retry_after_secs}s")]
    CircuitOpen {
        failure_count: u32,
        retry_after_secs: u64,
    },

    #[error("Permit not acquired within {waited_ms}ms")]
    PermitTimeout { waited_ms: u64 },

    // Downstream errors
    /// `retryable` is the retry policy's verdict on `failure`
    #[error("Downstream submission failed: {failure}")]
    Downstream {
        failure: DownstreamFailure,
        retryable: bool,
    },

    // Persistence errors
    #[error("Optimistic lock conflict on order {order_id} (expected version {expected_version})")]
    OptimisticLockConflict { order_id: i64, expected_version: i64 },

    #[error("Unexpected affected row count {affected} for order {order_id}")]
    PersistenceInvariant { order_id: i64, affected: u64 },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for GateError
pub type Result<T> = std::result::Result<T, GateError>;

impl GateError {
    /// Whether the caller may resubmit the same request unchanged
    pub fn is_retryable(&self) -> bool {
        match self {
            GateError::Overloaded { .. }
            | GateError::CircuitOpen { .. }
            | GateError::PermitTimeout { .. }
            | GateError::Timeout(_) => true,
            GateError::Downstream { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// Suggested wait before retrying, when the error carries one
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            GateError::Overloaded { retry_after_secs }
            | GateError::CircuitOpen {
                retry_after_secs, ..
            } => Some(*retry_after_secs),
            _ => None,
        }
    }
}

impl GateError {
    pub fn downstream(failure: DownstreamFailure, retryable: bool) -> Self {
        GateError::Downstream { failure, retryable }
    }
}
