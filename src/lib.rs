pub mod adapters;
pub mod cli;
pub mod config;
pub mod coordination;
pub mod domain;
pub mod error;
pub mod executor;
pub mod fallback;
pub mod logging;
pub mod monitoring;
pub mod persistence;
pub mod services;
pub mod transport;

pub use config::AppConfig;
pub use coordination::{CircuitBreaker, CircuitState, CircuitStatus, OverloadDetector, OverloadState};
pub use domain::{BatchResult, BatchTask, Order, OrderStatus, StatusUpdate, SubmissionContext, TaskOutcome};
pub use error::{GateError, Result};
pub use executor::{BatchExecutor, ConcurrencyLimiter};
pub use fallback::{FallbackCoordinator, RetryPolicy, SubmissionOutcome, SubmissionPhase};
pub use persistence::{BatchPersistence, MemoryStore, StatusStore, StatusTransaction};
pub use services::OrderGate;
pub use transport::{Acknowledgement, BulkItem, DownstreamFailure, FailureClass, OrderTransport};
