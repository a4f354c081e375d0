//! Bounded batch execution
//!
//! - [`ConcurrencyLimiter`]: permit pool shared by every batch in the process
//! - [`BatchExecutor`]: chunked execution with index-preserving results

pub mod batch;
pub mod limiter;

pub use batch::BatchExecutor;
pub use limiter::{ConcurrencyLimiter, LimiterPermit};
