pub mod coordinator;
pub mod retry;

pub use coordinator::{FallbackCoordinator, SubmissionOutcome, SubmissionPhase};
pub use retry::RetryPolicy;
