//! Persistence Layer for Order Status
//!
//! - [`StatusStore`] / [`StatusTransaction`]: the relational store seam
//! - [`BatchPersistence`]: all-or-nothing grouped updates with optimistic locking
//! - [`MemoryStore`]: in-process store for dry runs and tests

pub mod batch;
pub mod memory;
pub mod store;

pub use batch::BatchPersistence;
pub use memory::{MemoryStore, StoredOrder};
pub use store::{StatusStore, StatusTransaction};
