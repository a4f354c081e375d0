use async_trait::async_trait;

use crate::domain::{Order, StatusUpdate};
use crate::error::Result;

/// Relational store holding order rows with a version column
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Open a transaction; dropping it without commit discards its writes
    async fn begin(&self) -> Result<Box<dyn StatusTransaction>>;

    /// Insert rows for orders not yet stored, leaving existing rows untouched
    async fn register(&self, orders: &[Order]) -> Result<u64>;
}

/// An open transaction against a [`StatusStore`]
#[async_trait]
pub trait StatusTransaction: Send {
    /// Apply one grouped conditional update.
    ///
    /// Each row is updated only if its stored version equals
    /// `expected_version`; on success the version is incremented. Returns the
    /// affected row count for every update, in input order.
    async fn apply_chunk(&mut self, updates: &[StatusUpdate]) -> Result<Vec<u64>>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}
