use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::warn;

use super::{StatusStore, StatusTransaction};
use crate::domain::{Order, OrderStatus, StatusUpdate};
use crate::error::Result;

/// One stored order row
#[derive(Debug, Clone, PartialEq)]
pub struct StoredOrder {
    pub status: OrderStatus,
    pub version: i64,
    pub extra: Option<serde_json::Value>,
}

impl StoredOrder {
    fn pending(version: i64) -> Self {
        Self {
            status: OrderStatus::Pending,
            version,
            extra: None,
        }
    }
}

type Table = HashMap<i64, StoredOrder>;

/// In-process store used for dry runs and tests.
///
/// A transaction holds the table lock from `begin` until it commits or is
/// dropped, which serializes writers the way row locks would.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: Arc<Mutex<Table>>,
    statement_latency: Duration,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate pending rows at version 0
    pub fn with_orders(ids: impl IntoIterator<Item = i64>) -> Self {
        let rows = ids
            .into_iter()
            .map(|id| (id, StoredOrder::pending(0)))
            .collect();
        Self {
            rows: Arc::new(Mutex::new(rows)),
            statement_latency: Duration::ZERO,
        }
    }

    /// Delay every grouped statement, to exercise transaction timeouts
    pub fn with_statement_latency(mut self, latency: Duration) -> Self {
        self.statement_latency = latency;
        self
    }

    pub async fn get(&self, id: i64) -> Option<StoredOrder> {
        self.rows.lock().await.get(&id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.rows.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.lock().await.is_empty()
    }
}

#[async_trait]
impl StatusStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StatusTransaction>> {
        let guard = Arc::clone(&self.rows).lock_owned().await;
        Ok(Box::new(MemoryTransaction {
            table: guard,
            staged: HashMap::new(),
            latency: self.statement_latency,
            finished: false,
        }))
    }

    async fn register(&self, orders: &[Order]) -> Result<u64> {
        let mut rows = self.rows.lock().await;
        let mut inserted = 0;
        for order in orders {
            if !rows.contains_key(&order.id) {
                rows.insert(order.id, StoredOrder::pending(order.version));
                inserted += 1;
            }
        }
        Ok(inserted)
    }
}

struct MemoryTransaction {
    table: OwnedMutexGuard<Table>,
    staged: Table,
    latency: Duration,
    finished: bool,
}

#[async_trait]
impl StatusTransaction for MemoryTransaction {
    async fn apply_chunk(&mut self, updates: &[StatusUpdate]) -> Result<Vec<u64>> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let mut counts = Vec::with_capacity(updates.len());
        for update in updates {
            let current = self
                .staged
                .get(&update.order_id)
                .or_else(|| self.table.get(&update.order_id))
                .cloned();

            match current {
                Some(row) if row.version == update.expected_version => {
                    self.staged.insert(
                        update.order_id,
                        StoredOrder {
                            status: update.new_status,
                            version: row.version + 1,
                            extra: update.extra.clone().or(row.extra),
                        },
                    );
                    counts.push(1);
                }
                _ => counts.push(0),
            }
        }
        Ok(counts)
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        let staged = std::mem::take(&mut self.staged);
        self.table.extend(staged);
        self.finished = true;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        self.staged.clear();
        self.finished = true;
        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if !self.finished && !self.staged.is_empty() {
            warn!(
                "Transaction dropped without commit - discarding {} staged rows",
                self.staged.len()
            );
        }
    }
}
