//! Transactional status updates with optimistic locking

use std::collections::HashSet;
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};

use super::{StatusStore, StatusTransaction};
use crate::config::PersistenceConfig;
use crate::domain::StatusUpdate;
use crate::error::{GateError, Result};

/// Writes batches of status updates in one transaction
pub struct BatchPersistence {
    config: PersistenceConfig,
    store: Arc<dyn StatusStore>,
}

impl BatchPersistence {
    pub fn new(config: PersistenceConfig, store: Arc<dyn StatusStore>) -> Self {
        Self { config, store }
    }

    pub fn store(&self) -> Arc<dyn StatusStore> {
        Arc::clone(&self.store)
    }

    /// Apply all updates or none.
    ///
    /// Updates are grouped into statements of `chunk_size` rows inside a single
    /// transaction. Any row whose version no longer matches aborts the whole
    /// call with `OptimisticLockConflict` and nothing is written. The call as a
    /// whole is bounded by the transaction timeout.
    #[instrument(skip_all, fields(updates = updates.len()))]
    pub async fn apply_status_updates(&self, updates: &[StatusUpdate]) -> Result<u64> {
        if updates.is_empty() {
            return Ok(0);
        }
        check_unique(updates)?;

        let limit = self.config.transaction_timeout();
        match timeout(limit, self.apply_in_transaction(updates)).await {
            Ok(result) => result,
            Err(_) => {
                error!("Status update transaction exceeded {}ms, rolled back", limit.as_millis());
                Err(GateError::Timeout(format!(
                    "status update transaction exceeded {}ms",
                    limit.as_millis()
                )))
            }
        }
    }

    async fn apply_in_transaction(&self, updates: &[StatusUpdate]) -> Result<u64> {
        let mut tx = self.store.begin().await?;
        let chunk_size = self.config.chunk_size.max(1);

        for (chunk_no, chunk) in updates.chunks(chunk_size).enumerate() {
            let outcome = match tx.apply_chunk(chunk).await {
                Ok(counts) => check_counts(chunk, &counts),
                Err(e) => Err(e),
            };
            if let Err(e) = outcome {
                warn!("Status update chunk {} failed: {}", chunk_no + 1, e);
                rollback(tx).await;
                return Err(e);
            }
            debug!("Chunk {} applied ({} rows)", chunk_no + 1, chunk.len());
        }

        tx.commit().await?;
        info!("Committed {} status updates", updates.len());
        Ok(updates.len() as u64)
    }
}

async fn rollback(tx: Box<dyn StatusTransaction>) {
    if let Err(e) = tx.rollback().await {
        error!("Rollback failed: {}", e);
    }
}

fn check_unique(updates: &[StatusUpdate]) -> Result<()> {
    let mut seen = HashSet::with_capacity(updates.len());
    for update in updates {
        if !seen.insert(update.order_id) {
            return Err(GateError::Validation(format!(
                "order {} appears more than once in one update batch",
                update.order_id
            )));
        }
    }
    Ok(())
}

/// Every row must have been updated exactly once
fn check_counts(chunk: &[StatusUpdate], counts: &[u64]) -> Result<()> {
    if counts.len() != chunk.len() {
        return Err(GateError::Internal(format!(
            "store returned {} row counts for {} updates",
            counts.len(),
            chunk.len()
        )));
    }

    for (update, &affected) in chunk.iter().zip(counts) {
        match affected {
            1 => {}
            0 => {
                return Err(GateError::OptimisticLockConflict {
                    order_id: update.order_id,
                    expected_version: update.expected_version,
                })
            }
            _ => {
                return Err(GateError::PersistenceInvariant {
                    order_id: update.order_id,
                    affected,
                })
            }
        }
    }
    Ok(())
}
