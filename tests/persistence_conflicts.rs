use order_gate::config::PersistenceConfig;
use order_gate::domain::{OrderStatus, StatusUpdate};
use order_gate::persistence::{BatchPersistence, MemoryStore};
use order_gate::GateError;
use std::sync::Arc;

fn persistence(store: Arc<MemoryStore>) -> Arc<BatchPersistence> {
    Arc::new(BatchPersistence::new(PersistenceConfig::default(), store))
}

/// Two writers holding the same version: exactly one commits.
#[tokio::test]
async fn concurrent_writers_with_same_version_conflict() {
    let store = Arc::new(MemoryStore::with_orders(1..=60));
    let persistence = persistence(store.clone());

    let batch = |status: OrderStatus| -> Vec<StatusUpdate> {
        (1..=60).map(|id| StatusUpdate::new(id, 0, status)).collect()
    };
    let first = {
        let persistence = persistence.clone();
        let updates = batch(OrderStatus::Accepted);
        tokio::spawn(async move { persistence.apply_status_updates(&updates).await })
    };
    let second = {
        let persistence = persistence.clone();
        let updates = batch(OrderStatus::Cancelled);
        tokio::spawn(async move { persistence.apply_status_updates(&updates).await })
    };

    let results = [first.await.unwrap(), second.await.unwrap()];
    let committed: Vec<_> = results.iter().filter(|r| r.is_ok()).collect();
    assert_eq!(committed.len(), 1);
    assert_eq!(*committed[0].as_ref().unwrap(), 60);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(GateError::OptimisticLockConflict { order_id: 1, .. }))));

    // every row reflects the single winner
    let winner = store.get(1).await.unwrap().status;
    for id in 1..=60 {
        let row = store.get(id).await.unwrap();
        assert_eq!(row.version, 1);
        assert_eq!(row.status, winner);
    }
}

/// Sequential writers that carry the version forward never conflict.
#[tokio::test]
async fn versions_chain_across_batches() {
    let store = Arc::new(MemoryStore::with_orders(1..=3));
    let persistence = persistence(store.clone());

    let lifecycle = [OrderStatus::Submitted, OrderStatus::Accepted, OrderStatus::Filled];
    for (version, status) in lifecycle.into_iter().enumerate() {
        let updates: Vec<_> = (1..=3)
            .map(|id| StatusUpdate::new(id, version as i64, status))
            .collect();
        assert_eq!(persistence.apply_status_updates(&updates).await.unwrap(), 3);
    }

    let row = store.get(2).await.unwrap();
    assert_eq!(row.version, 3);
    assert_eq!(row.status, OrderStatus::Filled);
    assert!(row.status.is_terminal());
}
