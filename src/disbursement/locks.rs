//! Per-disbursement exclusive locks
//!
//! Held across read -> decide -> vendor call -> persist. Settlement
//! attempts, callbacks and the retry worker all go through the same lock.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::types::DisbursementId;

#[derive(Default)]
pub struct LockRegistry {
    locks: DashMap<DisbursementId, Arc<Mutex<()>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, id: DisbursementId) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Drop the entry for a closed disbursement if nobody is waiting on it
    pub fn release(&self, id: DisbursementId) {
        self.locks
            .remove_if(&id, |_, lock| Arc::strong_count(lock) == 1);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_id_is_exclusive() {
        let registry = Arc::new(LockRegistry::new());
        let guard = registry.acquire(1).await;

        let r = registry.clone();
        let waiter = tokio::spawn(async move {
            let _g = r.acquire(1).await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_different_ids_do_not_block() {
        let registry = LockRegistry::new();
        let _a = registry.acquire(1).await;
        let _b = registry.acquire(2).await;
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_release_keeps_held_locks() {
        let registry = LockRegistry::new();
        let guard = registry.acquire(1).await;
        // The guard still holds a reference to the mutex
        registry.release(1);
        assert_eq!(registry.len(), 1);
        drop(guard);
        registry.release(1);
        assert!(registry.is_empty());
    }
}
