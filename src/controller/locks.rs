//! Per-identity mutation locks
//!
//! Mutating operations against one replica identity run one at a time.
//! Different identities never contend.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::model::ReplicaId;

#[derive(Debug, Default)]
pub struct ResourceLocks {
    locks: Mutex<HashMap<ReplicaId, Arc<Mutex<()>>>>,
}

impl ResourceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `id`
    pub async fn acquire(&self, id: &ReplicaId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            // Drop entries nobody holds or waits on
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(id.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Whether a mutation against `id` is in flight
    pub async fn is_locked(&self, id: &ReplicaId) -> bool {
        let locks = self.locks.lock().await;
        locks
            .get(id)
            .is_some_and(|lock| lock.try_lock().is_err())
    }
}
