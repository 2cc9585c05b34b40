//! Per-resource mutual exclusion
//!
//! Authorizations for the same resource run one at a time; unrelated
//! resources never wait on each other.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Clone, Default)]
pub struct ResourceLocks {
    locks: Arc<Mutex<HashMap<i64, Arc<AsyncMutex<()>>>>>,
}

impl ResourceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `resource_id`
    pub async fn acquire(&self, resource_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            Arc::clone(locks.entry(resource_id).or_default())
        };
        lock.lock_owned().await
    }

    /// Drop the lock entry of a deleted resource
    pub fn forget(&self, resource_id: i64) {
        self.locks.lock().remove(&resource_id);
    }

    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
