use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Per-router mutual exclusion.
///
/// A router is the unit of serialization: no two mutating operations
/// (provisioning runs, customer syncs, restores) may touch the same device
/// concurrently, while operations on different routers run independently.
#[derive(Default)]
pub struct RouterLocks {
    inner: DashMap<i32, Arc<Mutex<()>>>,
}

impl RouterLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, router_id: i32) -> OwnedMutexGuard<()> {
        let mutex = self
            .inner
            .entry(router_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        mutex.lock_owned().await
    }
}
