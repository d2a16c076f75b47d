//! Per-entity exclusive locks.
//!
//! Each `(business, lane)` pair gets its own async mutex, created on first use
//! and dropped when the last holder or waiter lets go. Different entities,
//! and different businesses, never contend.

use crate::{BusinessId, LaneKey};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockKey = (BusinessId, LaneKey);

/// Registry of entity-scoped locks.
#[derive(Debug, Default)]
pub struct EntityLocks {
    slots: DashMap<LockKey, Arc<Mutex<()>>>,
}

impl EntityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to one entity of one business.
    pub async fn acquire(self: &Arc<Self>, business_id: &str, lane: &LaneKey) -> EntityGuard {
        let key = (business_id.to_string(), lane.clone());
        let slot = Arc::clone(&*self.slots.entry(key.clone()).or_default());
        let guard = slot.lock_owned().await;
        EntityGuard {
            guard: Some(guard),
            key,
            locks: Arc::clone(self),
        }
    }

    /// Number of live lock entries.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Held while an operation's critical section runs.
pub struct EntityGuard {
    guard: Option<OwnedMutexGuard<()>>,
    key: LockKey,
    locks: Arc<EntityLocks>,
}

impl Drop for EntityGuard {
    fn drop(&mut self) {
        // Release first so our own Arc no longer counts as a holder.
        drop(self.guard.take());
        self.locks
            .slots
            .remove_if(&self.key, |_, slot| Arc::strong_count(slot) == 1);
    }
}
