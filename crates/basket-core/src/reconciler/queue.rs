//! Per-entity operation queue
//!
//! Each entity gets a FIFO lock. Holding its `Turn` means no other
//! transition on that entity has a remote call in flight. Tokio's mutex
//! grants waiters in arrival order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::models::EntityId;

/// Exclusive right to run one transition on an entity
pub type Turn = OwnedMutexGuard<()>;

#[derive(Debug, Default)]
pub struct EntityQueue {
    slots: Mutex<HashMap<EntityId, Arc<AsyncMutex<()>>>>,
}

impl EntityQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for every earlier transition on `id` to finish
    pub async fn acquire(&self, id: &EntityId) -> Turn {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            // Slots nobody holds or waits on can go
            slots.retain(|_, slot| Arc::strong_count(slot) > 1);
            slots.entry(id.clone()).or_default().clone()
        };
        slot.lock_owned().await
    }

    /// Whether a transition on `id` currently holds its turn
    #[cfg(test)]
    pub fn is_busy(&self, id: &EntityId) -> bool {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots
            .get(id)
            .map(|slot| slot.try_lock().is_err())
            .unwrap_or(false)
    }
}
