//! Ordered entity collection with optimistic bookkeeping
//!
//! A `Collection` holds the local copy of one ordered set of entities (the
//! user's lists, or one list's items) together with what is still in flight
//! for each of them. All transitions are synchronous; the reconciler calls
//! them between remote awaits.

use std::collections::HashMap;
use std::fmt::Debug;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{EntityId, Item, ItemPatch, ListPatch, ShoppingList};

/// Observable synchronization state of one entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityState {
    /// Not in local state
    Absent,
    /// A local mutation is applied and its remote call is in flight
    OptimisticPending,
    /// Matches the last known server response
    Confirmed,
}

/// Something the reconciler keeps an ordered local copy of
pub trait Entity: Clone + PartialEq + Debug {
    type Patch: Clone + PartialEq + Debug;

    /// Lists show newest first; items oldest first
    const NEWEST_FIRST: bool;

    fn id(&self) -> &EntityId;
    fn updated_at(&self) -> DateTime<Utc>;
    fn apply_patch(&mut self, patch: &Self::Patch);
}

impl Entity for ShoppingList {
    type Patch = ListPatch;
    const NEWEST_FIRST: bool = true;

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn apply_patch(&mut self, patch: &ListPatch) {
        self.apply(patch);
    }
}

impl Entity for Item {
    type Patch = ItemPatch;
    const NEWEST_FIRST: bool = false;

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn apply_patch(&mut self, patch: &ItemPatch) {
        self.apply(patch);
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Status<E: Entity> {
    Confirmed,
    /// Create in flight; the id is temporary
    Creating,
    /// Update in flight. `base` is the latest server value underneath the
    /// optimistic patch and is what a rollback restores.
    Updating {
        patch: E::Patch,
        issued_at: DateTime<Utc>,
        base: E,
    },
}

#[derive(Debug, Clone, PartialEq)]
struct Entry<E: Entity> {
    value: E,
    sync: Status<E>,
}

impl<E: Entity> Entry<E> {
    fn confirmed(value: E) -> Self {
        Self {
            value,
            sync: Status::Confirmed,
        }
    }
}

/// Marker for a delete in flight
#[derive(Debug, Clone)]
struct Tombstone<E> {
    value: E,
    /// Ids that preceded the entity when it was removed, nearest last
    predecessors: Vec<EntityId>,
}

#[derive(Debug, Clone)]
pub struct Collection<E: Entity> {
    entries: Vec<Entry<E>>,
    tombstones: HashMap<EntityId, Tombstone<E>>,
}

impl<E: Entity> Default for Collection<E> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            tombstones: HashMap::new(),
        }
    }
}

impl<E: Entity> Collection<E> {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn values(&self) -> Vec<E> {
        self.entries.iter().map(|e| e.value.clone()).collect()
    }

    pub fn ids(&self) -> impl Iterator<Item = &EntityId> {
        self.entries.iter().map(|e| e.value.id())
    }

    pub fn get(&self, id: &EntityId) -> Option<&E> {
        self.position(id).map(|pos| &self.entries[pos].value)
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.position(id).is_some()
    }

    pub fn is_deleting(&self, id: &EntityId) -> bool {
        self.tombstones.contains_key(id)
    }

    /// Synchronization state, or `None` if this collection does not know the id
    pub fn state_of(&self, id: &EntityId) -> Option<EntityState> {
        if self.tombstones.contains_key(id) {
            return Some(EntityState::OptimisticPending);
        }
        self.position(id).map(|pos| match self.entries[pos].sync {
            Status::Confirmed => EntityState::Confirmed,
            Status::Creating | Status::Updating { .. } => EntityState::OptimisticPending,
        })
    }

    fn position(&self, id: &EntityId) -> Option<usize> {
        self.entries.iter().position(|e| e.value.id() == id)
    }

    // ==================== Create ====================

    /// Insert an entity whose create call is in flight
    pub fn insert_pending(&mut self, value: E) {
        let entry = Entry {
            value,
            sync: Status::Creating,
        };
        if E::NEWEST_FIRST {
            self.entries.insert(0, entry);
        } else {
            self.entries.push(entry);
        }
    }

    /// Swap the temporary entity for the server's, in place
    ///
    /// If a refresh already brought in the server entity, the temporary one
    /// is dropped rather than duplicated.
    pub fn confirm_create(&mut self, temp_id: &EntityId, server: E) {
        let Some(pos) = self.position(temp_id) else {
            return;
        };

        match self.position(server.id()) {
            Some(existing) => {
                if self.entries[existing].sync == Status::Confirmed
                    && server.updated_at() >= self.entries[existing].value.updated_at()
                {
                    self.entries[existing].value = server;
                }
                self.entries.remove(pos);
            }
            None => self.entries[pos] = Entry::confirmed(server),
        }
    }

    /// Remove a temporary entity whose create failed
    pub fn discard_create(&mut self, temp_id: &EntityId) -> Option<E> {
        let pos = self.position(temp_id)?;
        Some(self.entries.remove(pos).value)
    }

    // ==================== Update ====================

    /// Apply `patch` locally ahead of the remote call
    pub fn begin_update(
        &mut self,
        id: &EntityId,
        patch: E::Patch,
        issued_at: DateTime<Utc>,
    ) -> Option<E> {
        let pos = self.position(id)?;
        let entry = &mut self.entries[pos];

        let base = match &entry.sync {
            Status::Updating { base, .. } => base.clone(),
            _ => entry.value.clone(),
        };
        entry.value.apply_patch(&patch);
        entry.sync = Status::Updating {
            patch,
            issued_at,
            base,
        };
        Some(entry.value.clone())
    }

    /// Settle an update with the server's response
    ///
    /// Keeps the local value only if a refresh already brought something
    /// newer than the response.
    pub fn confirm_update(&mut self, id: &EntityId, server: E) -> Option<E> {
        let pos = self.position(id)?;
        let entry = &mut self.entries[pos];

        let local_is_newer = match &entry.sync {
            Status::Updating { base, .. } => base.updated_at() > server.updated_at(),
            _ => entry.value.updated_at() > server.updated_at(),
        };
        if local_is_newer {
            if let Status::Updating { base, .. } = &entry.sync {
                entry.value = base.clone();
            }
        } else {
            entry.value = server;
        }
        entry.sync = Status::Confirmed;
        Some(entry.value.clone())
    }

    /// Undo an optimistic update, back to the latest server value
    pub fn rollback_update(&mut self, id: &EntityId) -> Option<E> {
        let pos = self.position(id)?;
        let entry = &mut self.entries[pos];

        if let Status::Updating { base, .. } = &entry.sync {
            entry.value = base.clone();
        }
        entry.sync = Status::Confirmed;
        Some(entry.value.clone())
    }

    // ==================== Delete ====================

    /// Remove an entity ahead of the remote delete, keeping a marker
    pub fn begin_delete(&mut self, id: &EntityId) -> Option<E> {
        let pos = self.position(id)?;
        let predecessors = self.entries[..pos]
            .iter()
            .map(|e| e.value.id().clone())
            .collect();
        let entry = self.entries.remove(pos);

        self.tombstones.insert(
            id.clone(),
            Tombstone {
                value: entry.value.clone(),
                predecessors,
            },
        );
        Some(entry.value)
    }

    /// The delete went through; forget the marker
    pub fn confirm_delete(&mut self, id: &EntityId) {
        self.tombstones.remove(id);
    }

    /// Put a deleted entity back after its nearest surviving predecessor
    pub fn rollback_delete(&mut self, id: &EntityId) -> Option<E> {
        let tombstone = self.tombstones.remove(id)?;
        if self.contains(id) {
            return self.get(id).cloned();
        }

        let index = tombstone
            .predecessors
            .iter()
            .rev()
            .find_map(|pred| self.position(pred))
            .map(|pos| pos + 1)
            .unwrap_or(0);

        self.entries
            .insert(index, Entry::confirmed(tombstone.value.clone()));
        Some(tombstone.value)
    }

    // ==================== Refresh ====================

    /// Merge an authoritative snapshot into local state
    ///
    /// Confirmed entities and their order are replaced by the snapshot.
    /// Pending creates and deletes survive it. An entity with an update in
    /// flight takes the snapshot value if it is at least as new as the
    /// update; otherwise the optimistic patch is reapplied on top of it.
    ///
    /// Returns whether anything observable changed.
    pub fn merge(&mut self, fetched: Vec<E>) -> bool {
        let mut previous: HashMap<EntityId, Entry<E>> = self
            .entries
            .iter()
            .filter(|e| e.sync != Status::Creating)
            .map(|e| (e.value.id().clone(), e.clone()))
            .collect();
        let creating: Vec<Entry<E>> = self
            .entries
            .iter()
            .filter(|e| e.sync == Status::Creating)
            .cloned()
            .collect();

        let mut next = Vec::with_capacity(fetched.len() + creating.len());
        for value in fetched {
            if self.tombstones.contains_key(value.id()) {
                continue;
            }

            let entry = match previous.remove(value.id()) {
                Some(Entry {
                    sync:
                        Status::Updating {
                            patch, issued_at, ..
                        },
                    ..
                }) => {
                    let mut shown = value.clone();
                    if value.updated_at() < issued_at {
                        shown.apply_patch(&patch);
                    }
                    Entry {
                        value: shown,
                        sync: Status::Updating {
                            patch,
                            issued_at,
                            base: value,
                        },
                    }
                }
                _ => Entry::confirmed(value),
            };
            next.push(entry);
        }

        if E::NEWEST_FIRST {
            next.splice(0..0, creating);
        } else {
            next.extend(creating);
        }

        let changed = self
            .entries
            .iter()
            .map(|e| &e.value)
            .ne(next.iter().map(|e| &e.value));
        self.entries = next;
        changed
    }
}
