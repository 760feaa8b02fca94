//! Optimistic state reconciler
//!
//! Owns the local copy of the user's lists and items. Every mutation is
//! applied locally first, then sent to the remote store; the response either
//! confirms the local change (swapping temporary ids for server ids) or
//! rolls it back. Refreshes merge authoritative snapshots into local state
//! without clobbering mutations that are still in flight.
//!
//! ## Ordering
//!
//! Transitions on one entity run one at a time, in the order they were
//! requested. A transition on an entity whose create is in flight waits for
//! the create and then targets the server id. Transitions on different
//! entities run concurrently.
//!
//! ## Notifications
//!
//! Observers take the event receiver once via `take_events()`:
//!
//! ```text
//! Changed              local state moved (optimistic apply, confirm, rollback, refresh)
//! RolledBack { .. }    a mutation failed remotely and was undone
//! RefreshFailed(..)    a refresh failed; local state is untouched
//! ```

mod collection;
mod queue;
mod state;

#[cfg(test)]
pub(crate) mod testing;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use futures_util::future::try_join_all;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{ReconcileError, ReconcileResult, RemoteError, ValidationError};
use crate::models::{
    validate_name, validate_quantity, EntityId, Item, ItemPatch, ListPatch, Progress,
    ShoppingList, UserId,
};
use crate::remote::RemoteStore;

pub use collection::EntityState;
use queue::{EntityQueue, Turn};
use state::State;

/// Notification emitted by the reconciler
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcilerEvent {
    /// Local state changed; re-read it
    Changed,
    /// A mutation on `id` was rejected and undone
    RolledBack { id: EntityId, error: RemoteError },
    /// A refresh failed
    RefreshFailed(RemoteError),
}

/// Remote call issued for an item write
enum ItemWrite {
    Update(ItemPatch),
    Toggle(bool),
}

impl ItemWrite {
    fn patch(&self) -> ItemPatch {
        match self {
            ItemWrite::Update(patch) => patch.clone(),
            ItemWrite::Toggle(completed) => ItemPatch::completed(*completed),
        }
    }
}

struct Inner {
    remote: Arc<dyn RemoteStore>,
    owner: UserId,
    state: Mutex<State>,
    queue: EntityQueue,
    events_tx: mpsc::UnboundedSender<ReconcilerEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<ReconcilerEvent>>>,
    closed: AtomicBool,
}

/// Handle to the reconciler; clones share the same state
#[derive(Clone)]
pub struct Reconciler {
    inner: Arc<Inner>,
}

impl Reconciler {
    pub fn new(remote: Arc<dyn RemoteStore>, owner: UserId) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                remote,
                owner,
                state: Mutex::new(State::default()),
                queue: EntityQueue::new(),
                events_tx,
                events_rx: Mutex::new(Some(events_rx)),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn owner(&self) -> &UserId {
        &self.inner.owner
    }

    /// Take the event receiver (can only be called once)
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<ReconcilerEvent>> {
        self.inner
            .events_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: ReconcilerEvent) {
        // Nobody listening is fine
        let _ = self.inner.events_tx.send(event);
    }

    fn rolled_back(&self, id: &EntityId, error: &RemoteError) {
        self.emit(ReconcilerEvent::RolledBack {
            id: id.clone(),
            error: error.clone(),
        });
        self.emit(ReconcilerEvent::Changed);
    }

    // ==================== Lifecycle ====================

    /// Stop applying remote results
    ///
    /// Calls already in flight complete on the remote side, but their
    /// results are discarded and the operations return `Closed`.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            debug!("Reconciler closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> ReconcileResult<()> {
        if self.is_closed() {
            return Err(ReconcileError::Closed);
        }
        Ok(())
    }

    /// Initial fetch of all lists and their items
    pub async fn load(&self) -> ReconcileResult<()> {
        self.refresh_lists().await
    }

    pub fn is_loaded(&self) -> bool {
        self.state().loaded
    }

    // ==================== Reads ====================

    /// Lists with items, most recently updated first (pending creates lead)
    pub fn lists(&self) -> Vec<ShoppingList> {
        self.state().snapshot()
    }

    pub fn list(&self, id: &EntityId) -> Option<ShoppingList> {
        let state = self.state();
        state.list(&state.resolve(id))
    }

    /// Items of a list, oldest first
    pub fn items(&self, list_id: &EntityId) -> Vec<Item> {
        self.list(list_id).map(|list| list.items).unwrap_or_default()
    }

    pub fn item(&self, id: &EntityId) -> Option<Item> {
        let state = self.state();
        state.item(&state.resolve(id))
    }

    pub fn progress(&self, list_id: &EntityId) -> Option<Progress> {
        self.list(list_id).map(|list| list.progress())
    }

    pub fn state_of(&self, id: &EntityId) -> EntityState {
        self.state().state_of(id)
    }

    /// Server id for `id` if it was a temporary id that got confirmed
    pub fn resolve(&self, id: &EntityId) -> EntityId {
        self.state().resolve(id)
    }

    /// Wait for the turn on `id`, following a create that confirms meanwhile
    async fn acquire_turn(&self, id: &EntityId) -> (Turn, EntityId) {
        let mut id = self.resolve(id);
        loop {
            let turn = self.inner.queue.acquire(&id).await;
            let resolved = self.resolve(&id);
            if resolved == id {
                return (turn, id);
            }
            id = resolved;
        }
    }

    // ==================== Refresh ====================

    /// Fetch all lists and their items and merge them in
    pub async fn refresh_lists(&self) -> ReconcileResult<()> {
        self.ensure_open()?;
        let remote = &self.inner.remote;

        let fetched = async {
            let lists = remote.list_lists(&self.inner.owner).await?;
            let items = try_join_all(lists.iter().map(|list| remote.list_items(&list.id))).await?;
            Ok::<_, RemoteError>((lists, items))
        }
        .await;
        self.ensure_open()?;

        let (lists, items) = match fetched {
            Ok(fetched) => fetched,
            Err(e) => {
                warn!("Refreshing lists failed: {}", e);
                self.emit(ReconcilerEvent::RefreshFailed(e.clone()));
                return Err(e.into());
            }
        };

        let by_list: HashMap<EntityId, Vec<Item>> = lists
            .iter()
            .map(|list| list.id.clone())
            .zip(items)
            .collect();
        let count = lists.len();

        let changed = self.state().merge_all(lists, by_list);
        debug!("Refreshed {} lists (changed: {})", count, changed);
        if changed {
            self.emit(ReconcilerEvent::Changed);
        }
        Ok(())
    }

    /// Fetch one list's items and merge them in
    ///
    /// Does nothing for lists that are not loaded or not yet confirmed.
    pub async fn refresh_items(&self, list_id: &EntityId) -> ReconcileResult<()> {
        self.ensure_open()?;
        let list_id = self.resolve(list_id);
        if list_id.is_temporary() || self.state().lists.get(&list_id).is_none() {
            return Ok(());
        }

        let fetched = self.inner.remote.list_items(&list_id).await;
        self.ensure_open()?;

        let items = match fetched {
            Ok(items) => items,
            Err(e) => {
                warn!("Refreshing items of {} failed: {}", list_id, e);
                self.emit(ReconcilerEvent::RefreshFailed(e.clone()));
                return Err(e.into());
            }
        };

        let changed = self.state().merge_items(&list_id, items);
        if changed {
            self.emit(ReconcilerEvent::Changed);
        }
        Ok(())
    }

    // ==================== Lists ====================

    pub async fn create_list(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> ReconcileResult<ShoppingList> {
        self.ensure_open()?;
        let name = validate_name("name", name)?;
        let description = description
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string);

        let temp_id = EntityId::temporary();
        let _turn = self.inner.queue.acquire(&temp_id).await;

        let now = Utc::now();
        self.state().insert_pending_list(ShoppingList {
            id: temp_id.clone(),
            user_id: self.inner.owner.clone(),
            name: name.clone(),
            description: description.clone(),
            created_at: now,
            updated_at: now,
            items: Vec::new(),
        });
        self.emit(ReconcilerEvent::Changed);

        let result = self
            .inner
            .remote
            .create_list(&self.inner.owner, &name, description.as_deref())
            .await;
        self.ensure_open()?;

        match result {
            Ok(list) => {
                self.state().confirm_list_create(&temp_id, list.clone());
                self.emit(ReconcilerEvent::Changed);
                info!("Created list {} ({})", list.name, list.id);
                Ok(list)
            }
            Err(e) => {
                self.state().discard_list_create(&temp_id);
                warn!("Creating list {:?} failed: {}", name, e);
                self.rolled_back(&temp_id, &e);
                Err(e.into())
            }
        }
    }

    pub async fn update_list(&self, id: &EntityId, patch: ListPatch) -> ReconcileResult<ShoppingList> {
        self.ensure_open()?;
        let patch = patch.validated()?;
        if patch.is_empty() {
            return Err(ValidationError::EmptyPatch.into());
        }

        let (_turn, id) = self.acquire_turn(id).await;
        let issued_at = Utc::now();
        {
            let mut state = self.state();
            if state.lists.begin_update(&id, patch.clone(), issued_at).is_none() {
                return Err(ReconcileError::UnknownEntity(id));
            }
        }
        self.emit(ReconcilerEvent::Changed);

        let result = self.inner.remote.update_list(&id, &patch).await;
        self.ensure_open()?;

        match result {
            Ok(list) => {
                let settled = {
                    let mut state = self.state();
                    state.lists.confirm_update(&id, list.clone());
                    state.list(&id)
                };
                self.emit(ReconcilerEvent::Changed);
                debug!("Updated list {}", id);
                Ok(settled.unwrap_or(list))
            }
            Err(e) => {
                self.state().lists.rollback_update(&id);
                warn!("Updating list {} failed: {}", id, e);
                self.rolled_back(&id, &e);
                Err(e.into())
            }
        }
    }

    /// Delete a list and, with it, all of its items
    pub async fn delete_list(&self, id: &EntityId) -> ReconcileResult<()> {
        self.ensure_open()?;
        let (_turn, id) = self.acquire_turn(id).await;

        if !self.state().begin_list_delete(&id) {
            return Err(ReconcileError::UnknownEntity(id));
        }
        self.emit(ReconcilerEvent::Changed);

        let result = self.inner.remote.delete_list(&id).await;
        self.ensure_open()?;

        match result {
            Ok(()) => {
                self.state().confirm_list_delete(&id);
                info!("Deleted list {}", id);
                Ok(())
            }
            Err(e) => {
                self.state().rollback_list_delete(&id);
                warn!("Deleting list {} failed: {}", id, e);
                self.rolled_back(&id, &e);
                Err(e.into())
            }
        }
    }

    // ==================== Items ====================

    /// Add an item to the end of a list
    ///
    /// If the list itself is still being created, waits for it and files the
    /// item under the list's server id.
    pub async fn create_item(
        &self,
        list_id: &EntityId,
        name: &str,
        quantity: u32,
    ) -> ReconcileResult<Item> {
        self.ensure_open()?;
        let name = validate_name("name", name)?;
        let quantity = validate_quantity(quantity)?;

        let mut list_id = self.resolve(list_id);
        if list_id.is_temporary() {
            drop(self.inner.queue.acquire(&list_id).await);
            list_id = self.resolve(&list_id);
        }

        let temp_id = EntityId::temporary();
        let _turn = self.inner.queue.acquire(&temp_id).await;

        let now = Utc::now();
        {
            let mut state = self.state();
            if state.lists.get(&list_id).is_none() {
                return Err(ReconcileError::UnknownEntity(list_id));
            }
            state
                .items
                .entry(list_id.clone())
                .or_default()
                .insert_pending(Item {
                    id: temp_id.clone(),
                    list_id: list_id.clone(),
                    name: name.clone(),
                    quantity,
                    completed: false,
                    created_at: now,
                    updated_at: now,
                });
        }
        self.emit(ReconcilerEvent::Changed);

        let result = self
            .inner
            .remote
            .create_item(&list_id, &name, quantity)
            .await;
        self.ensure_open()?;

        match result {
            Ok(item) => {
                self.state()
                    .confirm_item_create(&list_id, &temp_id, item.clone());
                self.emit(ReconcilerEvent::Changed);
                debug!("Created item {} in list {}", item.id, list_id);
                Ok(item)
            }
            Err(e) => {
                if let Some(items) = self.state().item_collection_mut(&list_id) {
                    items.discard_create(&temp_id);
                }
                warn!("Creating item {:?} failed: {}", name, e);
                self.rolled_back(&temp_id, &e);
                Err(e.into())
            }
        }
    }

    pub async fn update_item(&self, id: &EntityId, patch: ItemPatch) -> ReconcileResult<Item> {
        self.ensure_open()?;
        let patch = patch.validated()?;
        if patch.is_empty() {
            return Err(ValidationError::EmptyPatch.into());
        }
        self.write_item(id, |_| ItemWrite::Update(patch)).await
    }

    /// Flip an item's completion
    ///
    /// The new value is computed from local state at the moment this
    /// toggle's turn comes, so back-to-back toggles alternate.
    pub async fn toggle_item(&self, id: &EntityId) -> ReconcileResult<Item> {
        self.ensure_open()?;
        self.write_item(id, |item| ItemWrite::Toggle(!item.completed))
            .await
    }

    pub async fn set_item_completed(&self, id: &EntityId, completed: bool) -> ReconcileResult<Item> {
        self.ensure_open()?;
        self.write_item(id, |_| ItemWrite::Toggle(completed)).await
    }

    async fn write_item<F>(&self, id: &EntityId, plan: F) -> ReconcileResult<Item>
    where
        F: FnOnce(&Item) -> ItemWrite,
    {
        let (_turn, id) = self.acquire_turn(id).await;
        let issued_at = Utc::now();

        let (list_id, write) = {
            let mut state = self.state();
            let list_id = state
                .list_of_item(&id)
                .ok_or_else(|| ReconcileError::UnknownEntity(id.clone()))?;
            let items = state
                .items
                .get_mut(&list_id)
                .ok_or_else(|| ReconcileError::UnknownEntity(id.clone()))?;
            let current = items
                .get(&id)
                .ok_or_else(|| ReconcileError::UnknownEntity(id.clone()))?;

            let write = plan(current);
            items.begin_update(&id, write.patch(), issued_at);
            (list_id, write)
        };
        self.emit(ReconcilerEvent::Changed);

        let result = match &write {
            ItemWrite::Update(patch) => self.inner.remote.update_item(&id, patch).await,
            ItemWrite::Toggle(completed) => self.inner.remote.toggle_item(&id, *completed).await,
        };
        self.ensure_open()?;

        match result {
            Ok(item) => {
                let settled = self
                    .state()
                    .item_collection_mut(&list_id)
                    .and_then(|items| items.confirm_update(&id, item.clone()));
                self.emit(ReconcilerEvent::Changed);
                debug!("Updated item {}", id);
                Ok(settled.unwrap_or(item))
            }
            Err(e) => {
                if let Some(items) = self.state().item_collection_mut(&list_id) {
                    items.rollback_update(&id);
                }
                warn!("Updating item {} failed: {}", id, e);
                self.rolled_back(&id, &e);
                Err(e.into())
            }
        }
    }

    pub async fn delete_item(&self, id: &EntityId) -> ReconcileResult<()> {
        self.ensure_open()?;
        let (_turn, id) = self.acquire_turn(id).await;

        let list_id = {
            let mut state = self.state();
            let list_id = state
                .list_of_item(&id)
                .ok_or_else(|| ReconcileError::UnknownEntity(id.clone()))?;
            state
                .items
                .get_mut(&list_id)
                .and_then(|items| items.begin_delete(&id))
                .ok_or_else(|| ReconcileError::UnknownEntity(id.clone()))?;
            list_id
        };
        self.emit(ReconcilerEvent::Changed);

        let result = self.inner.remote.delete_item(&id).await;
        self.ensure_open()?;

        let mut state = self.state();
        let items = state.item_collection_mut(&list_id);
        match result {
            Ok(()) => {
                if let Some(items) = items {
                    items.confirm_delete(&id);
                }
                debug!("Deleted item {}", id);
                Ok(())
            }
            Err(e) => {
                if let Some(items) = items {
                    items.rollback_delete(&id);
                }
                drop(state);
                warn!("Deleting item {} failed: {}", id, e);
                self.rolled_back(&id, &e);
                Err(e.into())
            }
        }
    }
}
