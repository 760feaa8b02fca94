//! Scripted remote store for reconciler tests
//!
//! Wraps a real `SqliteClient` and lets a test count calls, inject failures,
//! and hold a call in flight until released.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::error::{RemoteError, RemoteErrorKind, RemoteResult};
use crate::models::{EntityId, Item, ItemPatch, ListPatch, ShoppingList, UserId};
use crate::remote::{RemoteStore, SqliteBackend, SqliteClient};

pub struct ScriptedStore {
    inner: SqliteClient,
    calls: Mutex<HashMap<&'static str, usize>>,
    failures: Mutex<HashMap<&'static str, VecDeque<RemoteErrorKind>>>,
    gates: Mutex<HashMap<&'static str, Arc<Semaphore>>>,
}

/// Releases calls held by `ScriptedStore::hold`
pub struct Gate(Arc<Semaphore>);

impl Gate {
    pub fn release(&self) {
        self.0.add_permits(1);
    }
}

impl ScriptedStore {
    pub fn new(inner: SqliteClient) -> Self {
        Self {
            inner,
            calls: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
        }
    }

    /// Fresh in-memory backend with a client for `user`
    pub fn in_memory(user: &str) -> (SqliteBackend, Arc<Self>) {
        let backend = SqliteBackend::open_in_memory().unwrap();
        let store = Arc::new(Self::new(backend.client(UserId::new(user))));
        (backend, store)
    }

    pub fn client(&self) -> &SqliteClient {
        &self.inner
    }

    /// Calls started for `op`, including held ones
    pub fn calls(&self, op: &str) -> usize {
        self.calls.lock().unwrap().get(op).copied().unwrap_or(0)
    }

    /// Make the next call to `op` fail without reaching the store
    pub fn fail_next(&self, op: &'static str, kind: RemoteErrorKind) {
        self.failures
            .lock()
            .unwrap()
            .entry(op)
            .or_default()
            .push_back(kind);
    }

    /// Hold every subsequent call to `op` until released one by one
    pub fn hold(&self, op: &'static str) -> Gate {
        let semaphore = Arc::new(Semaphore::new(0));
        self.gates.lock().unwrap().insert(op, semaphore.clone());
        Gate(semaphore)
    }

    async fn enter(&self, op: &'static str) -> RemoteResult<()> {
        *self.calls.lock().unwrap().entry(op).or_default() += 1;

        let gate = self.gates.lock().unwrap().get(op).cloned();
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }

        let failure = self
            .failures
            .lock()
            .unwrap()
            .get_mut(op)
            .and_then(VecDeque::pop_front);
        match failure {
            Some(kind) => Err(RemoteError::new(kind, format!("scripted {} failure", op))),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteStore for ScriptedStore {
    async fn list_lists(&self, owner: &UserId) -> RemoteResult<Vec<ShoppingList>> {
        self.enter("list_lists").await?;
        self.inner.list_lists(owner).await
    }

    async fn create_list(
        &self,
        owner: &UserId,
        name: &str,
        description: Option<&str>,
    ) -> RemoteResult<ShoppingList> {
        self.enter("create_list").await?;
        self.inner.create_list(owner, name, description).await
    }

    async fn update_list(&self, id: &EntityId, patch: &ListPatch) -> RemoteResult<ShoppingList> {
        self.enter("update_list").await?;
        self.inner.update_list(id, patch).await
    }

    async fn delete_list(&self, id: &EntityId) -> RemoteResult<()> {
        self.enter("delete_list").await?;
        self.inner.delete_list(id).await
    }

    async fn list_items(&self, list_id: &EntityId) -> RemoteResult<Vec<Item>> {
        self.enter("list_items").await?;
        self.inner.list_items(list_id).await
    }

    async fn create_item(&self, list_id: &EntityId, name: &str, quantity: u32) -> RemoteResult<Item> {
        self.enter("create_item").await?;
        self.inner.create_item(list_id, name, quantity).await
    }

    async fn update_item(&self, id: &EntityId, patch: &ItemPatch) -> RemoteResult<Item> {
        self.enter("update_item").await?;
        self.inner.update_item(id, patch).await
    }

    async fn toggle_item(&self, id: &EntityId, completed: bool) -> RemoteResult<Item> {
        self.enter("toggle_item").await?;
        self.inner.toggle_item(id, completed).await
    }

    async fn delete_item(&self, id: &EntityId) -> RemoteResult<()> {
        self.enter("delete_item").await?;
        self.inner.delete_item(id).await
    }
}

/// Yield to other tasks until `condition` holds
pub async fn until(condition: impl Fn() -> bool) {
    for _ in 0..10_000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition never became true");
}
