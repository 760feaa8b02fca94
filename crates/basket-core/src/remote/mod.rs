//! Remote store client
//!
//! Typed request/response boundary to the authoritative store. The
//! reconciler only ever talks to a `RemoteStore`; which backend sits behind
//! it is decided by whoever constructs the client.
//!
//! ## Contract
//!
//! - Every mutating call stamps `updated_at` with the server's clock.
//! - `list_lists` is ordered most-recently-updated first, with empty `items`.
//! - `list_items` is ordered by creation, oldest first.
//! - Every failure is a `RemoteError { kind, message }`.
//!
//! ## Change feed
//!
//! Backends that can push row-level change notifications implement
//! `ChangeFeed`. The notification subscriber filters that feed by scope.

mod schema;
mod sqlite;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::warn;

use crate::error::{RemoteError, RemoteResult};
use crate::models::{EntityId, Item, ItemPatch, ListPatch, ShoppingList, UserId};

pub use schema::SCHEMA_VERSION;
pub use sqlite::{SqliteBackend, SqliteClient};

/// One operation per entity/action pair against the authoritative store
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// All lists owned by `owner`, most recently updated first
    async fn list_lists(&self, owner: &UserId) -> RemoteResult<Vec<ShoppingList>>;

    async fn create_list(
        &self,
        owner: &UserId,
        name: &str,
        description: Option<&str>,
    ) -> RemoteResult<ShoppingList>;

    async fn update_list(&self, id: &EntityId, patch: &ListPatch) -> RemoteResult<ShoppingList>;

    /// Delete a list; its items go with it
    async fn delete_list(&self, id: &EntityId) -> RemoteResult<()>;

    /// Items of a list, oldest first
    async fn list_items(&self, list_id: &EntityId) -> RemoteResult<Vec<Item>>;

    async fn create_item(&self, list_id: &EntityId, name: &str, quantity: u32)
        -> RemoteResult<Item>;

    async fn update_item(&self, id: &EntityId, patch: &ItemPatch) -> RemoteResult<Item>;

    async fn toggle_item(&self, id: &EntityId, completed: bool) -> RemoteResult<Item>;

    async fn delete_item(&self, id: &EntityId) -> RemoteResult<()>;
}

#[async_trait]
impl<S: RemoteStore + ?Sized> RemoteStore for Arc<S> {
    async fn list_lists(&self, owner: &UserId) -> RemoteResult<Vec<ShoppingList>> {
        (**self).list_lists(owner).await
    }

    async fn create_list(
        &self,
        owner: &UserId,
        name: &str,
        description: Option<&str>,
    ) -> RemoteResult<ShoppingList> {
        (**self).create_list(owner, name, description).await
    }

    async fn update_list(&self, id: &EntityId, patch: &ListPatch) -> RemoteResult<ShoppingList> {
        (**self).update_list(id, patch).await
    }

    async fn delete_list(&self, id: &EntityId) -> RemoteResult<()> {
        (**self).delete_list(id).await
    }

    async fn list_items(&self, list_id: &EntityId) -> RemoteResult<Vec<Item>> {
        (**self).list_items(list_id).await
    }

    async fn create_item(
        &self,
        list_id: &EntityId,
        name: &str,
        quantity: u32,
    ) -> RemoteResult<Item> {
        (**self).create_item(list_id, name, quantity).await
    }

    async fn update_item(&self, id: &EntityId, patch: &ItemPatch) -> RemoteResult<Item> {
        (**self).update_item(id, patch).await
    }

    async fn toggle_item(&self, id: &EntityId, completed: bool) -> RemoteResult<Item> {
        (**self).toggle_item(id, completed).await
    }

    async fn delete_item(&self, id: &EntityId) -> RemoteResult<()> {
        (**self).delete_item(id).await
    }
}

/// Table a change event refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Lists,
    Items,
}

/// Kind of row change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Row-level change notification as published by the store
///
/// Carries routing information only, never the row's content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawChangeEvent {
    pub table: Table,
    pub kind: ChangeKind,
    /// Id of the changed row
    pub row_id: EntityId,
    /// List the row belongs to (the row itself for list rows)
    pub list_id: EntityId,
    /// Owner of that list
    pub owner: UserId,
}

/// Source of asynchronous change notifications
pub trait ChangeFeed: Send + Sync {
    /// Start receiving events published from now on
    fn changes(&self) -> broadcast::Receiver<RawChangeEvent>;
}

impl<F: ChangeFeed + ?Sized> ChangeFeed for Arc<F> {
    fn changes(&self) -> broadcast::Receiver<RawChangeEvent> {
        (**self).changes()
    }
}

/// Bounds every remote call by a deadline
///
/// A call that does not finish in time fails as a transport error. The
/// underlying request is dropped, so the store may or may not have applied
/// it; a later refresh settles which.
pub struct TimeoutStore<S> {
    inner: S,
    timeout: Duration,
}

impl<S: RemoteStore> TimeoutStore<S> {
    pub fn new(inner: S, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn bounded<T: Send>(
        &self,
        operation: &'static str,
        call: impl std::future::Future<Output = RemoteResult<T>> + Send,
    ) -> RemoteResult<T> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!("{} timed out after {:?}", operation, self.timeout);
                Err(RemoteError::transport(format!(
                    "{} timed out after {:?}",
                    operation, self.timeout
                )))
            }
        }
    }
}

#[async_trait]
impl<S: RemoteStore> RemoteStore for TimeoutStore<S> {
    async fn list_lists(&self, owner: &UserId) -> RemoteResult<Vec<ShoppingList>> {
        self.bounded("list_lists", self.inner.list_lists(owner)).await
    }

    async fn create_list(
        &self,
        owner: &UserId,
        name: &str,
        description: Option<&str>,
    ) -> RemoteResult<ShoppingList> {
        self.bounded(
            "create_list",
            self.inner.create_list(owner, name, description),
        )
        .await
    }

    async fn update_list(&self, id: &EntityId, patch: &ListPatch) -> RemoteResult<ShoppingList> {
        self.bounded("update_list", self.inner.update_list(id, patch))
            .await
    }

    async fn delete_list(&self, id: &EntityId) -> RemoteResult<()> {
        self.bounded("delete_list", self.inner.delete_list(id)).await
    }

    async fn list_items(&self, list_id: &EntityId) -> RemoteResult<Vec<Item>> {
        self.bounded("list_items", self.inner.list_items(list_id))
            .await
    }

    async fn create_item(
        &self,
        list_id: &EntityId,
        name: &str,
        quantity: u32,
    ) -> RemoteResult<Item> {
        self.bounded(
            "create_item",
            self.inner.create_item(list_id, name, quantity),
        )
        .await
    }

    async fn update_item(&self, id: &EntityId, patch: &ItemPatch) -> RemoteResult<Item> {
        self.bounded("update_item", self.inner.update_item(id, patch))
            .await
    }

    async fn toggle_item(&self, id: &EntityId, completed: bool) -> RemoteResult<Item> {
        self.bounded("toggle_item", self.inner.toggle_item(id, completed))
            .await
    }

    async fn delete_item(&self, id: &EntityId) -> RemoteResult<()> {
        self.bounded("delete_item", self.inner.delete_item(id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteErrorKind;

    /// Store whose every call hangs forever
    struct Unresponsive;

    #[async_trait]
    impl RemoteStore for Unresponsive {
        async fn list_lists(&self, _owner: &UserId) -> RemoteResult<Vec<ShoppingList>> {
            std::future::pending().await
        }
        async fn create_list(
            &self,
            _owner: &UserId,
            _name: &str,
            _description: Option<&str>,
        ) -> RemoteResult<ShoppingList> {
            std::future::pending().await
        }
        async fn update_list(&self, _id: &EntityId, _patch: &ListPatch) -> RemoteResult<ShoppingList> {
            std::future::pending().await
        }
        async fn delete_list(&self, _id: &EntityId) -> RemoteResult<()> {
            std::future::pending().await
        }
        async fn list_items(&self, _list_id: &EntityId) -> RemoteResult<Vec<Item>> {
            std::future::pending().await
        }
        async fn create_item(
            &self,
            _list_id: &EntityId,
            _name: &str,
            _quantity: u32,
        ) -> RemoteResult<Item> {
            std::future::pending().await
        }
        async fn update_item(&self, _id: &EntityId, _patch: &ItemPatch) -> RemoteResult<Item> {
            std::future::pending().await
        }
        async fn toggle_item(&self, _id: &EntityId, _completed: bool) -> RemoteResult<Item> {
            std::future::pending().await
        }
        async fn delete_item(&self, _id: &EntityId) -> RemoteResult<()> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_maps_to_transport_error() {
        let store = TimeoutStore::new(Unresponsive, Duration::from_secs(5));
        let err = store
            .list_items(&EntityId::new("list-1"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, RemoteErrorKind::Transport);
        assert!(err.message.contains("list_items"));
    }

    #[tokio::test]
    async fn test_timeout_passes_through_results() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        let user = UserId::new("alice");
        let store = TimeoutStore::new(backend.client(user.clone()), Duration::from_secs(5));

        let list = store.create_list(&user, "Groceries", None).await.unwrap();
        let lists = store.list_lists(&user).await.unwrap();
        assert_eq!(lists.len(), 1);
        assert_eq!(lists[0].id, list.id);
    }
}
