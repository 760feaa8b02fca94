//! SQLite-backed authoritative store
//!
//! `SqliteBackend` plays the server: it owns the database, assigns ids,
//! stamps timestamps with its own clock, and publishes a change event for
//! every row a committed write touches. `SqliteClient` is a session-bound
//! handle that checks ownership against the authenticated user.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::broadcast;
use tracing::debug;

use super::schema::{init_schema, needs_init};
use super::{ChangeFeed, ChangeKind, RawChangeEvent, RemoteStore, Table};
use crate::error::{RemoteError, RemoteResult};
use crate::models::{EntityId, Item, ItemPatch, ListPatch, ShoppingList, UserId};

/// Capacity of the change feed before slow subscribers start lagging
const FEED_CAPACITY: usize = 256;

const LIST_COLUMNS: &str = "id, user_id, name, description, created_at, updated_at";
const ITEM_COLUMNS: &str = "id, list_id, name, quantity, completed, created_at, updated_at";

struct Shared {
    conn: Mutex<Connection>,
    feed: broadcast::Sender<RawChangeEvent>,
}

/// The store itself, shared by every client session
#[derive(Clone)]
pub struct SqliteBackend {
    shared: Arc<Shared>,
}

impl SqliteBackend {
    /// Open or create the database at `path`
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database at {:?}", path))?;
        Self::from_connection(conn)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        if needs_init(&conn) {
            init_schema(&conn).context("Failed to initialize SQLite schema")?;
        }

        let (feed, _) = broadcast::channel(FEED_CAPACITY);
        Ok(Self {
            shared: Arc::new(Shared {
                conn: Mutex::new(conn),
                feed,
            }),
        })
    }

    /// Open a session bound to an authenticated user
    pub fn client(&self, user: UserId) -> SqliteClient {
        SqliteClient {
            backend: self.clone(),
            user,
        }
    }

    fn lock(&self) -> RemoteResult<MutexGuard<'_, Connection>> {
        self.shared
            .conn
            .lock()
            .map_err(|_| RemoteError::transport("database connection poisoned"))
    }

    fn publish(&self, events: Vec<RawChangeEvent>) {
        for event in events {
            debug!(
                "change {:?} {:?} {} (list {})",
                event.table, event.kind, event.row_id, event.list_id
            );
            // No subscribers is not an error
            let _ = self.shared.feed.send(event);
        }
    }
}

impl ChangeFeed for SqliteBackend {
    fn changes(&self) -> broadcast::Receiver<RawChangeEvent> {
        self.shared.feed.subscribe()
    }
}

/// A client session against `SqliteBackend`
#[derive(Clone)]
pub struct SqliteClient {
    backend: SqliteBackend,
    user: UserId,
}

impl SqliteClient {
    /// The authenticated user of this session
    pub fn user(&self) -> &UserId {
        &self.user
    }

    /// The backend this session talks to
    pub fn backend(&self) -> &SqliteBackend {
        &self.backend
    }

    fn ensure_caller(&self, owner: &UserId, what: &str) -> RemoteResult<()> {
        if owner != &self.user {
            return Err(RemoteError::unauthorized(format!(
                "{} is not accessible to user {}",
                what, self.user
            )));
        }
        Ok(())
    }

    /// Load a list row and check the caller owns it
    fn owned_list(&self, conn: &Connection, id: &EntityId) -> RemoteResult<ShoppingList> {
        let list = read_list(conn, id)?
            .ok_or_else(|| RemoteError::not_found(format!("list {}", id)))?;
        self.ensure_caller(&list.user_id, &format!("list {}", id))?;
        Ok(list)
    }

    /// Load an item row and check the caller owns its list
    fn owned_item(&self, conn: &Connection, id: &EntityId) -> RemoteResult<(Item, UserId)> {
        let item = read_item(conn, id)?
            .ok_or_else(|| RemoteError::not_found(format!("item {}", id)))?;
        let owner = list_owner(conn, &item.list_id)?;
        self.ensure_caller(&owner, &format!("item {}", id))?;
        Ok((item, owner))
    }

    fn write_item(
        &self,
        id: &EntityId,
        patch: &ItemPatch,
    ) -> RemoteResult<(Item, RawChangeEvent)> {
        let conn = self.backend.lock()?;
        let (mut item, owner) = self.owned_item(&conn, id)?;

        item.apply(patch);
        item.updated_at = server_clock(item.updated_at);

        conn.execute(
            "UPDATE shopping_list_items SET name = ?, quantity = ?, completed = ?, updated_at = ? WHERE id = ?",
            params![
                item.name,
                item.quantity,
                item.completed,
                item.updated_at.timestamp_millis(),
                item.id.as_str()
            ],
        )?;

        let event = item_event(&item, owner, ChangeKind::Update);
        Ok((item, event))
    }
}

#[async_trait]
impl RemoteStore for SqliteClient {
    async fn list_lists(&self, owner: &UserId) -> RemoteResult<Vec<ShoppingList>> {
        self.ensure_caller(owner, &format!("lists of {}", owner))?;

        let conn = self.backend.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM shopping_lists WHERE user_id = ? ORDER BY updated_at DESC, rowid DESC",
            LIST_COLUMNS
        ))?;
        let rows = stmt.query_map(params![owner.as_str()], list_from_row)?;

        let mut lists = Vec::new();
        for row in rows {
            lists.push(row?);
        }
        Ok(lists)
    }

    async fn create_list(
        &self,
        owner: &UserId,
        name: &str,
        description: Option<&str>,
    ) -> RemoteResult<ShoppingList> {
        self.ensure_caller(owner, &format!("lists of {}", owner))?;

        let now = now_millis();
        let list = ShoppingList {
            id: EntityId::generate(),
            user_id: owner.clone(),
            name: name.to_string(),
            description: description.map(str::to_string),
            created_at: now,
            updated_at: now,
            items: Vec::new(),
        };

        {
            let conn = self.backend.lock()?;
            conn.execute(
                "INSERT INTO shopping_lists (id, user_id, name, description, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
                params![
                    list.id.as_str(),
                    list.user_id.as_str(),
                    list.name,
                    list.description,
                    list.created_at.timestamp_millis(),
                    list.updated_at.timestamp_millis()
                ],
            )?;
        }

        self.backend
            .publish(vec![list_event(&list, ChangeKind::Insert)]);
        Ok(list)
    }

    async fn update_list(&self, id: &EntityId, patch: &ListPatch) -> RemoteResult<ShoppingList> {
        let list = {
            let conn = self.backend.lock()?;
            let mut list = self.owned_list(&conn, id)?;

            list.apply(patch);
            list.updated_at = server_clock(list.updated_at);

            conn.execute(
                "UPDATE shopping_lists SET name = ?, description = ?, updated_at = ? WHERE id = ?",
                params![
                    list.name,
                    list.description,
                    list.updated_at.timestamp_millis(),
                    list.id.as_str()
                ],
            )?;
            list
        };

        self.backend
            .publish(vec![list_event(&list, ChangeKind::Update)]);
        Ok(list)
    }

    async fn delete_list(&self, id: &EntityId) -> RemoteResult<()> {
        let events = {
            let mut conn = self.backend.lock()?;
            let list = self.owned_list(&conn, id)?;

            let tx = conn.transaction()?;
            let item_ids: Vec<String> = {
                let mut stmt =
                    tx.prepare("SELECT id FROM shopping_list_items WHERE list_id = ?")?;
                let rows = stmt.query_map(params![id.as_str()], |row| row.get(0))?;
                rows.collect::<rusqlite::Result<_>>()?
            };
            tx.execute("DELETE FROM shopping_lists WHERE id = ?", params![id.as_str()])?;
            tx.commit()?;

            // Cascaded item deletes are reported like any other row change
            let mut events = vec![list_event(&list, ChangeKind::Delete)];
            events.extend(item_ids.into_iter().map(|item_id| RawChangeEvent {
                table: Table::Items,
                kind: ChangeKind::Delete,
                row_id: EntityId::new(item_id),
                list_id: list.id.clone(),
                owner: list.user_id.clone(),
            }));
            events
        };

        self.backend.publish(events);
        Ok(())
    }

    async fn list_items(&self, list_id: &EntityId) -> RemoteResult<Vec<Item>> {
        let conn = self.backend.lock()?;
        self.owned_list(&conn, list_id)?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM shopping_list_items WHERE list_id = ? ORDER BY created_at ASC, rowid ASC",
            ITEM_COLUMNS
        ))?;
        let rows = stmt.query_map(params![list_id.as_str()], item_from_row)?;

        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }
        Ok(items)
    }

    async fn create_item(
        &self,
        list_id: &EntityId,
        name: &str,
        quantity: u32,
    ) -> RemoteResult<Item> {
        let (item, owner) = {
            let conn = self.backend.lock()?;
            let list = self.owned_list(&conn, list_id)?;

            let now = now_millis();
            let item = Item {
                id: EntityId::generate(),
                list_id: list.id.clone(),
                name: name.to_string(),
                quantity,
                completed: false,
                created_at: now,
                updated_at: now,
            };

            conn.execute(
                "INSERT INTO shopping_list_items (id, list_id, name, quantity, completed, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
                params![
                    item.id.as_str(),
                    item.list_id.as_str(),
                    item.name,
                    item.quantity,
                    item.completed,
                    item.created_at.timestamp_millis(),
                    item.updated_at.timestamp_millis()
                ],
            )?;
            (item, list.user_id)
        };

        self.backend
            .publish(vec![item_event(&item, owner, ChangeKind::Insert)]);
        Ok(item)
    }

    async fn update_item(&self, id: &EntityId, patch: &ItemPatch) -> RemoteResult<Item> {
        let (item, event) = self.write_item(id, patch)?;
        self.backend.publish(vec![event]);
        Ok(item)
    }

    async fn toggle_item(&self, id: &EntityId, completed: bool) -> RemoteResult<Item> {
        let (item, event) = self.write_item(id, &ItemPatch::completed(completed))?;
        self.backend.publish(vec![event]);
        Ok(item)
    }

    async fn delete_item(&self, id: &EntityId) -> RemoteResult<()> {
        let event = {
            let conn = self.backend.lock()?;
            let (item, owner) = self.owned_item(&conn, id)?;
            conn.execute(
                "DELETE FROM shopping_list_items WHERE id = ?",
                params![id.as_str()],
            )?;
            item_event(&item, owner, ChangeKind::Delete)
        };

        self.backend.publish(vec![event]);
        Ok(())
    }
}

/// Current time at the precision rows are stored with
fn now_millis() -> DateTime<Utc> {
    from_millis(Utc::now().timestamp_millis())
}

/// Server timestamp for a write, never earlier than the previous one
fn server_clock(previous: DateTime<Utc>) -> DateTime<Utc> {
    now_millis().max(previous)
}

fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

fn list_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ShoppingList> {
    Ok(ShoppingList {
        id: EntityId::new(row.get::<_, String>(0)?),
        user_id: UserId::new(row.get::<_, String>(1)?),
        name: row.get(2)?,
        description: row.get(3)?,
        created_at: from_millis(row.get(4)?),
        updated_at: from_millis(row.get(5)?),
        items: Vec::new(),
    })
}

fn item_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Item> {
    Ok(Item {
        id: EntityId::new(row.get::<_, String>(0)?),
        list_id: EntityId::new(row.get::<_, String>(1)?),
        name: row.get(2)?,
        quantity: row.get(3)?,
        completed: row.get(4)?,
        created_at: from_millis(row.get(5)?),
        updated_at: from_millis(row.get(6)?),
    })
}

fn read_list(conn: &Connection, id: &EntityId) -> RemoteResult<Option<ShoppingList>> {
    let list = conn
        .query_row(
            &format!("SELECT {} FROM shopping_lists WHERE id = ?", LIST_COLUMNS),
            params![id.as_str()],
            list_from_row,
        )
        .optional()?;
    Ok(list)
}

fn read_item(conn: &Connection, id: &EntityId) -> RemoteResult<Option<Item>> {
    let item = conn
        .query_row(
            &format!("SELECT {} FROM shopping_list_items WHERE id = ?", ITEM_COLUMNS),
            params![id.as_str()],
            item_from_row,
        )
        .optional()?;
    Ok(item)
}

fn list_owner(conn: &Connection, list_id: &EntityId) -> RemoteResult<UserId> {
    let owner: Option<String> = conn
        .query_row(
            "SELECT user_id FROM shopping_lists WHERE id = ?",
            params![list_id.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    owner
        .map(UserId::new)
        .ok_or_else(|| RemoteError::not_found(format!("list {}", list_id)))
}

fn list_event(list: &ShoppingList, kind: ChangeKind) -> RawChangeEvent {
    RawChangeEvent {
        table: Table::Lists,
        kind,
        row_id: list.id.clone(),
        list_id: list.id.clone(),
        owner: list.user_id.clone(),
    }
}

fn item_event(item: &Item, owner: UserId, kind: ChangeKind) -> RawChangeEvent {
    RawChangeEvent {
        table: Table::Items,
        kind,
        row_id: item.id.clone(),
        list_id: item.list_id.clone(),
        owner,
    }
}
