//! Basket Core Library
//!
//! This crate provides the core functionality for Basket, a multi-user
//! shopping-list manager with optimistic local state and live refresh.
//!
//! # Architecture
//!
//! - **Remote store**: Authoritative lists and items behind the `RemoteStore`
//!   trait. The bundled backend is SQLite; it also publishes row-level
//!   change events.
//! - **Reconciler**: Local copy of the user's data. Mutations apply
//!   immediately and are confirmed or rolled back when the store answers.
//! - **Notifications**: Scoped change signals that trigger re-fetches.
//!
//! # Quick Start
//!
//! ```text
//! let backend = SqliteBackend::open(&config.database_path())?;
//! let reconciler = Reconciler::new(Arc::new(backend.client(user.clone())), user);
//! reconciler.load().await?;
//!
//! let list = reconciler.create_list("Groceries", None).await?;
//! let milk = reconciler.create_item(&list.id, "Milk", 2).await?;
//! reconciler.toggle_item(&milk.id).await?;
//! ```
//!
//! # Modules
//!
//! - `reconciler`: Optimistic local state (main entry point)
//! - `remote`: Remote store contract, SQLite backend, request timeouts
//! - `notify`: Change-notification subscriptions
//! - `live`: Subscription-driven refresh for an open view
//! - `models`: Lists, items, patches, progress
//! - `config`: Application configuration

pub mod config;
pub mod error;
pub mod live;
pub mod models;
pub mod notify;
pub mod reconciler;
pub mod remote;

pub use config::Config;
pub use error::{
    ReconcileError, ReconcileResult, RemoteError, RemoteErrorKind, RemoteResult, ValidationError,
};
pub use live::LiveSync;
pub use models::{EntityId, Item, ItemPatch, ListPatch, Progress, ShoppingList, UserId};
pub use notify::{Scope, SettleDelays, Subscriber, Subscription};
pub use reconciler::{EntityState, Reconciler, ReconcilerEvent};
pub use remote::{
    ChangeFeed, ChangeKind, RawChangeEvent, RemoteStore, SqliteBackend, SqliteClient, Table,
    TimeoutStore, SCHEMA_VERSION,
};
