//! Command handlers

pub mod config;
pub mod item;
pub mod list;
pub mod status;
pub mod watch;

use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use tracing::debug;

use basket_core::{
    Config, EntityId, Item, Reconciler, RemoteStore, ShoppingList, SqliteBackend, TimeoutStore,
    UserId,
};

/// An opened store plus a loaded reconciler for the session user
pub struct Session {
    pub config: Config,
    pub backend: SqliteBackend,
    pub reconciler: Reconciler,
}

impl Session {
    pub async fn open(config: Config, user: Option<String>) -> Result<Self> {
        let user = user.or_else(|| config.user.clone()).ok_or_else(|| {
            anyhow!("No user set. Pass --user, set BASKET_USER, or run `basket config set user <name>`.")
        })?;
        let user = UserId::new(user);

        let backend = SqliteBackend::open(&config.database_path())?;
        let client = backend.client(user.clone());
        let remote: Arc<dyn RemoteStore> = match config.request_timeout() {
            Some(timeout) => Arc::new(TimeoutStore::new(client, timeout)),
            None => Arc::new(client),
        };

        let reconciler = Reconciler::new(remote, user);
        reconciler.load().await.context("Failed to load lists")?;
        debug!("Session opened for {}", reconciler.owner());

        Ok(Self {
            config,
            backend,
            reconciler,
        })
    }
}

/// Find a list by full id or unique id prefix
pub fn parse_list_id(id: &str, reconciler: &Reconciler) -> Result<EntityId> {
    let lists = reconciler.lists();

    // Full id first
    if let Some(exact) = lists.iter().find(|l| l.id.as_str() == id) {
        return Ok(exact.id.clone());
    }

    // Then prefix match
    let matches: Vec<&ShoppingList> = lists
        .iter()
        .filter(|l| l.id.as_str().starts_with(id))
        .collect();

    match matches.len() {
        0 => bail!("No list found matching: {}", id),
        1 => Ok(matches[0].id.clone()),
        _ => {
            eprintln!("Multiple lists match '{}':", id);
            for list in &matches {
                eprintln!("  {} - {}", list.id, list.name);
            }
            bail!("Ambiguous ID. Please provide more characters.");
        }
    }
}

/// Find an item across all lists by full id or unique id prefix
pub fn parse_item_id(id: &str, reconciler: &Reconciler) -> Result<EntityId> {
    let items: Vec<Item> = reconciler
        .lists()
        .into_iter()
        .flat_map(|list| list.items)
        .collect();

    if let Some(exact) = items.iter().find(|i| i.id.as_str() == id) {
        return Ok(exact.id.clone());
    }

    let matches: Vec<&Item> = items
        .iter()
        .filter(|i| i.id.as_str().starts_with(id))
        .collect();

    match matches.len() {
        0 => bail!("No item found matching: {}", id),
        1 => Ok(matches[0].id.clone()),
        _ => {
            eprintln!("Multiple items match '{}':", id);
            for item in &matches {
                eprintln!("  {} - {}", item.id, item.name);
            }
            bail!("Ambiguous ID. Please provide more characters.");
        }
    }
}
