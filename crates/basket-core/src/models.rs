//! Data models for Basket
//!
//! Defines the records exchanged with the remote store: shopping lists,
//! their items, partial-field patches, and list progress.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

/// Prefix that marks a client-side temporary identifier
const TEMPORARY_PREFIX: &str = "tmp-";

/// Opaque identifier of an authenticated user
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque identifier of a list or an item
///
/// Server-assigned ids are UUIDs. Ids minted by the client for entities
/// whose create call is still in flight carry a `tmp-` prefix, so the two
/// can never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mint a fresh server-side identifier
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Mint a fresh client-side temporary identifier
    pub fn temporary() -> Self {
        Self(format!("{}{}", TEMPORARY_PREFIX, Uuid::new_v4().simple()))
    }

    /// Whether this id was minted locally and never confirmed by the server
    pub fn is_temporary(&self) -> bool {
        self.0.starts_with(TEMPORARY_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A named, user-owned shopping list
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShoppingList {
    /// Unique identifier
    pub id: EntityId,
    /// Owning user
    pub user_id: UserId,
    /// Display name (never blank)
    pub name: String,
    /// Optional description
    pub description: Option<String>,
    /// When this list was created
    pub created_at: DateTime<Utc>,
    /// When this list was last updated (server clock)
    pub updated_at: DateTime<Utc>,
    /// Items in creation order, oldest first
    #[serde(default)]
    pub items: Vec<Item>,
}

impl ShoppingList {
    /// Completion progress over the list's items
    pub fn progress(&self) -> Progress {
        Progress::of(&self.items)
    }

    /// Apply a partial update to the local copy
    pub fn apply(&mut self, patch: &ListPatch) {
        if let Some(ref name) = patch.name {
            self.name = name.clone();
        }
        if let Some(ref description) = patch.description {
            self.description = description.clone();
        }
    }
}

/// A named, quantified, completable entry of a list
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Item {
    /// Unique identifier
    pub id: EntityId,
    /// Parent list
    pub list_id: EntityId,
    /// Display name (never blank)
    pub name: String,
    /// How many to buy, at least 1
    pub quantity: u32,
    /// Whether the item has been picked up
    pub completed: bool,
    /// When this item was created
    pub created_at: DateTime<Utc>,
    /// When this item was last updated (server clock)
    pub updated_at: DateTime<Utc>,
}

impl Item {
    /// Apply a partial update to the local copy
    pub fn apply(&mut self, patch: &ItemPatch) {
        if let Some(ref name) = patch.name {
            self.name = name.clone();
        }
        if let Some(quantity) = patch.quantity {
            self.quantity = quantity;
        }
        if let Some(completed) = patch.completed {
            self.completed = completed;
        }
    }
}

/// Partial update of a list
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// `Some(None)` clears the description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<Option<String>>,
}

impl ListPatch {
    pub fn rename(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.description.is_none()
    }

    /// Check field constraints and normalize the name
    pub fn validated(mut self) -> Result<Self, ValidationError> {
        if let Some(name) = self.name.take() {
            self.name = Some(validate_name("name", &name)?);
        }
        Ok(self)
    }
}

/// Partial update of an item
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
}

impl ItemPatch {
    pub fn completed(completed: bool) -> Self {
        Self {
            completed: Some(completed),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.quantity.is_none() && self.completed.is_none()
    }

    /// Check field constraints and normalize the name
    pub fn validated(mut self) -> Result<Self, ValidationError> {
        if let Some(name) = self.name.take() {
            self.name = Some(validate_name("name", &name)?);
        }
        if let Some(quantity) = self.quantity {
            validate_quantity(quantity)?;
        }
        Ok(self)
    }
}

/// Completion progress of a list
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

impl Progress {
    pub fn of(items: &[Item]) -> Self {
        Self {
            completed: items.iter().filter(|i| i.completed).count(),
            total: items.len(),
        }
    }

    /// Whole percentage, rounded half up; an empty list is 0%
    pub fn percent(&self) -> u32 {
        if self.total == 0 {
            return 0;
        }
        ((self.completed as f64 / self.total as f64) * 100.0).round() as u32
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} ({}%)", self.completed, self.total, self.percent())
    }
}

/// Trim a name and reject it if nothing is left
pub fn validate_name(field: &'static str, name: &str) -> Result<String, ValidationError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyName { field });
    }
    Ok(trimmed.to_string())
}

/// Reject quantities below 1
pub fn validate_quantity(quantity: u32) -> Result<u32, ValidationError> {
    if quantity < 1 {
        return Err(ValidationError::InvalidQuantity(quantity));
    }
    Ok(quantity)
}
