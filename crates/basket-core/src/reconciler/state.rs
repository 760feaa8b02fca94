//! Local state owned by the reconciler

use std::collections::HashMap;

use crate::models::{EntityId, Item, ShoppingList};

use super::collection::{Collection, EntityState};

#[derive(Debug, Default)]
pub struct State {
    pub lists: Collection<ShoppingList>,
    /// Items per loaded list, keyed by the list's current id
    pub items: HashMap<EntityId, Collection<Item>>,
    /// Items of lists whose delete is in flight
    parked: HashMap<EntityId, Collection<Item>>,
    /// Temporary id to server id, for creates that went through
    aliases: HashMap<EntityId, EntityId>,
    pub loaded: bool,
}

impl State {
    pub fn resolve(&self, id: &EntityId) -> EntityId {
        self.aliases.get(id).unwrap_or(id).clone()
    }

    /// Lists with their items attached
    pub fn snapshot(&self) -> Vec<ShoppingList> {
        self.lists
            .values()
            .into_iter()
            .map(|list| self.with_items(list))
            .collect()
    }

    pub fn list(&self, id: &EntityId) -> Option<ShoppingList> {
        self.lists.get(id).cloned().map(|list| self.with_items(list))
    }

    fn with_items(&self, mut list: ShoppingList) -> ShoppingList {
        list.items = self
            .items
            .get(&list.id)
            .map(Collection::values)
            .unwrap_or_default();
        list
    }

    /// List currently holding the item, if any
    pub fn list_of_item(&self, item_id: &EntityId) -> Option<EntityId> {
        self.items
            .iter()
            .find(|(_, items)| items.contains(item_id) || items.is_deleting(item_id))
            .map(|(list_id, _)| list_id.clone())
    }

    pub fn item(&self, id: &EntityId) -> Option<Item> {
        let list_id = self.list_of_item(id)?;
        self.items.get(&list_id)?.get(id).cloned()
    }

    pub fn state_of(&self, id: &EntityId) -> EntityState {
        let id = self.resolve(id);
        if let Some(state) = self.lists.state_of(&id) {
            return state;
        }
        self.items
            .values()
            .find_map(|items| items.state_of(&id))
            .unwrap_or(EntityState::Absent)
    }

    // ==================== Lists ====================

    pub fn insert_pending_list(&mut self, list: ShoppingList) {
        self.items.insert(list.id.clone(), Collection::new());
        self.lists.insert_pending(list);
    }

    pub fn confirm_list_create(&mut self, temp_id: &EntityId, list: ShoppingList) {
        let list_id = list.id.clone();
        self.lists.confirm_create(temp_id, list);
        self.aliases.insert(temp_id.clone(), list_id.clone());

        if let Some(items) = self.items.remove(temp_id) {
            self.items.entry(list_id).or_insert(items);
        }
    }

    pub fn discard_list_create(&mut self, temp_id: &EntityId) {
        self.lists.discard_create(temp_id);
        self.items.remove(temp_id);
    }

    /// Remove a list and set its items aside until the delete settles
    pub fn begin_list_delete(&mut self, id: &EntityId) -> bool {
        if self.lists.begin_delete(id).is_none() {
            return false;
        }
        if let Some(items) = self.items.remove(id) {
            self.parked.insert(id.clone(), items);
        }
        true
    }

    pub fn confirm_list_delete(&mut self, id: &EntityId) {
        self.lists.confirm_delete(id);
        self.parked.remove(id);
    }

    pub fn rollback_list_delete(&mut self, id: &EntityId) {
        self.lists.rollback_delete(id);
        let items = self.parked.remove(id).unwrap_or_default();
        self.items.entry(id.clone()).or_insert(items);
    }

    // ==================== Items ====================

    /// Items of a list, including ones set aside by a pending list delete
    ///
    /// Item transitions settle here so that a list delete that fails later
    /// restores their settled state.
    pub fn item_collection_mut(&mut self, list_id: &EntityId) -> Option<&mut Collection<Item>> {
        match self.items.get_mut(list_id) {
            Some(items) => Some(items),
            None => self.parked.get_mut(list_id),
        }
    }

    pub fn confirm_item_create(&mut self, list_id: &EntityId, temp_id: &EntityId, item: Item) {
        let item_id = item.id.clone();
        if let Some(items) = self.item_collection_mut(list_id) {
            items.confirm_create(temp_id, item);
        }
        self.aliases.insert(temp_id.clone(), item_id);
    }

    // ==================== Refresh ====================

    /// Merge a full snapshot of lists and their items
    pub fn merge_all(
        &mut self,
        lists: Vec<ShoppingList>,
        mut items: HashMap<EntityId, Vec<Item>>,
    ) -> bool {
        let mut changed = self.lists.merge(lists);

        let current: Vec<EntityId> = self.lists.ids().cloned().collect();
        for list_id in &current {
            if let Some(fetched) = items.remove(list_id) {
                changed |= self
                    .items
                    .entry(list_id.clone())
                    .or_default()
                    .merge(fetched);
            }
        }
        self.items.retain(|list_id, _| current.contains(list_id));

        self.loaded = true;
        changed
    }

    /// Merge a snapshot of one list's items; ignored for lists not loaded
    pub fn merge_items(&mut self, list_id: &EntityId, fetched: Vec<Item>) -> bool {
        if !self.lists.contains(list_id) {
            return false;
        }
        self.items
            .entry(list_id.clone())
            .or_default()
            .merge(fetched)
    }
}
