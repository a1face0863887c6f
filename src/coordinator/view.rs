use std::sync::{PoisonError, RwLock};

use dashmap::DashMap;
use serde_json::Value;

use crate::model::*;

/// Optimistic local copy of the item list. Everything the screen shows is read
/// from here; the coordinator writes here before the backend confirms.
pub struct LocalView {
    items: DashMap<ItemId, Fields>,
    order: RwLock<Vec<ItemId>>,
}

impl Default for LocalView {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalView {
    pub fn new() -> Self {
        Self {
            items: DashMap::new(),
            order: RwLock::new(Vec::new()),
        }
    }

    // ── Whole-list ───────────────────────────────────────────

    /// Replace the list with a fresh server snapshot.
    pub fn load(&self, records: Vec<ItemRecord>) {
        let mut order = self.order.write().unwrap_or_else(PoisonError::into_inner);
        self.items.clear();
        order.clear();
        for record in records {
            order.push(record.id);
            self.items.insert(record.id, record.fields);
        }
    }

    pub fn order(&self) -> Vec<ItemId> {
        self.order
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    // ── Single item ──────────────────────────────────────────

    pub fn contains(&self, id: ItemId) -> bool {
        self.items.contains_key(&id)
    }

    pub fn get(&self, id: ItemId) -> Option<Fields> {
        self.items.get(&id).map(|e| e.value().clone())
    }

    pub fn field(&self, id: ItemId, name: &str) -> Option<Value> {
        self.items.get(&id).and_then(|e| e.value().get(name).cloned())
    }

    pub fn owner(&self, id: ItemId) -> Option<EntityId> {
        self.items
            .get(&id)
            .and_then(|e| e.value().get(FIELD_OWNER).and_then(owner_from_value))
    }

    pub fn schedule(&self, id: ItemId) -> Option<ScheduleState> {
        self.items.get(&id).map(|e| ScheduleState::from_fields(e.value()))
    }

    /// Returns false if the item is not in the view.
    pub fn set_field(&self, id: ItemId, name: &str, value: Value) -> bool {
        match self.items.get_mut(&id) {
            Some(mut item) => {
                item.insert(name.to_string(), value);
                true
            }
            None => false,
        }
    }

    pub fn apply_fields(&self, id: ItemId, fields: &Fields) -> bool {
        match self.items.get_mut(&id) {
            Some(mut item) => {
                for (key, value) in fields {
                    item.insert(key.clone(), value.clone());
                }
                true
            }
            None => false,
        }
    }

    pub fn apply_schedule(&self, id: ItemId, state: &ScheduleState) -> bool {
        self.apply_fields(id, &state.to_fields())
    }

    pub fn schedule_snapshot(&self, id: ItemId) -> Option<ScheduleSnapshot> {
        self.items.get(&id).map(|e| ScheduleSnapshot::capture(e.value()))
    }

    /// Put the schedule fields back exactly as captured.
    pub fn restore_schedule(&self, id: ItemId, snapshot: &ScheduleSnapshot) -> bool {
        match self.items.get_mut(&id) {
            Some(mut item) => {
                snapshot.restore(&mut item);
                true
            }
            None => false,
        }
    }

    /// Append a newly created item to the end of the list.
    pub fn insert(&self, id: ItemId, fields: Fields) {
        let mut order = self.order.write().unwrap_or_else(PoisonError::into_inner);
        if self.items.insert(id, fields).is_none() {
            order.push(id);
        }
    }

    pub fn remove(&self, id: ItemId) -> Option<Fields> {
        let mut order = self.order.write().unwrap_or_else(PoisonError::into_inner);
        order.retain(|i| *i != id);
        self.items.remove(&id).map(|(_, fields)| fields)
    }
}
