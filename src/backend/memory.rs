use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;

use crate::model::*;

use super::{Backend, BackendError, BackendOp};

/// In-process backend with call accounting, injectable latency and failures.
pub struct MemoryBackend {
    items: DashMap<ItemId, Fields>,
    allocations: DashMap<EntityId, Vec<AllocationRecord>>,
    next_id: AtomicI64,
    latency_ms: AtomicU64,
    failures: DashMap<BackendOp, String>,
    calls: DashMap<BackendOp, usize>,
    fetches_by_entity: DashMap<EntityId, usize>,
    update_log: Mutex<Vec<ItemUpdate>>,
    batch_log: Mutex<Vec<Vec<ItemUpdate>>>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            items: DashMap::new(),
            allocations: DashMap::new(),
            next_id: AtomicI64::new(1),
            latency_ms: AtomicU64::new(0),
            failures: DashMap::new(),
            calls: DashMap::new(),
            fetches_by_entity: DashMap::new(),
            update_log: Mutex::new(Vec::new()),
            batch_log: Mutex::new(Vec::new()),
        }
    }

    // ── Seeding ──────────────────────────────────────────────

    pub fn insert_item(&self, id: ItemId, fields: Fields) {
        self.items.insert(id, fields);
        self.next_id.fetch_max(id + 1, Ordering::SeqCst);
    }

    pub fn item(&self, id: ItemId) -> Option<Fields> {
        self.items.get(&id).map(|e| e.value().clone())
    }

    pub fn set_allocations(&self, entity_id: EntityId, records: Vec<AllocationRecord>) {
        self.allocations.insert(entity_id, records);
    }

    // ── Fault injection ──────────────────────────────────────

    /// Every call simulates this much round-trip time.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms.store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Make every call of `op` fail with `message` until cleared.
    pub fn fail(&self, op: BackendOp, message: impl Into<String>) {
        self.failures.insert(op, message.into());
    }

    pub fn recover(&self, op: BackendOp) {
        self.failures.remove(&op);
    }

    // ── Call accounting ──────────────────────────────────────

    pub fn calls(&self, op: BackendOp) -> usize {
        self.calls.get(&op).map(|e| *e.value()).unwrap_or(0)
    }

    pub fn fetch_calls(&self, entity_id: EntityId) -> usize {
        self.fetches_by_entity
            .get(&entity_id)
            .map(|e| *e.value())
            .unwrap_or(0)
    }

    /// Every single-item update received, in arrival order.
    pub fn updates(&self) -> Vec<ItemUpdate> {
        self.update_log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Every batch received, in arrival order.
    pub fn batches(&self) -> Vec<Vec<ItemUpdate>> {
        self.batch_log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn enter(&self, op: BackendOp) -> Result<(), String> {
        *self.calls.entry(op).or_insert(0) += 1;
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        match self.failures.get(&op) {
            Some(message) => Err(message.value().clone()),
            None => Ok(()),
        }
    }

    fn merge(&self, id: ItemId, fields: &Fields) -> bool {
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
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn fetch_allocations(
        &self,
        entity_id: EntityId,
        range_start: NaiveDate,
        range_end: NaiveDate,
        include_overtime: bool,
    ) -> Result<Vec<AllocationRecord>, BackendError> {
        *self.fetches_by_entity.entry(entity_id).or_insert(0) += 1;
        // Answer reflects the data as of arrival, not as of reply.
        let range = DateRange::new(range_start, range_end);
        let records: Vec<AllocationRecord> = self
            .allocations
            .get(&entity_id)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| range.contains(r.date))
                    .filter(|r| include_overtime || !r.is_overtime)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        self.enter(BackendOp::FetchAllocations)
            .await
            .map_err(BackendError::Transport)?;
        Ok(records)
    }

    async fn update_item(&self, id: ItemId, fields: Fields) -> Result<(), BackendError> {
        self.update_log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ItemUpdate { id, fields: fields.clone() });
        self.enter(BackendOp::UpdateItem)
            .await
            .map_err(BackendError::Rejected)?;
        if self.merge(id, &fields) {
            Ok(())
        } else {
            Err(BackendError::NotFound(id))
        }
    }

    async fn batch_update_items(&self, updates: Vec<ItemUpdate>) -> Result<BatchResult, BackendError> {
        self.batch_log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(updates.clone());
        self.enter(BackendOp::BatchUpdateItems)
            .await
            .map_err(BackendError::Rejected)?;
        let mut result = BatchResult::default();
        for update in &updates {
            if self.merge(update.id, &update.fields) {
                result.success_count += 1;
            } else {
                result.fail_count += 1;
                result.errors.push(format!("item {}: not found", update.id));
            }
        }
        Ok(result)
    }

    async fn create_item(&self, fields: Fields) -> Result<ItemId, BackendError> {
        self.enter(BackendOp::CreateItem)
            .await
            .map_err(BackendError::Rejected)?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.items.insert(id, fields);
        Ok(id)
    }

    async fn delete_item(&self, id: ItemId) -> Result<(), BackendError> {
        self.enter(BackendOp::DeleteItem)
            .await
            .map_err(BackendError::Rejected)?;
        self.items
            .remove(&id)
            .map(|_| ())
            .ok_or(BackendError::NotFound(id))
    }
}
