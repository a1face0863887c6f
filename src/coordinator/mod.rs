mod availability;
mod cache;
mod debounce;
mod drag;
mod error;
mod fill;
mod view;

pub use availability::{
    assess, assess_all, classify, load_level, workday_status, CapacityStatus, CapacitySummary,
    DayAvailability, DayLoad, LoadLevel, WorkdayStatus,
};
pub use cache::{CapacityCache, Records};
pub use debounce::{EditDebouncer, EditKey, EditSink, PendingEdit};
pub use drag::{DragMutation, DragOutcome, DragPhase, DragReconciler};
pub use error::CoordinatorError;
pub use fill::{fill_targets, FillOperation, RangePropagator};
pub use view::LocalView;

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::backend::{Backend, BackendOp};
use crate::config::CoordinatorConfig;
use crate::limits::*;
use crate::model::*;
use crate::notify::{NotifyHub, Signal};
use crate::observability::{self, DRAGS_TOTAL, EDITS_PERSISTED_TOTAL, FILL_TARGETS};

/// State shared with background timers and fetches.
struct Inner {
    backend: Arc<dyn Backend>,
    cache: CapacityCache,
    view: LocalView,
    notify: Arc<NotifyHub>,
    config: CoordinatorConfig,
}

impl Inner {
    fn invalidate_entities(&self, entities: impl IntoIterator<Item = EntityId>) {
        for entity_id in entities {
            self.cache.invalidate(Some(entity_id));
            self.notify.send(Signal::CacheInvalidated {
                entity_id: Some(entity_id),
            });
        }
    }

    fn publish_summary(self: &Arc<Self>, entity_id: EntityId, range: DateRange) {
        let inner = self.clone();
        tokio::spawn(async move {
            let records = inner.cache.request(entity_id, range).await;
            let summary = CapacitySummary::build(entity_id, range, &records, &inner.config.work_hours);
            inner.notify.send(Signal::CapacitySummary {
                summary,
                ttl: inner.config.summary_ttl,
            });
        });
    }
}

#[async_trait]
impl EditSink for Inner {
    async fn persist(&self, edit: PendingEdit) {
        let mut fields = Fields::new();
        fields.insert(edit.field.clone(), edit.value.clone());
        let result = observability::timed(
            BackendOp::UpdateItem,
            self.backend.update_item(edit.item_id, fields),
        )
        .await;
        match result {
            Ok(()) => {
                metrics::counter!(EDITS_PERSISTED_TOTAL, "status" => "ok").increment(1);
                debug!("persisted {}.{}", edit.item_id, edit.field);
            }
            Err(e) => {
                metrics::counter!(EDITS_PERSISTED_TOTAL, "status" => "error").increment(1);
                // The view keeps the typed value so the user can retry or fix it.
                warn!("persisting {}.{} failed: {e}", edit.item_id, edit.field);
                self.notify.send(Signal::EditFailed {
                    item_id: edit.item_id,
                    field: edit.field.clone(),
                    value: edit.value.clone(),
                    error: e.to_string(),
                });
            }
        }
        if affects_availability(&edit.field) {
            self.invalidate_entities(edit.touched.iter().copied());
        }
    }
}

/// Workload-aware scheduling coordinator.
///
/// Owns the optimistic item view, the capacity cache, and the three mutation
/// paths (debounced field edits, fill gestures, drag/resize). Must be used from
/// within a Tokio runtime: debounce timers and capacity fetches run as tasks.
pub struct Coordinator {
    inner: Arc<Inner>,
    edits: EditDebouncer<Inner>,
    fill: RangePropagator,
    drags: DragReconciler,
}

impl Coordinator {
    pub fn new(backend: Arc<dyn Backend>, config: CoordinatorConfig) -> Self {
        let notify = Arc::new(NotifyHub::new(config.notify_capacity));
        let inner = Arc::new(Inner {
            cache: CapacityCache::new(backend.clone(), config.include_overtime),
            backend,
            view: LocalView::new(),
            notify,
            config,
        });
        let edits = EditDebouncer::new(inner.clone(), inner.config.debounce);
        Self {
            inner,
            edits,
            fill: RangePropagator::new(),
            drags: DragReconciler::new(),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }

    pub fn notify(&self) -> &Arc<NotifyHub> {
        &self.inner.notify
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Signal> {
        self.inner.notify.subscribe()
    }

    // ── Local view ───────────────────────────────────────────

    /// Replace the item list with a server snapshot.
    pub fn load_items(&self, items: Vec<ItemRecord>) {
        self.inner.view.load(items);
    }

    pub fn view(&self) -> &LocalView {
        &self.inner.view
    }

    pub fn item(&self, id: ItemId) -> Option<Fields> {
        self.inner.view.get(id)
    }

    pub fn field(&self, id: ItemId, name: &str) -> Option<Value> {
        self.inner.view.field(id, name)
    }

    pub fn order(&self) -> Vec<ItemId> {
        self.inner.view.order()
    }

    // ── Capacity reads ───────────────────────────────────────

    /// Raw allocation records for an entity; empty when unknown or on failure.
    pub async fn request_capacity(&self, entity_id: EntityId, range: DateRange) -> Records {
        self.inner.cache.request(entity_id, range).await
    }

    /// Per-date status for `entity_id`, ignoring `exclude`'s own hours.
    pub async fn request_availability(
        &self,
        entity_id: EntityId,
        range: DateRange,
        exclude: Option<ItemId>,
    ) -> Vec<DayAvailability> {
        let records = self.inner.cache.request(entity_id, range).await;
        assess_all(&records, exclude)
    }

    pub async fn workday_status(
        &self,
        entity_id: EntityId,
        range: DateRange,
        exclude: Option<ItemId>,
    ) -> WorkdayStatus {
        let records = self.inner.cache.request(entity_id, range).await;
        workday_status(&records, exclude)
    }

    pub async fn capacity_summary(&self, entity_id: EntityId, range: DateRange) -> CapacitySummary {
        let records = self.inner.cache.request(entity_id, range).await;
        CapacitySummary::build(entity_id, range, &records, &self.inner.config.work_hours)
    }

    pub fn cached(&self, entity_id: EntityId) -> Option<(DateRange, Records)> {
        self.inner.cache.cached(entity_id)
    }

    pub fn is_loading(&self, entity_id: EntityId) -> bool {
        self.inner.cache.is_loading(entity_id)
    }

    /// Drop cached capacity for one entity, or for all when `None`.
    pub fn invalidate(&self, entity_id: Option<EntityId>) {
        match entity_id {
            Some(id) => self.inner.invalidate_entities([id]),
            None => {
                self.inner.cache.invalidate(None);
                self.inner.notify.send(Signal::CacheInvalidated { entity_id: None });
            }
        }
    }

    // ── Field edits ──────────────────────────────────────────

    /// Show `value` immediately and write it once edits to this field go quiet.
    /// `Value::Null` clears the field.
    pub fn submit_field_edit(&self, item_id: ItemId, field: &str, value: Value) -> Result<(), CoordinatorError> {
        if field.is_empty() {
            return Err(CoordinatorError::InvalidField(field.to_string()));
        }
        let mut touched = BTreeSet::new();
        if affects_availability(field) {
            touched.extend(self.inner.view.owner(item_id));
            if field == FIELD_OWNER {
                touched.extend(owner_from_value(&value));
            }
        }
        if !self.inner.view.set_field(item_id, field, value.clone()) {
            return Err(CoordinatorError::UnknownItem(item_id));
        }
        self.edits.submit(item_id, field, value, touched);
        Ok(())
    }

    pub fn pending_edit(&self, item_id: ItemId, field: &str) -> Option<Value> {
        self.edits.pending_value(item_id, field)
    }

    pub fn pending_edit_count(&self) -> usize {
        self.edits.pending_count()
    }

    /// Write every pending edit now. Returns how many were written.
    pub async fn flush_edits(&self) -> usize {
        self.edits.flush().await
    }

    /// Forget pending edits without writing them. The view keeps the typed values.
    pub fn cancel_pending_edits(&self) -> usize {
        self.edits.cancel_all()
    }

    // ── Fill gestures ────────────────────────────────────────

    pub fn begin_fill(&self, source_id: ItemId, field: &str, value: Value) -> Result<(), CoordinatorError> {
        if field.is_empty() {
            return Err(CoordinatorError::InvalidField(field.to_string()));
        }
        self.fill.begin(source_id, field, value);
        Ok(())
    }

    /// Pointer moved; `None` when it is not over a row. Returns the rows to highlight.
    pub fn update_fill(&self, pointer: Option<ItemId>) -> Vec<ItemId> {
        let order = self.inner.view.order();
        self.fill.update(&order, pointer).unwrap_or_default()
    }

    pub fn active_fill(&self) -> Option<FillOperation> {
        self.fill.current()
    }

    pub fn cancel_fill(&self) -> bool {
        self.fill.take().is_some()
    }

    /// Release the gesture: apply it locally, then write all targets in one batch.
    /// `Ok(None)` when there was nothing to fill. Local values are not rolled back
    /// when the batch fails.
    pub async fn commit_fill(&self) -> Result<Option<BatchResult>, CoordinatorError> {
        let op = self.fill.take().ok_or(CoordinatorError::NoActiveFill)?;
        if op.target_ids.is_empty() {
            return Ok(None);
        }
        if op.target_ids.len() > MAX_FILL_TARGETS {
            return Err(CoordinatorError::LimitExceeded("too many fill targets"));
        }

        let mut touched = BTreeSet::new();
        if affects_availability(&op.field) {
            touched.extend(op.target_ids.iter().filter_map(|id| self.inner.view.owner(*id)));
            if op.field == FIELD_OWNER {
                touched.extend(owner_from_value(&op.value));
            }
        }

        let mut updates = Vec::with_capacity(op.target_ids.len());
        for id in &op.target_ids {
            self.inner.view.set_field(*id, &op.field, op.value.clone());
            let mut fields = Fields::new();
            fields.insert(op.field.clone(), op.value.clone());
            updates.push(ItemUpdate { id: *id, fields });
        }
        metrics::histogram!(FILL_TARGETS).record(updates.len() as f64);

        let result = observability::timed(
            BackendOp::BatchUpdateItems,
            self.inner.backend.batch_update_items(updates),
        )
        .await;
        if !touched.is_empty() {
            self.inner.invalidate_entities(touched);
        }

        match result {
            Ok(summary) => {
                info!(
                    "filled {} from item {}: {} ok, {} failed",
                    op.field, op.source_id, summary.success_count, summary.fail_count
                );
                self.inner.notify.send(Signal::FillApplied {
                    field: op.field,
                    targets: op.target_ids,
                    result: summary.clone(),
                });
                Ok(Some(summary))
            }
            Err(e) => {
                warn!("fill of {} from item {} failed: {e}", op.field, op.source_id);
                self.inner.notify.send(Signal::FillFailed {
                    field: op.field,
                    targets: op.target_ids,
                    error: e.to_string(),
                });
                Err(e.into())
            }
        }
    }

    // ── Drag / resize ────────────────────────────────────────

    /// Snapshot the item's schedule for rollback. Returns the pre-drag schedule.
    pub fn begin_drag(&self, item_id: ItemId) -> Result<ScheduleState, CoordinatorError> {
        let snapshot = self
            .inner
            .view
            .schedule_snapshot(item_id)
            .ok_or(CoordinatorError::UnknownItem(item_id))?;
        self.drags.begin(item_id, snapshot)
    }

    /// Show the gesture's new schedule immediately.
    pub fn propose_drag(&self, item_id: ItemId, proposed: ScheduleState) -> Result<(), CoordinatorError> {
        self.drags.propose(item_id, proposed)?;
        self.inner.view.apply_schedule(item_id, &proposed);
        Ok(())
    }

    /// Resolve a proposed drag with the outcome of its persist call.
    pub fn settle_drag(&self, item_id: ItemId, persisted: Result<(), String>) -> Result<DragOutcome, CoordinatorError> {
        let outcome = self.drags.settle(item_id, persisted)?;
        match &outcome {
            DragOutcome::Committed { previous, committed } => {
                metrics::counter!(DRAGS_TOTAL, "outcome" => "committed").increment(1);
                info!("drag on item {item_id} committed");
                let owners: BTreeSet<EntityId> =
                    previous.owner_id.into_iter().chain(committed.owner_id).collect();
                self.inner.invalidate_entities(owners);
                self.inner.notify.send(Signal::DragCommitted {
                    item_id,
                    state: *committed,
                });
                if self.inner.config.summary_on_commit {
                    if let (Some(owner), Some(range)) = (committed.owner_id, committed.range()) {
                        self.inner.publish_summary(owner, range);
                    }
                }
            }
            DragOutcome::Reverted { restored, snapshot, error } => {
                metrics::counter!(DRAGS_TOTAL, "outcome" => "reverted").increment(1);
                warn!("drag on item {item_id} reverted: {error}");
                self.inner.view.restore_schedule(item_id, snapshot);
                self.inner.notify.send(Signal::DragReverted {
                    item_id,
                    restored: *restored,
                    error: error.clone(),
                });
            }
        }
        Ok(outcome)
    }

    /// Write the proposed schedule and settle the drag with the result.
    /// The proposal is frozen until the write settles; on failure the item is
    /// already back in its pre-drag state when this returns.
    pub async fn persist_drag(&self, item_id: ItemId) -> Result<ScheduleState, CoordinatorError> {
        let proposed = self.drags.start_persist(item_id)?;

        let result = observability::timed(
            BackendOp::UpdateItem,
            self.inner.backend.update_item(item_id, proposed.to_fields()),
        )
        .await;
        match result {
            Ok(()) => {
                self.settle_drag(item_id, Ok(()))?;
                Ok(proposed)
            }
            Err(e) => {
                self.settle_drag(item_id, Err(e.to_string()))?;
                Err(e.into())
            }
        }
    }

    /// Abandon a gesture before its write starts, restoring the snapshot.
    /// A drag whose write is in flight cannot be cancelled.
    pub fn cancel_drag(&self, item_id: ItemId) -> Result<(), CoordinatorError> {
        let mutation = self.drags.cancel(item_id)?;
        if mutation.proposed.is_some() {
            self.inner.view.restore_schedule(item_id, &mutation.snapshot);
        }
        Ok(())
    }

    pub fn drag(&self, item_id: ItemId) -> Option<DragMutation> {
        self.drags.get(item_id)
    }

    // ── Create / delete ──────────────────────────────────────

    pub async fn create_item(&self, fields: Fields) -> Result<ItemId, CoordinatorError> {
        let owner = fields.get(FIELD_OWNER).and_then(owner_from_value);
        let id = observability::timed(BackendOp::CreateItem, self.inner.backend.create_item(fields.clone())).await?;
        self.inner.view.insert(id, fields);
        self.inner.invalidate_entities(owner);
        Ok(id)
    }

    pub async fn delete_item(&self, id: ItemId) -> Result<(), CoordinatorError> {
        let owner = self.inner.view.owner(id);
        observability::timed(BackendOp::DeleteItem, self.inner.backend.delete_item(id)).await?;
        self.inner.view.remove(id);
        self.inner.invalidate_entities(owner);
        Ok(())
    }

    // ── Lifecycle ────────────────────────────────────────────

    /// Write pending edits, drop any fill gesture and the cache.
    pub async fn dispose(self) {
        let flushed = self.edits.flush().await;
        if self.fill.take().is_some() {
            debug!("dropping uncommitted fill on dispose");
        }
        self.inner.cache.invalidate(None);
        info!(
            "coordinator disposed: {flushed} pending edits written, {} drags unresolved",
            self.drags.in_flight()
        );
    }
}
