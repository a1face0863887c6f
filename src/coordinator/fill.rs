use std::sync::{Mutex, PoisonError};

use serde_json::Value;
use tracing::debug;

use crate::model::*;

/// One fill gesture: copy `field = value` from `source_id` onto `target_ids`.
#[derive(Debug, Clone, PartialEq)]
pub struct FillOperation {
    pub source_id: ItemId,
    pub field: String,
    pub value: Value,
    /// Ordered as in the item list.
    pub target_ids: Vec<ItemId>,
}

/// The contiguous slice of `order` between `source` and `pointer`, both ends
/// inclusive, without the source itself. Empty when the pointer is off any
/// row, on the source row, or either id is not in the list.
pub fn fill_targets(order: &[ItemId], source: ItemId, pointer: Option<ItemId>) -> Vec<ItemId> {
    let Some(pointer) = pointer else {
        return Vec::new();
    };
    if pointer == source {
        return Vec::new();
    }
    let (Some(src), Some(dst)) = (
        order.iter().position(|id| *id == source),
        order.iter().position(|id| *id == pointer),
    ) else {
        return Vec::new();
    };
    let (lo, hi) = (src.min(dst), src.max(dst));
    order[lo..=hi].iter().copied().filter(|id| *id != source).collect()
}

/// Tracks the single active fill gesture.
#[derive(Default)]
pub struct RangePropagator {
    active: Mutex<Option<FillOperation>>,
}

impl RangePropagator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a gesture. Any earlier gesture that never committed is discarded.
    pub fn begin(&self, source_id: ItemId, field: &str, value: Value) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(stale) = active.take() {
            debug!("discarding uncommitted fill from item {}", stale.source_id);
        }
        *active = Some(FillOperation {
            source_id,
            field: field.to_string(),
            value,
            target_ids: Vec::new(),
        });
    }

    /// Recompute targets for the row under the pointer. Returns the new target set,
    /// or `None` when no gesture is active.
    pub fn update(&self, order: &[ItemId], pointer: Option<ItemId>) -> Option<Vec<ItemId>> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        let op = active.as_mut()?;
        op.target_ids = fill_targets(order, op.source_id, pointer);
        Some(op.target_ids.clone())
    }

    /// End the gesture and hand back its operation. Consumed exactly once.
    pub fn take(&self) -> Option<FillOperation> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn current(&self) -> Option<FillOperation> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_active(&self) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}
