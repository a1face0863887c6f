use std::time::Duration;

use serde_json::Value;
use tokio::sync::broadcast;

use crate::coordinator::CapacitySummary;
use crate::limits::DEFAULT_NOTIFY_CAPACITY;
use crate::model::*;

/// What the surrounding UI should show or refresh.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    /// A debounced field write failed. The local value is kept so the user can fix it.
    EditFailed {
        item_id: ItemId,
        field: String,
        value: Value,
        error: String,
    },
    /// A fill wrote its targets; `result` may still report per-item failures.
    FillApplied {
        field: String,
        targets: Vec<ItemId>,
        result: BatchResult,
    },
    /// The batched fill write failed outright. Optimistic values stay.
    FillFailed {
        field: String,
        targets: Vec<ItemId>,
        error: String,
    },
    DragCommitted {
        item_id: ItemId,
        state: ScheduleState,
    },
    /// The drag persist failed and the item shows `restored` again.
    DragReverted {
        item_id: ItemId,
        restored: ScheduleState,
        error: String,
    },
    /// Transient load overview; the UI should drop it after `ttl`.
    CapacitySummary {
        summary: CapacitySummary,
        ttl: Duration,
    },
    /// Cached capacity for one entity (or all, when `None`) was dropped.
    CacheInvalidated { entity_id: Option<EntityId> },
}

/// Broadcast hub for coordinator signals.
pub struct NotifyHub {
    sender: broadcast::Sender<Signal>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new(DEFAULT_NOTIFY_CAPACITY)
    }
}

impl NotifyHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Signal> {
        self.sender.subscribe()
    }

    /// Send a signal. No-op if nobody is listening.
    pub fn send(&self, signal: Signal) {
        let _ = self.sender.send(signal);
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
