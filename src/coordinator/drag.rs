use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use crate::model::*;

use super::CoordinatorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DragPhase {
    /// Gesture started, snapshot taken, nothing rendered yet.
    Started,
    /// Proposed state is on screen and waiting for the persist call.
    Proposed,
    /// The proposed state is being written. It can no longer change or be cancelled.
    Persisting,
}

/// One drag or resize of one item.
#[derive(Debug, Clone, PartialEq)]
pub struct DragMutation {
    pub item_id: ItemId,
    pub previous: ScheduleState,
    /// Raw stored fields at drag start; rollback writes these back verbatim.
    pub snapshot: ScheduleSnapshot,
    pub proposed: Option<ScheduleState>,
    pub persisting: bool,
}

impl DragMutation {
    fn started(item_id: ItemId, snapshot: ScheduleSnapshot) -> Self {
        Self {
            item_id,
            previous: snapshot.state(),
            snapshot,
            proposed: None,
            persisting: false,
        }
    }

    pub fn phase(&self) -> DragPhase {
        match (self.proposed, self.persisting) {
            (_, true) => DragPhase::Persisting,
            (Some(_), false) => DragPhase::Proposed,
            (None, false) => DragPhase::Started,
        }
    }
}

/// How a settled drag ended.
#[derive(Debug, Clone, PartialEq)]
pub enum DragOutcome {
    Committed {
        previous: ScheduleState,
        committed: ScheduleState,
    },
    Reverted {
        restored: ScheduleState,
        snapshot: ScheduleSnapshot,
        error: String,
    },
}

/// Per-item `Idle → Proposed → Persisting → (Committed | Reverted)` bookkeeping.
/// Items without an entry are idle; settling removes the entry.
#[derive(Default)]
pub struct DragReconciler {
    mutations: DashMap<ItemId, DragMutation>,
}

impl DragReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the rollback snapshot. Rejected while an earlier proposal is unresolved;
    /// a started-but-never-proposed gesture is superseded.
    pub fn begin(&self, item_id: ItemId, snapshot: ScheduleSnapshot) -> Result<ScheduleState, CoordinatorError> {
        let mutation = DragMutation::started(item_id, snapshot);
        let previous = mutation.previous;
        match self.mutations.entry(item_id) {
            Entry::Occupied(mut entry) => {
                if entry.get().phase() != DragPhase::Started {
                    return Err(CoordinatorError::DragInFlight(item_id));
                }
                debug!("drag on item {item_id} restarted before proposing");
                entry.insert(mutation);
            }
            Entry::Vacant(entry) => {
                entry.insert(mutation);
            }
        }
        Ok(previous)
    }

    /// Record the state the gesture wants. May be called repeatedly while the
    /// pointer moves, until the persist call starts.
    pub fn propose(&self, item_id: ItemId, proposed: ScheduleState) -> Result<ScheduleState, CoordinatorError> {
        let mut mutation = self
            .mutations
            .get_mut(&item_id)
            .ok_or(CoordinatorError::NoDragInProgress(item_id))?;
        if mutation.persisting {
            return Err(CoordinatorError::DragInFlight(item_id));
        }
        mutation.proposed = Some(proposed);
        Ok(mutation.previous)
    }

    /// Freeze the proposal for writing and return it.
    pub fn start_persist(&self, item_id: ItemId) -> Result<ScheduleState, CoordinatorError> {
        let mut mutation = self
            .mutations
            .get_mut(&item_id)
            .ok_or(CoordinatorError::NoDragInProgress(item_id))?;
        if mutation.persisting {
            return Err(CoordinatorError::DragInFlight(item_id));
        }
        let proposed = mutation.proposed.ok_or(CoordinatorError::NoProposal(item_id))?;
        mutation.persisting = true;
        Ok(proposed)
    }

    /// Resolve the drag with the persist result and forget it.
    pub fn settle(&self, item_id: ItemId, persisted: Result<(), String>) -> Result<DragOutcome, CoordinatorError> {
        let (_, mutation) = self
            .mutations
            .remove_if(&item_id, |_, m| m.proposed.is_some())
            .ok_or_else(|| {
                if self.mutations.contains_key(&item_id) {
                    CoordinatorError::NoProposal(item_id)
                } else {
                    CoordinatorError::NoDragInProgress(item_id)
                }
            })?;
        let committed = mutation.proposed.unwrap_or(mutation.previous);
        Ok(match persisted {
            Ok(()) => DragOutcome::Committed {
                previous: mutation.previous,
                committed,
            },
            Err(error) => DragOutcome::Reverted {
                restored: mutation.previous,
                snapshot: mutation.snapshot,
                error,
            },
        })
    }

    /// Abandon a gesture whose write has not started.
    pub fn cancel(&self, item_id: ItemId) -> Result<DragMutation, CoordinatorError> {
        match self.mutations.remove_if(&item_id, |_, m| !m.persisting) {
            Some((_, mutation)) => Ok(mutation),
            None if self.mutations.contains_key(&item_id) => Err(CoordinatorError::DragInFlight(item_id)),
            None => Err(CoordinatorError::NoDragInProgress(item_id)),
        }
    }

    pub fn get(&self, item_id: ItemId) -> Option<DragMutation> {
        self.mutations.get(&item_id).map(|m| m.value().clone())
    }

    pub fn in_flight(&self) -> usize {
        self.mutations.len()
    }
}
