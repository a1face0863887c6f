use crate::backend::BackendError;
use crate::model::ItemId;

#[derive(Debug, Clone, PartialEq)]
pub enum CoordinatorError {
    Backend(BackendError),
    UnknownItem(ItemId),
    /// A drag on this item is still waiting for its persist call to settle.
    DragInFlight(ItemId),
    NoDragInProgress(ItemId),
    /// The drag was begun but no state was proposed yet.
    NoProposal(ItemId),
    NoActiveFill,
    LimitExceeded(&'static str),
    InvalidField(String),
}

impl std::fmt::Display for CoordinatorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoordinatorError::Backend(e) => write!(f, "backend: {e}"),
            CoordinatorError::UnknownItem(id) => write!(f, "unknown item: {id}"),
            CoordinatorError::DragInFlight(id) => {
                write!(f, "item {id} already has an unresolved drag")
            }
            CoordinatorError::NoDragInProgress(id) => write!(f, "no drag in progress for item {id}"),
            CoordinatorError::NoProposal(id) => write!(f, "drag on item {id} has no proposed state"),
            CoordinatorError::NoActiveFill => write!(f, "no fill gesture in progress"),
            CoordinatorError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            CoordinatorError::InvalidField(name) => write!(f, "invalid field: {name:?}"),
        }
    }
}

impl std::error::Error for CoordinatorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CoordinatorError::Backend(e) => Some(e),
            _ => None,
        }
    }
}

impl From<BackendError> for CoordinatorError {
    fn from(e: BackendError) -> Self {
        CoordinatorError::Backend(e)
    }
}
