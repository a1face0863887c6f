pub mod memory;

pub use memory::MemoryBackend;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::model::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The call never reached the backend or its reply was lost.
    Transport(String),
    /// The backend refused the request.
    Rejected(String),
    NotFound(ItemId),
    /// The backend replied with something that could not be decoded.
    Malformed(String),
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendError::Transport(e) => write!(f, "transport error: {e}"),
            BackendError::Rejected(e) => write!(f, "rejected: {e}"),
            BackendError::NotFound(id) => write!(f, "item not found: {id}"),
            BackendError::Malformed(e) => write!(f, "malformed response: {e}"),
        }
    }
}

impl std::error::Error for BackendError {}

/// The authoritative store the coordinator reads capacity from and writes items to.
/// Transport is the implementor's concern.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    async fn fetch_allocations(
        &self,
        entity_id: EntityId,
        range_start: NaiveDate,
        range_end: NaiveDate,
        include_overtime: bool,
    ) -> Result<Vec<AllocationRecord>, BackendError>;

    async fn update_item(&self, id: ItemId, fields: Fields) -> Result<(), BackendError>;

    async fn batch_update_items(&self, updates: Vec<ItemUpdate>) -> Result<BatchResult, BackendError>;

    async fn create_item(&self, fields: Fields) -> Result<ItemId, BackendError>;

    async fn delete_item(&self, id: ItemId) -> Result<(), BackendError>;
}

/// Operation label, used for metrics and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendOp {
    FetchAllocations,
    UpdateItem,
    BatchUpdateItems,
    CreateItem,
    DeleteItem,
}
