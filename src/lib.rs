pub mod backend;
pub mod config;
pub mod coordinator;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;

pub use backend::{Backend, BackendError, BackendOp, MemoryBackend};
pub use config::CoordinatorConfig;
pub use coordinator::{Coordinator, CoordinatorError};
pub use notify::{NotifyHub, Signal};
