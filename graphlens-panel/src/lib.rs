//! DevTools panel side: persisted history, the panel controller and its
//! connection to the coordinator.

pub mod connection;
pub mod controller;
pub mod error;
pub mod export;
pub mod filter;
pub mod grouping;
pub mod storage;
pub mod store;

pub use connection::PanelConnection;
pub use controller::{run_panel, Group, PanelController, PanelView, Renderer};
pub use error::{PanelError, StorageError};
pub use filter::{Filter, OperationFilter, StatusFilter};
pub use grouping::group_key;
pub use storage::{FileStorage, MemoryStorage, StorageBackend};
pub use store::{HistoryPatch, RequestStore};
