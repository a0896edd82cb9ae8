pub mod config;
pub mod error;
pub mod ipc;
pub mod models;
pub mod operation;

pub use config::{CorrelationStrategy, LensConfig};
pub use error::LensError;
pub use ipc::{Envelope, NetworkEvent, PanelMessage, RelayedResponse, RuntimeMessage};
pub use models::{
    CapturedExchange, Completion, ExchangeStatus, RequestFailure, Settings, TabId, Theme,
    ANONYMOUS_OPERATION,
};
pub use operation::{OperationMeta, OperationType};
