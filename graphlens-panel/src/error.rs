use graphlens_core::LensError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Malformed value for key {key}: {reason}")]
    Malformed { key: String, reason: String },
}

#[derive(Error, Debug)]
pub enum PanelError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Connection error: {0}")]
    Connection(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] LensError),
}
