use graphlens_core::LensError;
use thiserror::Error;

/// Failure of the wrapped network primitive itself (not an HTTP error status).
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("send() called before open()")]
    NotOpened,

    #[error("Transport error: {0}")]
    Other(String),
}

#[derive(Error, Debug)]
pub enum RelayError {
    /// The runtime channel to the coordinator is gone for good.
    #[error("extension context invalidated")]
    ContextInvalidated,

    #[error("Encode error: {0}")]
    Encode(#[from] LensError),
}
