//! Content relay: bridges page events onto the runtime channel to the
//! coordinator.
//!
//! The relay injects the interceptor as early as the page allows, then
//! forwards every `__graphql_response` event as a `graphql-response` runtime
//! message. When the channel reports that the extension context is gone the
//! relay drops its page subscription and exits quietly.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use futures::SinkExt;
use graphlens_core::ipc::{encode_frame, frame_codec};
use graphlens_core::{Envelope, RuntimeMessage, TabId};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::UnixStream;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedWrite, LengthDelimitedCodec};

use crate::error::RelayError;
use crate::interceptor::install_interceptor;
use crate::page::Page;

/// One-way message bus from a content context to the coordinator.
#[async_trait]
pub trait RuntimeChannel: Send + Sync {
    async fn send(&self, envelope: Envelope) -> Result<(), RelayError>;
}

/// [`RuntimeChannel`] over the coordinator's Unix socket.
pub struct SocketChannel {
    writer: Mutex<FramedWrite<OwnedWriteHalf, LengthDelimitedCodec>>,
}

impl SocketChannel {
    pub async fn connect(socket_path: impl AsRef<Path>) -> std::io::Result<Self> {
        let stream = UnixStream::connect(socket_path).await?;
        // Relays never read from the coordinator.
        let (_read, write) = stream.into_split();
        Ok(Self {
            writer: Mutex::new(FramedWrite::new(write, frame_codec())),
        })
    }
}

#[async_trait]
impl RuntimeChannel for SocketChannel {
    async fn send(&self, envelope: Envelope) -> Result<(), RelayError> {
        let frame = encode_frame(&envelope)?;
        self.writer
            .lock()
            .await
            .send(frame)
            .await
            .map_err(|_| RelayError::ContextInvalidated)
    }
}

/// Why a relay task stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayExit {
    /// The runtime channel became unusable.
    Invalidated,
    /// The extension suspended the relay.
    Suspended,
    /// The page went away.
    PageClosed,
}

pub struct ContentRelay {
    tab_id: TabId,
    page: Arc<Page>,
    channel: Arc<dyn RuntimeChannel>,
}

impl ContentRelay {
    pub fn new(tab_id: TabId, page: Arc<Page>, channel: Arc<dyn RuntimeChannel>) -> Self {
        Self {
            tab_id,
            page,
            channel,
        }
    }

    /// Spawn the relay. It runs until invalidation, suspension, or page close.
    pub fn start(self, suspend: broadcast::Receiver<()>) -> JoinHandle<RelayExit> {
        tokio::spawn(self.run(suspend))
    }

    pub async fn run(self, mut suspend: broadcast::Receiver<()>) -> RelayExit {
        // Listen before injecting so nothing emitted right after install is missed.
        let mut events = self.page.events().subscribe();

        if !self.page.has_document_element() {
            tokio::select! {
                _ = self.page.dom_ready() => {}
                _ = suspend.recv() => return RelayExit::Suspended,
            }
        }
        install_interceptor(&self.page);

        tracing::debug!(tab_id = self.tab_id, "Content relay started");

        loop {
            tokio::select! {
                received = events.recv() => match received {
                    Ok(event) => {
                        let message = RuntimeMessage::GraphqlResponse(
                            event.into_relayed(Some(self.page.path())),
                        );
                        match self.channel.send(Envelope::from_tab(self.tab_id, message)).await {
                            Ok(()) => {}
                            Err(RelayError::ContextInvalidated) => {
                                tracing::debug!(tab_id = self.tab_id, "Runtime channel gone, detaching relay");
                                return RelayExit::Invalidated;
                            }
                            Err(e) => {
                                tracing::debug!(tab_id = self.tab_id, error = %e, "Dropping unrelayable event");
                            }
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(tab_id = self.tab_id, skipped, "Relay lagged behind page events");
                    }
                    Err(RecvError::Closed) => return RelayExit::PageClosed,
                },
                _ = suspend.recv() => {
                    tracing::debug!(tab_id = self.tab_id, "Content relay suspended");
                    return RelayExit::Suspended;
                }
            }
        }
    }
}
