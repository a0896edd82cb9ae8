use std::path::Path;

use futures::{SinkExt, StreamExt};
use graphlens_core::ipc::{decode_frame, encode_frame, frame_codec};
use graphlens_core::{Envelope, PanelMessage, RuntimeMessage, TabId};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixListener;
use tokio::sync::{broadcast, mpsc};
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::subsystems::coordinator::{ConnectionId, CoordinatorHandle};

pub async fn run_unix_server(
    socket_path: &str,
    coordinator: CoordinatorHandle,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    if Path::new(socket_path).exists() {
        std::fs::remove_file(socket_path)?;
    }

    let listener = UnixListener::bind(socket_path)?;
    tracing::info!("IPC server listening on {}", socket_path);

    loop {
        tokio::select! {
            res = listener.accept() => {
                let (stream, _) = res?;
                let coordinator = coordinator.clone();
                let (read, write) = stream.into_split();
                tokio::spawn(serve_connection(read, write, coordinator));
            }
            _ = shutdown.recv() => {
                tracing::info!("Shutting down IPC server...");
                break;
            }
        }
    }

    if Path::new(socket_path).exists() {
        std::fs::remove_file(socket_path)?;
    }

    Ok(())
}

/// One socket connection. Relays only send envelopes; a connection that
/// sends `init` becomes the panel of that tab and receives its notifications.
pub async fn serve_connection<R, W>(read: R, write: W, coordinator: CoordinatorHandle)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut framed_read = FramedRead::new(read, frame_codec());
    let mut framed_write = FramedWrite::new(write, frame_codec());
    let (port_tx, mut port_rx) = mpsc::unbounded_channel::<PanelMessage>();
    let mut port = Some(port_tx);
    let mut panel: Option<(TabId, ConnectionId)> = None;

    loop {
        tokio::select! {
            frame = framed_read.next() => {
                let bytes = match frame {
                    Some(Ok(bytes)) => bytes,
                    Some(Err(e)) => {
                        tracing::error!("Frame error: {}", e);
                        break;
                    }
                    None => break,
                };
                let envelope: Envelope = match decode_frame(&bytes) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        tracing::warn!("Dropping undecodable message: {}", e);
                        continue;
                    }
                };

                if let RuntimeMessage::Init { tab_id } = envelope.message {
                    let Some(port) = port.take() else {
                        tracing::warn!(tab_id, "Connection already registered as a panel");
                        continue;
                    };
                    match coordinator.connect(tab_id, port).await {
                        Ok(connection) => panel = Some((tab_id, connection)),
                        Err(e) => {
                            tracing::error!("Panel registration failed: {}", e);
                            break;
                        }
                    }
                    continue;
                }

                if coordinator.submit(envelope).await.is_err() {
                    tracing::error!("Coordinator stopped, closing connection");
                    break;
                }
            }
            Some(message) = port_rx.recv(), if panel.is_some() => {
                let frame = match encode_frame(&message) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::error!("Failed to encode {}: {}", message.type_name(), e);
                        continue;
                    }
                };
                if let Err(e) = framed_write.send(frame).await {
                    tracing::debug!("Panel write failed: {}", e);
                    break;
                }
            }
        }
    }

    if let Some((tab_id, connection)) = panel {
        let _ = coordinator.disconnect(tab_id, connection).await;
    }
}
