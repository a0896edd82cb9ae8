use std::path::Path;

use futures::{SinkExt, Stream, StreamExt};
use graphlens_core::ipc::{decode_frame, encode_frame, frame_codec};
use graphlens_core::{Envelope, PanelMessage, RuntimeMessage, TabId};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

use crate::error::PanelError;

/// A panel's connection to the coordinator for one tab.
///
/// The write half is held open for the life of the connection; closing it
/// is what tells the coordinator the panel went away.
pub struct PanelConnection {
    tab_id: TabId,
    reader: FramedRead<OwnedReadHalf, LengthDelimitedCodec>,
    _writer: FramedWrite<OwnedWriteHalf, LengthDelimitedCodec>,
}

impl PanelConnection {
    /// Connect and register as the panel of `tab_id`.
    pub async fn connect(socket_path: impl AsRef<Path>, tab_id: TabId) -> Result<Self, PanelError> {
        let stream = UnixStream::connect(socket_path.as_ref()).await?;
        let (read, write) = stream.into_split();
        let mut writer = FramedWrite::new(write, frame_codec());
        let init = Envelope::anonymous(RuntimeMessage::Init { tab_id });
        writer.send(encode_frame(&init)?).await?;
        tracing::info!(tab_id, "Panel registered with coordinator");

        Ok(Self {
            tab_id,
            reader: FramedRead::new(read, frame_codec()),
            _writer: writer,
        })
    }

    pub fn tab_id(&self) -> TabId {
        self.tab_id
    }

    /// Next notification; `None` once the coordinator closes the socket.
    /// Undecodable frames are skipped.
    pub async fn next_message(&mut self) -> Option<PanelMessage> {
        loop {
            match self.reader.next().await? {
                Ok(bytes) => match decode_frame::<PanelMessage>(&bytes) {
                    Ok(message) => return Some(message),
                    Err(e) => tracing::warn!(tab_id = self.tab_id, "Skipping undecodable notification: {}", e),
                },
                Err(e) => {
                    tracing::error!(tab_id = self.tab_id, "Frame error: {}", e);
                    return None;
                }
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = PanelMessage> + Unpin {
        Box::pin(futures::stream::unfold(self, |mut connection| async move {
            connection
                .next_message()
                .await
                .map(|message| (message, connection))
        }))
    }
}
