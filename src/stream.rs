//! Live stream sink.
//!
//! Forwards PCM chunks to exactly one attached client. On attach the sink
//! writes an `audio/L16` response header describing the format before any
//! data, so standard players can consume the stream directly. Any write
//! failure is treated as a disconnect: the client is dropped and logged, and
//! the slot is free for the next attach.

use crate::config::AudioSettings;
use crate::error::{AppResult, CapError};
use log::{info, warn};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Boxed client connection; in production a TCP socket handed over by the
/// request server, in tests any in-memory `AsyncWrite`.
pub type StreamClient = Box<dyn AsyncWrite + Send + Unpin>;

pub struct StreamSink {
    client: Option<StreamClient>,
    peer: Option<String>,
}

impl StreamSink {
    pub fn new() -> Self {
        Self {
            client: None,
            peer: None,
        }
    }

    pub fn is_attached(&self) -> bool {
        self.client.is_some()
    }

    pub fn peer(&self) -> Option<&str> {
        self.peer.as_deref()
    }

    /// Attach a client and send the stream header. Rejected if a client is
    /// already attached; whether streaming mode is enabled is enforced by
    /// the capture controller before the socket gets here.
    pub async fn attach(
        &mut self,
        mut client: StreamClient,
        peer: String,
        audio: &AudioSettings,
    ) -> AppResult<()> {
        if self.client.is_some() {
            return Err(CapError::ClientAttached);
        }

        let header = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: audio/L16;rate={};channels={}\r\nConnection: close\r\n\r\n",
            audio.sample_rate, audio.channels
        );
        client.write_all(header.as_bytes()).await?;
        client.flush().await?;

        info!("Stream client {peer} attached");
        self.client = Some(client);
        self.peer = Some(peer);
        Ok(())
    }

    /// Write one chunk through to the client. Returns `false` if no client
    /// is attached afterwards (either none was, or this write disconnected).
    pub async fn forward(&mut self, chunk: &[u8]) -> bool {
        let Some(client) = self.client.as_mut() else {
            return false;
        };
        match client.write_all(chunk).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    "Stream client {} disconnected: {e}",
                    self.peer.as_deref().unwrap_or("?")
                );
                self.client = None;
                self.peer = None;
                false
            }
        }
    }

    /// Close and clear the attachment, if any.
    pub async fn detach(&mut self) {
        if let Some(mut client) = self.client.take() {
            let _ = client.shutdown().await;
            info!(
                "Stream client {} detached",
                self.peer.as_deref().unwrap_or("?")
            );
        }
        self.peer = None;
    }
}

impl Default for StreamSink {
    fn default() -> Self {
        Self::new()
    }
}
