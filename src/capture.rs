//! Capture controller.
//!
//! Two independent boolean-gated pipelines over one physical chunk source:
//! persistence (`Idle → Recording` with an open capture file) and streaming
//! (`Idle → Armed`, a client may attach while armed). Each pump tick
//! acquires at most one chunk and fans it out to every active sink — the
//! source is never read twice per tick. A stream client disconnect leaves
//! streaming Armed so a new client can attach without another
//! `/stream/start`; only an explicit stop disarms it.

use crate::config::AudioSettings;
use crate::error::{AppResult, CapError};
use crate::source::ChunkSource;
use crate::storage::{CaptureStore, StorageSink, StoredCapture};
use crate::stream::{StreamClient, StreamSink};
use log::{info, warn};
use std::time::Duration;

pub struct CaptureController<S: ChunkSource> {
    source: S,
    store: CaptureStore,
    audio: AudioSettings,
    acquire_wait: Duration,
    sink: Option<StorageSink>,
    streaming: bool,
    stream: StreamSink,
}

impl<S: ChunkSource> CaptureController<S> {
    pub fn new(
        source: S,
        store: CaptureStore,
        audio: AudioSettings,
        acquire_wait: Duration,
    ) -> Self {
        Self {
            source,
            store,
            audio,
            acquire_wait,
            sink: None,
            streaming: false,
            stream: StreamSink::new(),
        }
    }

    pub fn store(&self) -> &CaptureStore {
        &self.store
    }

    pub fn audio(&self) -> AudioSettings {
        self.audio
    }

    pub fn is_recording(&self) -> bool {
        self.sink.is_some()
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn client_attached(&self) -> bool {
        self.stream.is_attached()
    }

    pub fn stream_peer(&self) -> Option<&str> {
        self.stream.peer()
    }

    /// Start persistence: open a uniquely-named capture file.
    ///
    /// Rejected with a conflict while already recording — the open file is
    /// never implicitly replaced.
    pub fn start_recording(&mut self) -> AppResult<String> {
        if self.sink.is_some() {
            return Err(CapError::AlreadyRecording);
        }
        let sink = self.store.create_sink()?;
        let name = sink.name().to_string();
        info!("Recording started ({name})");
        self.sink = Some(sink);
        Ok(name)
    }

    /// Stop persistence: flush and close the capture file. Returns the
    /// finished capture, or `None` when no recording was in progress.
    pub fn stop_recording(&mut self) -> AppResult<Option<StoredCapture>> {
        match self.sink.take() {
            Some(sink) => {
                let capture = sink.finish()?;
                info!("Recording stopped ({}, {} bytes)", capture.name, capture.len);
                Ok(Some(capture))
            }
            None => Ok(None),
        }
    }

    /// Arm streaming. Conflict if already armed.
    pub fn start_streaming(&mut self) -> AppResult<()> {
        if self.streaming {
            return Err(CapError::AlreadyStreaming);
        }
        self.streaming = true;
        info!("Streaming armed; waiting for a client");
        Ok(())
    }

    /// Disarm streaming, closing any attached client. Idempotent.
    pub async fn stop_streaming(&mut self) -> AppResult<()> {
        if self.streaming {
            info!("Streaming disarmed");
        }
        self.streaming = false;
        self.stream.detach().await;
        Ok(())
    }

    /// Attach a live client. Requires streaming to be armed and no client
    /// already attached; on success the format header has been sent.
    pub async fn attach_client(&mut self, client: StreamClient, peer: String) -> AppResult<()> {
        if !self.streaming {
            return Err(CapError::NotStreaming);
        }
        self.stream.attach(client, peer, &self.audio).await
    }

    /// One pump tick: acquire a single chunk if any sink wants it, then
    /// forward the same chunk to every active sink.
    pub async fn tick(&mut self) {
        let persisting = self.sink.is_some();
        let forwarding = self.streaming && self.stream.is_attached();
        if !persisting && !forwarding {
            return;
        }

        let chunk = match self
            .source
            .acquire_chunk(self.audio.chunk_bytes, self.acquire_wait)
            .await
        {
            Ok(chunk) if chunk.is_empty() => return,
            Ok(chunk) => chunk,
            Err(e) => {
                // Transient acquisition failure: skip this cycle, no retry
                // storm.
                warn!("Chunk acquisition failed: {e}");
                return;
            }
        };

        if let Some(sink) = self.sink.as_mut() {
            if let Err(e) = sink.append(&chunk) {
                warn!("Capture append failed: {e}");
            }
        }

        if forwarding {
            // A false return means the client disconnected mid-write; the
            // sink already cleared the attachment and streaming stays armed.
            let _ = self.stream.forward(&chunk).await;
        }
    }
}
