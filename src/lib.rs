//! # edgecap
//!
//! Headless edge acquisition daemon. A fixed-rate telemetry producer feeds a
//! broker publisher through a single-slot shared buffer, while an audio
//! capture controller independently persists PCM chunks to storage and
//! forwards them to one live network client, all under an HTTP-style control
//! plane.
//!
//! ## Crate structure
//!
//! - **`config`**: settings tree loaded from TOML at startup; nothing is
//!   hot-reloaded.
//! - **`error`**: the central `CapError` type and `AppResult` alias.
//! - **`source`**: sample-source traits plus the mock telemetry and
//!   microphone implementations that stand in for register-level drivers.
//! - **`slot`**: the mutex-guarded, last-write-wins shared buffer between
//!   acquisition and publishing.
//! - **`broker`**: wire format and client connection to the message broker.
//! - **`publisher`**: connection state machine, reconnect backoff, periodic
//!   publish and inbound command dispatch.
//! - **`capture`**: the controller gating persistence and streaming over one
//!   chunk source.
//! - **`storage`**: capture store, append-only sink and the WAV header
//!   serializer.
//! - **`stream`**: the single-client live stream sink.
//! - **`server`**: the control-plane request server.
//! - **`scheduler`**: the fixed-floor task loops and their timing stats.
//! - **`app`**: one-shot wiring of everything above from settings.

pub mod app;
pub mod broker;
pub mod capture;
pub mod config;
pub mod error;
pub mod publisher;
pub mod scheduler;
pub mod server;
pub mod slot;
pub mod source;
pub mod storage;
pub mod stream;
