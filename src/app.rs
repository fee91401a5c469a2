//! Application wiring.
//!
//! Builds every component once at startup from [`Settings`] and hands each
//! task exactly what it owns — no ambient statics. Initialization is
//! fail-stop: storage, sources and the control-plane bind must all succeed
//! before any loop starts; on failure the caller halts the process in an
//! inert wait instead of running with partial capability.

use crate::capture::CaptureController;
use crate::config::Settings;
use crate::error::{AppResult, CapError};
use crate::publisher::{CommandHandler, Publisher};
use crate::scheduler::{run_acquisition_loop, run_capture_loop, run_publisher_loop};
use crate::server::RequestServer;
use crate::slot::SharedSlot;
use crate::source::{MockImu, MockMicrophone, Reading};
use crate::storage::CaptureStore;
use log::{info, warn};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Handler for inbound broker commands, dispatched by a tagged match on the
/// command verb.
pub struct TelemetryCommandHandler;

impl CommandHandler for TelemetryCommandHandler {
    fn on_command(&mut self, topic: &str, payload: &[u8]) {
        let text = String::from_utf8_lossy(payload);
        let mut parts = text.split_whitespace();
        match parts.next() {
            Some("ping") => info!("Command 'ping' received on '{topic}'"),
            Some(other) => warn!("Unknown command '{other}' on '{topic}'"),
            None => warn!("Empty command on '{topic}'"),
        }
    }
}

/// Initialize all components and run until process exit.
///
/// The returned error is always an initialization failure; once the loops
/// are spawned and the accept loop is entered this never returns.
pub async fn run(settings: Settings) -> AppResult<()> {
    let settings = Arc::new(settings);

    // Fail-stop boot sequence: any error here aborts the whole daemon.
    let store = CaptureStore::open(&settings.storage.capture_dir)?;
    let microphone =
        MockMicrophone::new(settings.audio).map_err(|e| CapError::Source(e.to_string()))?;
    let server = RequestServer::bind(&settings.server.bind_addr).await?;

    let slot: Arc<SharedSlot<Reading>> = Arc::new(SharedSlot::new(settings.scheduler.lock_wait));
    let publisher = Publisher::new(
        settings.broker.clone(),
        Arc::clone(&slot),
        TelemetryCommandHandler,
    );
    let controller = Arc::new(Mutex::new(CaptureController::new(
        microphone,
        store,
        settings.audio,
        settings.scheduler.lock_wait,
    )));

    tokio::spawn(run_acquisition_loop(
        MockImu::new(),
        Arc::clone(&slot),
        settings.scheduler.telemetry_period,
        settings.scheduler.lock_wait,
    ));
    tokio::spawn(run_publisher_loop(
        publisher,
        settings.scheduler.publisher_floor,
    ));
    tokio::spawn(run_capture_loop(
        Arc::clone(&controller),
        settings.scheduler.capture_floor,
    ));

    info!("Setup complete; all tasks running");
    server.run(controller).await;
    Ok(())
}

/// Park the task forever. Used after a fatal initialization error: the
/// device stays inert rather than operating with partial capability.
pub async fn halt() {
    futures::future::pending::<()>().await;
}
