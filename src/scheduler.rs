//! Task loops.
//!
//! A small fixed set of indefinitely-running loops, each with a mandatory
//! per-iteration floor delay so no loop can spin the executor or starve the
//! others: telemetry acquisition, publisher service, and the capture pump.
//! Every operation inside a loop body is bounded-time, so no mid-operation
//! yielding is needed. Each loop keeps busy-time statistics and logs avg/max
//! every [`REPORT_EVERY`] iterations.

use crate::capture::CaptureController;
use crate::publisher::{CommandHandler, Publisher};
use crate::slot::SharedSlot;
use crate::source::{ChunkSource, Reading, ReadingSource};
use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

const REPORT_EVERY: u32 = 100;

/// Per-loop busy-time accumulator.
pub struct LoopStats {
    name: &'static str,
    total_busy: Duration,
    max_busy: Duration,
    iterations: u32,
}

impl LoopStats {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            total_busy: Duration::ZERO,
            max_busy: Duration::ZERO,
            iterations: 0,
        }
    }

    /// Record one iteration's busy time; reports and resets every
    /// `REPORT_EVERY` iterations.
    pub fn record(&mut self, busy: Duration) {
        self.total_busy += busy;
        self.max_busy = self.max_busy.max(busy);
        self.iterations += 1;

        if self.iterations >= REPORT_EVERY {
            let avg = self.total_busy / self.iterations;
            debug!(
                "[{}] loop busy time: avg={avg:?} max={:?} (over {} iters)",
                self.name, self.max_busy, self.iterations
            );
            self.total_busy = Duration::ZERO;
            self.max_busy = Duration::ZERO;
            self.iterations = 0;
        }
    }
}

/// Telemetry acquisition loop: one bounded-time read per period, written
/// into the shared slot. Failures skip the cycle; nothing retries within a
/// tick.
pub async fn run_acquisition_loop<R: ReadingSource>(
    source: R,
    slot: Arc<SharedSlot<Reading>>,
    period: Duration,
    acquire_wait: Duration,
) {
    let mut stats = LoopStats::new("acquire");
    loop {
        let started = Instant::now();

        match source.acquire(acquire_wait).await {
            Ok(reading) => {
                if let Err(e) = slot.write(reading).await {
                    warn!("Dropped reading: {e}");
                }
            }
            Err(e) => warn!("Telemetry read failed, skipping cycle: {e}"),
        }

        stats.record(started.elapsed());
        sleep(period).await;
    }
}

/// Publisher service loop: reconnect, command dispatch and interval publish
/// are all inside [`Publisher::tick`]; the floor delay keeps the loop from
/// spinning while disconnected.
pub async fn run_publisher_loop<H: CommandHandler>(mut publisher: Publisher<H>, floor: Duration) {
    let mut stats = LoopStats::new("publish");
    loop {
        let started = Instant::now();
        publisher.tick().await;
        stats.record(started.elapsed());
        sleep(floor).await;
    }
}

/// Capture pump loop: at most one chunk acquisition per iteration, fanned
/// out by the controller to whichever sinks are active.
pub async fn run_capture_loop<S: ChunkSource>(
    controller: Arc<Mutex<CaptureController<S>>>,
    floor: Duration,
) {
    let mut stats = LoopStats::new("capture");
    loop {
        let started = Instant::now();
        controller.lock().await.tick().await;
        stats.record(started.elapsed());
        sleep(floor).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_reset_after_report() {
        let mut stats = LoopStats::new("test");
        for _ in 0..REPORT_EVERY {
            stats.record(Duration::from_micros(10));
        }
        assert_eq!(stats.iterations, 0);
        assert_eq!(stats.total_busy, Duration::ZERO);
        assert_eq!(stats.max_busy, Duration::ZERO);
    }

    #[test]
    fn stats_track_max() {
        let mut stats = LoopStats::new("test");
        stats.record(Duration::from_micros(5));
        stats.record(Duration::from_micros(50));
        stats.record(Duration::from_micros(10));
        assert_eq!(stats.max_busy, Duration::from_micros(50));
        assert_eq!(stats.iterations, 3);
    }
}
