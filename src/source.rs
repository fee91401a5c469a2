//! Sample sources.
//!
//! Two producer seams feed the rest of the daemon: [`ReadingSource`] yields
//! one timestamped telemetry [`Reading`] per call, and [`ChunkSource`] yields
//! fixed-size blocks of raw PCM already normalized to the configured channel
//! count and bit depth. Both are bounded-time: a read either completes within
//! the given wait or reports [`SourceError::Timeout`].
//!
//! Real register-level drivers live behind these traits; the mock
//! implementations here stand in for them and are also used by the tests.

use crate::config::AudioSettings;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// A single telemetry sample: 3-axis acceleration, 3-axis angular rate and
/// die temperature. Immutable once produced.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub ax: f32,
    pub ay: f32,
    pub az: f32,
    pub gx: f32,
    pub gy: f32,
    pub gz: f32,
    pub temp_c: f32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("source read timed out")]
    Timeout,

    #[error("driver error: {0}")]
    Driver(String),
}

/// Bounded-time producer of telemetry readings.
#[async_trait]
pub trait ReadingSource: Send + Sync {
    /// Acquire one reading, waiting at most `wait`.
    async fn acquire(&self, wait: Duration) -> Result<Reading, SourceError>;
}

/// Bounded-time producer of raw PCM chunks.
///
/// Down-mix and format conversion happen behind this trait; consumers receive
/// data already matching the declared format.
#[async_trait]
pub trait ChunkSource: Send + Sync {
    fn sample_rate(&self) -> u32;
    fn bit_depth(&self) -> u16;
    fn channels(&self) -> u16;

    /// Acquire up to `max_bytes` of normalized PCM, waiting at most `wait`.
    async fn acquire_chunk(&mut self, max_bytes: usize, wait: Duration)
        -> Result<Vec<u8>, SourceError>;
}

/// Mock inertial sensor producing random accelerations in ±10 m/s².
pub struct MockImu;

impl MockImu {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MockImu {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReadingSource for MockImu {
    async fn acquire(&self, _wait: Duration) -> Result<Reading, SourceError> {
        let mut rng = rand::thread_rng();
        Ok(Reading {
            ax: rng.gen_range(-10.0..10.0),
            ay: rng.gen_range(-10.0..10.0),
            az: rng.gen_range(-10.0..10.0),
            gx: 0.0,
            gy: 0.0,
            gz: 0.0,
            temp_c: 25.0,
            timestamp: Utc::now(),
        })
    }
}

/// Mock microphone synthesizing a 440 Hz tone as interleaved 16-bit stereo,
/// down-mixed to the configured channel count.
pub struct MockMicrophone {
    audio: AudioSettings,
    /// Index of the next stereo frame to synthesize.
    frame_index: u64,
    tone_hz: f64,
}

impl MockMicrophone {
    pub fn new(audio: AudioSettings) -> anyhow::Result<Self> {
        if audio.bit_depth != 16 {
            anyhow::bail!("mock microphone only supports 16-bit PCM, got {}", audio.bit_depth);
        }
        Ok(Self {
            audio,
            frame_index: 0,
            tone_hz: 440.0,
        })
    }

    /// Synthesize `frames` interleaved stereo frames (left, right).
    fn synth_stereo(&mut self, frames: usize) -> Vec<i16> {
        let mut out = Vec::with_capacity(frames * 2);
        for _ in 0..frames {
            let t = self.frame_index as f64 / f64::from(self.audio.sample_rate);
            let phase = 2.0 * std::f64::consts::PI * self.tone_hz * t;
            let left = (phase.sin() * 12000.0) as i16;
            // Right channel slightly attenuated so down-mix is observable.
            let right = (phase.sin() * 6000.0) as i16;
            out.push(left);
            out.push(right);
            self.frame_index += 1;
        }
        out
    }
}

#[async_trait]
impl ChunkSource for MockMicrophone {
    fn sample_rate(&self) -> u32 {
        self.audio.sample_rate
    }

    fn bit_depth(&self) -> u16 {
        self.audio.bit_depth
    }

    fn channels(&self) -> u16 {
        self.audio.channels
    }

    async fn acquire_chunk(
        &mut self,
        max_bytes: usize,
        _wait: Duration,
    ) -> Result<Vec<u8>, SourceError> {
        let bytes_per_sample = usize::from(self.audio.bit_depth / 8);
        let out_samples = max_bytes / bytes_per_sample;
        if out_samples == 0 {
            return Ok(Vec::new());
        }

        let chunk = if self.audio.channels == 1 {
            // Mono path: read stereo from the device, keep the left channel.
            let frames = out_samples;
            let stereo = self.synth_stereo(frames);
            let mut mono = Vec::with_capacity(frames * bytes_per_sample);
            for pair in stereo.chunks_exact(2) {
                mono.extend_from_slice(&pair[0].to_le_bytes());
            }
            mono
        } else {
            // Stereo pass-through.
            let frames = out_samples / 2;
            let stereo = self.synth_stereo(frames);
            let mut raw = Vec::with_capacity(frames * 2 * bytes_per_sample);
            for sample in stereo {
                raw.extend_from_slice(&sample.to_le_bytes());
            }
            raw
        };

        // The synthesizer never blocks; yield so the pump loop cannot starve
        // the executor even with a zero floor delay.
        tokio::task::yield_now().await;
        Ok(chunk)
    }
}
