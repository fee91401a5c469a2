//! Capture storage.
//!
//! Captures are written as raw little-endian PCM (`rec_*.raw`) and wrapped
//! in a 44-byte WAV header only when downloaded, so an interrupted recording
//! still leaves a playable byte stream on disk. [`CaptureStore`] owns the
//! storage root (scan, read, delete, unique naming); [`StorageSink`] is the
//! append-only writer for the capture currently being recorded.

use crate::error::{AppResult, CapError};
use chrono::Utc;
use log::info;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

const CAPTURE_PREFIX: &str = "rec_";
const CAPTURE_EXT: &str = "raw";

/// Serialize the canonical 44-byte PCM WAV header.
///
/// Field layout (all multi-byte fields little-endian):
/// `RIFF` | chunk size = 36 + raw_size | `WAVE` | `fmt ` | 16 | format 1 (PCM)
/// | channels | sample rate | byte rate | block align | bit depth | `data`
/// | raw_size. Kept as an explicit byte-offset serializer rather than a
/// packed struct so the layout never depends on host representation.
pub fn wav_header(raw_size: u32, sample_rate: u32, bit_depth: u16, channel_count: u16) -> [u8; 44] {
    let block_align = channel_count * (bit_depth / 8);
    let byte_rate = sample_rate * u32::from(block_align);

    let mut header = [0u8; 44];
    header[0..4].copy_from_slice(b"RIFF");
    header[4..8].copy_from_slice(&(36 + raw_size).to_le_bytes());
    header[8..12].copy_from_slice(b"WAVE");
    header[12..16].copy_from_slice(b"fmt ");
    header[16..20].copy_from_slice(&16u32.to_le_bytes());
    header[20..22].copy_from_slice(&1u16.to_le_bytes());
    header[22..24].copy_from_slice(&channel_count.to_le_bytes());
    header[24..28].copy_from_slice(&sample_rate.to_le_bytes());
    header[28..32].copy_from_slice(&byte_rate.to_le_bytes());
    header[32..34].copy_from_slice(&block_align.to_le_bytes());
    header[34..36].copy_from_slice(&bit_depth.to_le_bytes());
    header[36..40].copy_from_slice(b"data");
    header[40..44].copy_from_slice(&raw_size.to_le_bytes());
    header
}

/// A closed capture file: name within the store plus its byte length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCapture {
    pub name: String,
    pub len: u64,
}

impl StoredCapture {
    /// Download filename: `rec_x.raw` → `rec_x.wav`.
    pub fn download_name(&self) -> String {
        match self.name.strip_suffix(&format!(".{CAPTURE_EXT}")) {
            Some(stem) => format!("{stem}.wav"),
            None => self.name.clone(),
        }
    }
}

pub struct CaptureStore {
    root: PathBuf,
}

impl CaptureStore {
    /// Open (creating if needed) the storage root. A failure here is fatal
    /// at boot: the daemon will not run without working storage.
    pub fn open(root: impl Into<PathBuf>) -> AppResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Open a uniquely-named capture file for appending.
    pub fn create_sink(&self) -> AppResult<StorageSink> {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S%3f");
        let mut name = format!("{CAPTURE_PREFIX}{stamp}.{CAPTURE_EXT}");
        let mut n = 1;
        while self.root.join(&name).exists() {
            name = format!("{CAPTURE_PREFIX}{stamp}_{n}.{CAPTURE_EXT}");
            n += 1;
        }
        let path = self.root.join(&name);
        let file = OpenOptions::new().create_new(true).append(true).open(&path)?;
        info!("Opened capture file {}", path.display());
        Ok(StorageSink {
            file,
            name,
            bytes_written: 0,
        })
    }

    /// List closed captures, newest-name-last.
    pub fn list(&self) -> AppResult<Vec<StoredCapture>> {
        let mut captures = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if !name.starts_with(CAPTURE_PREFIX) || !name.ends_with(&format!(".{CAPTURE_EXT}")) {
                continue;
            }
            let len = entry.metadata()?.len();
            captures.push(StoredCapture {
                name: name.to_string(),
                len,
            });
        }
        captures.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(captures)
    }

    /// Read a stored capture's raw PCM body.
    pub fn read(&self, name: &str) -> AppResult<Vec<u8>> {
        let path = self.resolve(name)?;
        Ok(fs::read(path)?)
    }

    pub fn stat(&self, name: &str) -> AppResult<StoredCapture> {
        let path = self.resolve(name)?;
        let len = fs::metadata(path)?.len();
        Ok(StoredCapture {
            name: name.to_string(),
            len,
        })
    }

    pub fn delete(&self, name: &str) -> AppResult<()> {
        let path = self.resolve(name)?;
        fs::remove_file(path)?;
        info!("Deleted capture '{name}'");
        Ok(())
    }

    /// Map a capture name to its path, rejecting traversal and unknown names.
    fn resolve(&self, name: &str) -> AppResult<PathBuf> {
        if name.contains('/') || name.contains('\\') || name.contains("..") {
            return Err(CapError::CaptureNotFound(name.to_string()));
        }
        let path = self.root.join(name);
        if !path.is_file() {
            return Err(CapError::CaptureNotFound(name.to_string()));
        }
        Ok(path)
    }
}

/// Append-only writer for the capture currently being recorded.
pub struct StorageSink {
    file: File,
    name: String,
    bytes_written: u64,
}

impl StorageSink {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Append one chunk; returns the number of bytes written.
    pub fn append(&mut self, chunk: &[u8]) -> AppResult<usize> {
        self.file.write_all(chunk)?;
        self.bytes_written += chunk.len() as u64;
        Ok(chunk.len())
    }

    /// Flush and close, yielding the finished capture entry.
    pub fn finish(mut self) -> AppResult<StoredCapture> {
        self.file.flush()?;
        self.file.sync_all()?;
        info!("Closed capture '{}' ({} bytes)", self.name, self.bytes_written);
        Ok(StoredCapture {
            name: self.name,
            len: self.bytes_written,
        })
    }
}
