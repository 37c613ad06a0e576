// src/models.rs

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Default number of parallel connections when the caller does not choose one.
pub const DEFAULT_CONNECTIONS: usize = 8;

/// Hard upper bound on parallel connections.
pub const MAX_CONNECTIONS: usize = 16;

/// Configuration for a single download.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadOptions {
    pub url: String,
    pub output_path: PathBuf,
    /// Requested parallel connections; clamped to `[1, 16]` at start.
    pub num_connections: usize,
}

impl DownloadOptions {
    pub fn new(url: impl Into<String>, output_path: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            output_path: output_path.into(),
            num_connections: DEFAULT_CONNECTIONS,
        }
    }

    pub fn with_connections(mut self, num_connections: usize) -> Self {
        self.num_connections = num_connections;
        self
    }
}

/// One contiguous byte range of the resource, owned by exactly one worker.
///
/// `start`/`end` are fixed at planning time; `downloaded` and `completed`
/// are written only by the worker assigned to this chunk and read by
/// everyone else.
#[derive(Debug)]
pub struct Chunk {
    /// Inclusive absolute start offset.
    pub start: u64,
    /// Inclusive absolute end offset.
    pub end: u64,
    pub downloaded: AtomicU64,
    pub completed: AtomicBool,
}

impl Chunk {
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start <= end);
        Self {
            start,
            end,
            downloaded: AtomicU64::new(0),
            completed: AtomicBool::new(false),
        }
    }

    /// Number of body bytes this chunk is expected to receive.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Point-in-time copy of this chunk's state.
    pub fn span(&self) -> ChunkSpan {
        ChunkSpan {
            start: self.start,
            end: self.end,
            downloaded: self.downloaded.load(Ordering::Acquire),
            completed: self.completed.load(Ordering::Acquire),
        }
    }
}

/// Plain snapshot of a [`Chunk`], safe to hand to hosts and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkSpan {
    pub start: u64,
    pub end: u64,
    pub downloaded: u64,
    pub completed: bool,
}

/// Point-in-time view of an in-flight download.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Progress {
    pub downloaded_bytes: u64,
    pub total_bytes: u64,
    /// Instantaneous throughput in bytes per second; approximate.
    pub speed_bps: u64,
    /// Workers currently inside their body loop.
    pub active_connections: usize,
}

impl Progress {
    /// Completion percentage in `[0.0, 100.0]`.
    pub fn percentage(&self) -> f32 {
        if self.total_bytes > 0 {
            (self.downloaded_bytes as f32 / self.total_bytes as f32) * 100.0
        } else {
            0.0
        }
    }
}

/// Callback invoked from worker threads while a download is in flight.
/// Must tolerate concurrent invocation from up to 16 threads.
pub type ProgressFn = Arc<dyn Fn(Progress) + Send + Sync + 'static>;

/// Shared engine state: flags and counters visible to all workers.
#[derive(Debug, Default)]
pub(crate) struct EngineState {
    pub is_downloading: AtomicBool,
    pub is_paused: AtomicBool,
    pub should_cancel: AtomicBool,
    pub total_bytes: AtomicU64,
    pub downloaded_bytes: AtomicU64,
    pub current_speed: AtomicU64,
    pub active_connections: AtomicUsize,
}

impl EngineState {
    pub fn snapshot(&self) -> Progress {
        Progress {
            downloaded_bytes: self.downloaded_bytes.load(Ordering::Acquire),
            total_bytes: self.total_bytes.load(Ordering::Acquire),
            speed_bps: self.current_speed.load(Ordering::Acquire),
            active_connections: self.active_connections.load(Ordering::Acquire),
        }
    }
}

/// Path of the scratch file holding chunk `index` of `output_path`,
/// e.g. `/tmp/a.bin.part3` for chunk 3 of `/tmp/a.bin`.
pub fn part_path(output_path: &Path, index: usize) -> PathBuf {
    PathBuf::from(format!("{}.part{}", output_path.to_string_lossy(), index))
}
