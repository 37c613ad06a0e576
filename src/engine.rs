// src/engine.rs

use crate::models::{
    part_path, Chunk, ChunkSpan, DownloadOptions, EngineState, Progress, ProgressFn,
    MAX_CONNECTIONS,
};
use crate::probe;
use crate::worker::{self, WorkerContext, BUFFER_SIZE};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// The download engine: plans chunks, runs one worker thread per chunk plus
/// a supervisor, and merges the per-chunk temp files into the output file.
///
/// All control methods take `&self`; the engine can be shared across
/// threads. `start` returns immediately, `cancel` blocks until every worker
/// has been joined. Dropping the engine cancels any in-flight download.
pub struct DownloadEngine {
    state: Arc<EngineState>,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    chunks: Arc<Vec<Chunk>>,
    supervisor: Option<JoinHandle<()>>,
}

impl DownloadEngine {
    pub fn new() -> Self {
        Self {
            state: Arc::new(EngineState::default()),
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        // Guarded state stays valid even if a holder panicked.
        self.inner.lock().unwrap_or_else(|err| err.into_inner())
    }

    /// Starts a download and returns once the workers are running.
    ///
    /// Returns `false` if a download is already in flight, the URL is not
    /// `http://`, or the content length cannot be determined. Everything
    /// after a successful return is observable only through
    /// [`progress`](Self::progress) and [`is_downloading`](Self::is_downloading).
    pub fn start(&self, options: DownloadOptions, on_progress: Option<ProgressFn>) -> bool {
        let mut inner = self.lock_inner();
        if self.state.is_downloading.load(Ordering::Acquire) {
            debug!("start refused: download already in progress");
            return false;
        }
        // Reap the supervisor of a previous, finished run.
        if let Some(handle) = inner.supervisor.take() {
            let _ = handle.join();
        }

        // A new download begins with clean flags.
        self.state.should_cancel.store(false, Ordering::Release);
        self.state.is_paused.store(false, Ordering::Release);

        let length = probe::content_length(&options.url);
        if length <= 0 {
            warn!(url = %options.url, "start refused: content length unavailable");
            return false;
        }
        let total = length as u64;
        let ranged = probe::supports_range_requests(&options.url);
        let connections = effective_connections(options.num_connections, ranged, total);
        let chunks = Arc::new(plan_chunks(total, connections));
        info!(
            url = %options.url,
            total,
            connections,
            ranged,
            "starting download"
        );

        self.state.total_bytes.store(total, Ordering::Release);
        self.state.downloaded_bytes.store(0, Ordering::Release);
        self.state.current_speed.store(0, Ordering::Release);
        self.state.is_downloading.store(true, Ordering::Release);

        let url = Arc::new(options.url);
        let output_path = Arc::new(options.output_path);
        let mut workers = Vec::with_capacity(chunks.len());
        for index in 0..chunks.len() {
            let ctx = WorkerContext {
                index,
                url: Arc::clone(&url),
                output_path: Arc::clone(&output_path),
                chunks: Arc::clone(&chunks),
                state: Arc::clone(&self.state),
                on_progress: on_progress.clone(),
            };
            workers.push(thread::spawn(move || worker::run(ctx)));
        }

        inner.chunks = Arc::clone(&chunks);
        let state = Arc::clone(&self.state);
        let supervisor = thread::spawn(move || {
            for handle in workers {
                let _ = handle.join();
            }
            if state.should_cancel.load(Ordering::Acquire) {
                debug!("supervisor: cancelled, skipping merge");
            } else {
                merge(&chunks, &output_path);
            }
            state.is_downloading.store(false, Ordering::Release);
        });
        inner.supervisor = Some(supervisor);
        true
    }

    /// Requests a cooperative pause. Workers stall their body loops within
    /// ~100 ms; sockets stay open. Idempotent.
    pub fn pause(&self) {
        self.state.is_paused.store(true, Ordering::Release);
        debug!("download paused");
    }

    /// Clears the pause request. Idempotent.
    pub fn resume(&self) {
        self.state.is_paused.store(false, Ordering::Release);
        debug!("download resumed");
    }

    /// Requests cancellation and blocks until all workers are joined.
    /// Temp files are left on disk; no output file is produced.
    pub fn cancel(&self) {
        self.state.should_cancel.store(true, Ordering::Release);
        self.state.is_paused.store(false, Ordering::Release);
        let supervisor = self.lock_inner().supervisor.take();
        if let Some(handle) = supervisor {
            let _ = handle.join();
        }
        self.state.is_downloading.store(false, Ordering::Release);
        debug!("download cancelled");
    }

    pub fn is_downloading(&self) -> bool {
        self.state.is_downloading.load(Ordering::Acquire)
    }

    pub fn is_paused(&self) -> bool {
        self.state.is_paused.load(Ordering::Acquire)
    }

    /// Snapshot of the engine-wide counters.
    pub fn progress(&self) -> Progress {
        self.state.snapshot()
    }

    /// Snapshot of the current chunk plan; empty before the first start.
    pub fn chunk_spans(&self) -> Vec<ChunkSpan> {
        self.lock_inner().chunks.iter().map(Chunk::span).collect()
    }
}

impl Default for DownloadEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DownloadEngine {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Effective parallelism: requested count clamped to `[1, 16]`, forced to 1
/// without range support, and never more than one connection per byte.
fn effective_connections(requested: usize, supports_ranges: bool, total_bytes: u64) -> usize {
    let clamped = requested.clamp(1, MAX_CONNECTIONS);
    if !supports_ranges {
        return 1;
    }
    if (clamped as u64) > total_bytes {
        total_bytes as usize
    } else {
        clamped
    }
}

/// Partitions `[0, total_bytes - 1]` into `connections` chunks. Every chunk
/// gets `total / connections` bytes; the last one extends to the end of the
/// resource to absorb the remainder.
fn plan_chunks(total_bytes: u64, connections: usize) -> Vec<Chunk> {
    debug_assert!(total_bytes > 0);
    debug_assert!(connections >= 1 && connections as u64 <= total_bytes);

    let count = connections as u64;
    let chunk_size = total_bytes / count;
    (0..count)
        .map(|i| {
            let start = i * chunk_size;
            let end = if i == count - 1 {
                total_bytes - 1
            } else {
                start + chunk_size - 1
            };
            Chunk::new(start, end)
        })
        .collect()
}

/// Streams every temp file into the output file in plan order, in
/// [`BUFFER_SIZE`] blocks, deleting each temp file afterwards. A missing
/// temp file is logged and skipped, leaving the output short.
fn merge(chunks: &[Chunk], output_path: &Path) {
    let mut out = match File::create(output_path) {
        Ok(file) => file,
        Err(err) => {
            error!(path = %output_path.display(), %err, "failed to open output file");
            return;
        }
    };

    let mut buffer = vec![0u8; BUFFER_SIZE];
    for index in 0..chunks.len() {
        let temp_path = part_path(output_path, index);
        let mut input = match File::open(&temp_path) {
            Ok(file) => file,
            Err(err) => {
                warn!(path = %temp_path.display(), %err, "temp file missing, skipping chunk");
                continue;
            }
        };
        loop {
            match input.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => {
                    if let Err(err) = out.write_all(&buffer[..n]) {
                        error!(path = %output_path.display(), %err, "write to output file failed");
                        return;
                    }
                }
                Err(err) => {
                    warn!(path = %temp_path.display(), %err, "read from temp file failed");
                    break;
                }
            }
        }
        drop(input);
        if let Err(err) = fs::remove_file(&temp_path) {
            warn!(path = %temp_path.display(), %err, "could not remove temp file");
        }
    }
    info!(path = %output_path.display(), chunks = chunks.len(), "chunks merged");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spans(total: u64, connections: usize) -> Vec<(u64, u64)> {
        plan_chunks(total, connections)
            .iter()
            .map(|c| (c.start, c.end))
            .collect()
    }

    #[test]
    fn plan_covers_resource_exactly() {
        for (total, k) in [
            (10_000u64, 4usize),
            (10_001, 4),
            (1, 1),
            (5, 5),
            (1_048_576, 16),
            (999, 7),
        ] {
            let chunks = plan_chunks(total, k);
            assert_eq!(chunks.len(), k);
            assert_eq!(chunks[0].start, 0);
            assert_eq!(chunks[k - 1].end, total - 1);
            for pair in chunks.windows(2) {
                assert_eq!(pair[0].end + 1, pair[1].start);
            }
            let covered: u64 = chunks.iter().map(Chunk::len).sum();
            assert_eq!(covered, total);
        }
    }

    #[test]
    fn even_split_of_ten_thousand() {
        assert_eq!(
            spans(10_000, 4),
            vec![(0, 2499), (2500, 4999), (5000, 7499), (7500, 9999)]
        );
    }

    #[test]
    fn last_chunk_absorbs_remainder() {
        assert_eq!(
            spans(10_001, 4),
            vec![(0, 2499), (2500, 4999), (5000, 7499), (7500, 10_000)]
        );
    }

    #[test]
    fn connection_count_is_clamped() {
        assert_eq!(effective_connections(20, true, 1_000_000), 16);
        assert_eq!(effective_connections(0, true, 1_000_000), 1);
        assert_eq!(effective_connections(8, true, 1_000_000), 8);
    }

    #[test]
    fn no_range_support_forces_single_chunk() {
        assert_eq!(effective_connections(8, false, 1_000_000), 1);
    }

    #[test]
    fn tiny_resource_caps_connections_at_length() {
        assert_eq!(effective_connections(8, true, 1), 1);
        assert_eq!(effective_connections(8, true, 5), 5);
        assert_eq!(effective_connections(4, true, 4), 4);
    }

    #[test]
    fn fresh_engine_is_idle() {
        let engine = DownloadEngine::new();
        assert!(!engine.is_downloading());
        assert!(!engine.is_paused());
        let progress = engine.progress();
        assert_eq!(progress.downloaded_bytes, 0);
        assert_eq!(progress.total_bytes, 0);
        assert!(engine.chunk_spans().is_empty());
    }

    #[test]
    fn pause_and_resume_are_idempotent() {
        let engine = DownloadEngine::new();
        engine.pause();
        engine.pause();
        assert!(engine.is_paused());
        engine.resume();
        engine.resume();
        assert!(!engine.is_paused());
    }

    #[test]
    fn cancel_on_idle_engine_returns_immediately() {
        let engine = DownloadEngine::new();
        engine.cancel();
        assert!(!engine.is_downloading());
    }

    #[test]
    fn start_rejects_https_without_network() {
        let engine = DownloadEngine::new();
        let options = DownloadOptions::new("https://example.com/x", "/tmp/orion-https-test");
        assert!(!engine.start(options, None));
        assert!(!engine.is_downloading());
    }
}
