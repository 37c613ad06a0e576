// src/worker.rs

use crate::connection;
use crate::http;
use crate::models::{part_path, Chunk, EngineState, ProgressFn};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::net::TcpStream;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

/// Body read buffer; also the block size used by the merge step.
pub(crate) const BUFFER_SIZE: usize = 64 * 1024;

/// How long a paused worker sleeps between flag rechecks.
const PAUSE_POLL: Duration = Duration::from_millis(100);

/// Minimum spacing between progress callbacks from one worker.
const CALLBACK_INTERVAL_MS: u64 = 100;

#[derive(Debug, Error)]
pub(crate) enum WorkerError {
    #[error(transparent)]
    Http(#[from] http::HttpError),
    #[error(transparent)]
    Connection(#[from] connection::ConnectionError),
    #[error("failed to open temp file {}: {}", .path.display(), .source)]
    OpenFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("server answered ranged GET with status {0}")]
    UnexpectedStatus(u16),
}

/// Everything a chunk worker needs; built by the engine, moved into the
/// worker thread.
pub(crate) struct WorkerContext {
    pub index: usize,
    pub url: Arc<String>,
    pub output_path: Arc<PathBuf>,
    pub chunks: Arc<Vec<Chunk>>,
    pub state: Arc<EngineState>,
    pub on_progress: Option<ProgressFn>,
}

/// Transfers one chunk to its temp file. Never panics; failures end the
/// worker and leave the chunk incomplete.
pub(crate) fn run(ctx: WorkerContext) {
    let index = ctx.index;
    match transfer(&ctx) {
        Ok(()) => debug!(chunk = index, "chunk worker finished"),
        Err(err) => warn!(chunk = index, %err, "chunk worker stopped early"),
    }
}

fn transfer(ctx: &WorkerContext) -> Result<(), WorkerError> {
    let chunk = &ctx.chunks[ctx.index];
    let parts = http::parse_url(&ctx.url)?;

    // The temp file exists from the moment the worker starts, even if the
    // exchange later fails; the merge step skips short or empty parts.
    let temp_path = part_path(&ctx.output_path, ctx.index);
    let mut out = File::create(&temp_path).map_err(|source| WorkerError::OpenFile {
        path: temp_path.clone(),
        source,
    })?;

    let mut stream = connection::open(&parts.host, parts.port)?;
    let request = http::get_request(&parts, Some((chunk.start, chunk.end)));
    connection::send_all(stream.get_mut(), request.as_bytes())?;

    let header_block = http::read_header_block(&mut stream)?;
    match http::status_code(&header_block) {
        Some(200) | Some(206) => {}
        status => return Err(WorkerError::UnexpectedStatus(status.unwrap_or(0))),
    }

    ctx.state.active_connections.fetch_add(1, Ordering::AcqRel);
    receive_body(ctx, chunk, &mut stream, &mut out);
    ctx.state.active_connections.fetch_sub(1, Ordering::AcqRel);

    // Cancellation leaves the chunk unmarked so the supervisor can tell it
    // apart from a normal (possibly short) exit.
    if !ctx.state.should_cancel.load(Ordering::Acquire) {
        chunk.completed.store(true, Ordering::Release);
    }
    Ok(())
}

/// The body loop: reads up to [`BUFFER_SIZE`] bytes at a time, appending to
/// the temp file and updating shared counters, until end of body, a read
/// failure or cancellation. The reader is the same one the header block was
/// read through, so body bytes buffered past the header boundary are drained
/// first. Pausing stalls the loop without consuming from the socket, letting
/// TCP apply backpressure.
fn receive_body(
    ctx: &WorkerContext,
    chunk: &Chunk,
    stream: &mut BufReader<TcpStream>,
    out: &mut File,
) {
    let state = &ctx.state;
    let mut buffer = vec![0u8; BUFFER_SIZE];
    let mut window_start = Instant::now();
    let mut window_bytes: u64 = 0;

    loop {
        if state.should_cancel.load(Ordering::Acquire) {
            break;
        }
        while state.is_paused.load(Ordering::Acquire)
            && !state.should_cancel.load(Ordering::Acquire)
        {
            thread::sleep(PAUSE_POLL);
        }
        if state.should_cancel.load(Ordering::Acquire) {
            break;
        }

        let received = match stream.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            // A receive timeout or reset ends the body like a clean close.
            Err(_) => break,
        };

        if let Err(err) = out.write_all(&buffer[..received]) {
            warn!(chunk = ctx.index, %err, "temp file write failed, truncating chunk");
            break;
        }

        chunk.downloaded.fetch_add(received as u64, Ordering::Relaxed);
        state
            .downloaded_bytes
            .fetch_add(received as u64, Ordering::Relaxed);
        window_bytes += received as u64;

        let elapsed_ms = window_start.elapsed().as_millis() as u64;
        if elapsed_ms > 0 {
            state
                .current_speed
                .store(window_bytes * 1000 / elapsed_ms, Ordering::Relaxed);
        }
        if let Some(on_progress) = &ctx.on_progress {
            if elapsed_ms > CALLBACK_INTERVAL_MS {
                on_progress(state.snapshot());
                window_start = Instant::now();
                window_bytes = 0;
            }
        }
    }
}
