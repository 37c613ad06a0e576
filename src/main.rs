// src/main.rs

use anyhow::{bail, Result};
use clap::Parser;
use orion_downloader::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Multi-connection HTTP downloader.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// URL of the file to download (plain http:// only).
    url: String,

    /// Output file path; defaults to the last URL path segment.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Number of concurrent connections (clamped to 1..=16).
    #[arg(short, long, default_value_t = 8)]
    connections: usize,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let output = match args.output {
        Some(path) => path,
        None => derive_output_name(&args.url),
    };

    let engine = DownloadEngine::new();
    let options = DownloadOptions::new(&args.url, &output).with_connections(args.connections);
    let on_progress: ProgressFn = Arc::new(|progress: Progress| {
        eprint!(
            "\r{} / {} bytes ({:.1}%), {} B/s, {} connections   ",
            progress.downloaded_bytes,
            progress.total_bytes,
            progress.percentage(),
            progress.speed_bps,
            progress.active_connections,
        );
    });

    if !engine.start(options, Some(on_progress)) {
        bail!("download could not be started, check the URL");
    }

    while engine.is_downloading() {
        std::thread::sleep(Duration::from_millis(250));
    }
    eprintln!();

    let progress = engine.progress();
    if progress.downloaded_bytes < progress.total_bytes {
        bail!(
            "download incomplete: {} of {} bytes",
            progress.downloaded_bytes,
            progress.total_bytes
        );
    }
    println!("saved {} bytes to {}", progress.downloaded_bytes, output.display());
    Ok(())
}

/// Last path segment of the URL, or a generic name when there is none.
fn derive_output_name(url: &str) -> PathBuf {
    let rest = url.strip_prefix("http://").unwrap_or(url);
    let name = rest
        .find('/')
        .map(|slash| &rest[slash..])
        .and_then(|path| path.rsplit('/').next())
        .filter(|name| !name.is_empty());
    PathBuf::from(name.unwrap_or("download.bin"))
}
