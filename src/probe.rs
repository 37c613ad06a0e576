// src/probe.rs

use crate::connection;
use crate::http;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
enum ProbeError {
    #[error(transparent)]
    Http(#[from] http::HttpError),
    #[error(transparent)]
    Connection(#[from] connection::ConnectionError),
    #[error("server answered HEAD with status {0}")]
    UnexpectedStatus(u16),
    #[error("HEAD response carried no Content-Length header")]
    NoContentLength,
}

/// One HEAD exchange; returns the raw header block.
fn head_exchange(url: &str) -> Result<Vec<u8>, ProbeError> {
    let parts = http::parse_url(url)?;
    let mut stream = connection::open(&parts.host, parts.port)?;
    let request = http::head_request(&parts);
    connection::send_all(stream.get_mut(), request.as_bytes())?;
    let block = http::read_header_block(&mut stream)?;

    match http::status_code(&block) {
        Some(status) if (200..300).contains(&status) => Ok(block),
        status => Err(ProbeError::UnexpectedStatus(status.unwrap_or(0))),
    }
}

/// Size of the resource in bytes, or `-1` on any failure.
///
/// Failure reasons are not distinguished to the caller; they are logged.
pub fn content_length(url: &str) -> i64 {
    let probed = head_exchange(url)
        .and_then(|block| http::content_length(&block).ok_or(ProbeError::NoContentLength));
    match probed {
        Ok(length) => length,
        Err(err) => {
            debug!(url, %err, "content length probe failed");
            -1
        }
    }
}

/// Whether the server advertises `Accept-Ranges: bytes`; `false` on any
/// failure.
pub fn supports_range_requests(url: &str) -> bool {
    match head_exchange(url) {
        Ok(block) => http::accepts_byte_ranges(&block),
        Err(err) => {
            debug!(url, %err, "range support probe failed");
            false
        }
    }
}
