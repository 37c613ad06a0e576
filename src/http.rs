// src/http.rs

use std::io::{BufRead, Read};
use thiserror::Error;

/// User-Agent sent with every request.
pub const USER_AGENT: &str = "Orion-Downloader/1.0";

/// Upper bound on a response header block. A response whose headers do not
/// terminate within this many bytes is rejected.
pub const MAX_HEADER_BLOCK: usize = 16 * 1024;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("https urls are not supported, use plain http")]
    UnsupportedScheme,
    #[error("malformed url: {0}")]
    MalformedUrl(String),
    #[error("response header block exceeded {MAX_HEADER_BLOCK} bytes without terminator")]
    BadResponse,
    #[error("io error while reading response headers: {0}")]
    Io(#[from] std::io::Error),
}

/// Decomposed `http://` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlParts {
    pub host: String,
    pub port: u16,
    pub path: String,
}

/// Splits an `http://` URL into host, port and path.
///
/// Port defaults to 80, path defaults to `/`. HTTPS is rejected with
/// [`HttpError::UnsupportedScheme`]; anything else that does not start with
/// `http://`, has an empty authority or an unparseable port is
/// [`HttpError::MalformedUrl`].
pub fn parse_url(url: &str) -> Result<UrlParts, HttpError> {
    if url.starts_with("https://") {
        return Err(HttpError::UnsupportedScheme);
    }
    let rest = url
        .strip_prefix("http://")
        .ok_or_else(|| HttpError::MalformedUrl(url.to_string()))?;
    if rest.is_empty() {
        return Err(HttpError::MalformedUrl(url.to_string()));
    }

    let (authority, path) = match rest.find('/') {
        Some(slash) => (&rest[..slash], &rest[slash..]),
        None => (rest, "/"),
    };

    let (host, port) = match authority.find(':') {
        Some(colon) => {
            let port = authority[colon + 1..]
                .parse::<u16>()
                .map_err(|_| HttpError::MalformedUrl(url.to_string()))?;
            (&authority[..colon], port)
        }
        None => (authority, 80),
    };
    if host.is_empty() {
        return Err(HttpError::MalformedUrl(url.to_string()));
    }

    Ok(UrlParts {
        host: host.to_string(),
        port,
        path: path.to_string(),
    })
}

/// Formats a HEAD request for `parts`.
pub fn head_request(parts: &UrlParts) -> String {
    format!(
        "HEAD {} HTTP/1.1\r\n\
         Host: {}\r\n\
         User-Agent: {}\r\n\
         Connection: close\r\n\
         \r\n",
        parts.path, parts.host, USER_AGENT
    )
}

/// Formats a GET request for `parts`, optionally with an inclusive byte range.
pub fn get_request(parts: &UrlParts, range: Option<(u64, u64)>) -> String {
    let mut request = format!(
        "GET {} HTTP/1.1\r\n\
         Host: {}\r\n\
         User-Agent: {}\r\n",
        parts.path, parts.host, USER_AGENT
    );
    if let Some((start, end)) = range {
        request.push_str(&format!("Range: bytes={}-{}\r\n", start, end));
    }
    request.push_str("Connection: close\r\n\r\n");
    request
}

/// Reads from `reader` line by line until the `\r\n\r\n` header terminator.
/// Lines never read past their trailing `\n`, so the body stream starts
/// exactly at the next byte of the same reader.
///
/// Returns the header block including the terminator. An early end of
/// stream returns whatever arrived; exceeding [`MAX_HEADER_BLOCK`] is a
/// [`HttpError::BadResponse`].
pub fn read_header_block<R: BufRead>(reader: &mut R) -> Result<Vec<u8>, HttpError> {
    let mut block = Vec::with_capacity(512);
    while !block.ends_with(HEADER_TERMINATOR) {
        let limit = (MAX_HEADER_BLOCK + 1 - block.len()) as u64;
        let read = reader.by_ref().take(limit).read_until(b'\n', &mut block)?;
        if read == 0 {
            break;
        }
        if block.len() > MAX_HEADER_BLOCK {
            return Err(HttpError::BadResponse);
        }
    }
    Ok(block)
}

/// Status code from the first line of a header block, if parseable.
pub fn status_code(block: &[u8]) -> Option<u16> {
    let text = String::from_utf8_lossy(block);
    let line = text.lines().next()?;
    line.split_whitespace().nth(1)?.parse().ok()
}

/// `Content-Length` value from a header block. Lookup is case-insensitive;
/// leading spaces and tabs after the colon are trimmed.
pub fn content_length(block: &[u8]) -> Option<i64> {
    let lowered = String::from_utf8_lossy(block).to_lowercase();
    let pos = lowered.find("content-length:")?;
    let after = &lowered[pos + "content-length:".len()..];
    let value = after.split("\r\n").next()?;
    value.trim_matches([' ', '\t']).parse().ok()
}

/// Whether a header block advertises `Accept-Ranges: bytes`.
pub fn accepts_byte_ranges(block: &[u8]) -> bool {
    String::from_utf8_lossy(block)
        .to_lowercase()
        .contains("accept-ranges: bytes")
}
