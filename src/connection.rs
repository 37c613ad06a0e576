// src/connection.rs

use std::io::{BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Send and receive timeout applied to every socket.
pub const IO_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("failed to resolve host {0}")]
    ResolveFailed(String),
    #[error("failed to connect to {host}:{port}")]
    ConnectFailed { host: String, port: u16 },
    #[error("socket setup failed: {0}")]
    SocketFailed(std::io::Error),
    #[error("send returned no progress before the full request was written")]
    SendFailed,
}

/// Opens a TCP connection to `host:port` with [`IO_TIMEOUT`] send/receive
/// timeouts and `TCP_NODELAY` set. Only the first resolved address is tried.
/// A fresh connection is opened per request; sockets are never reused.
///
/// The socket is returned behind a [`BufReader`] so the header scan and the
/// body loop share one read buffer; write to it through
/// [`BufReader::get_mut`].
pub fn open(host: &str, port: u16) -> Result<BufReader<TcpStream>, ConnectionError> {
    let addr = (host, port)
        .to_socket_addrs()
        .map_err(|_| ConnectionError::ResolveFailed(host.to_string()))?
        .next()
        .ok_or_else(|| ConnectionError::ResolveFailed(host.to_string()))?;

    let stream = TcpStream::connect_timeout(&addr, IO_TIMEOUT).map_err(|_| {
        ConnectionError::ConnectFailed {
            host: host.to_string(),
            port,
        }
    })?;
    stream
        .set_read_timeout(Some(IO_TIMEOUT))
        .map_err(ConnectionError::SocketFailed)?;
    stream
        .set_write_timeout(Some(IO_TIMEOUT))
        .map_err(ConnectionError::SocketFailed)?;
    stream
        .set_nodelay(true)
        .map_err(ConnectionError::SocketFailed)?;

    debug!(host, port, "connected");
    Ok(BufReader::new(stream))
}

/// Writes the entire request, retrying short writes. A write error or a
/// zero-byte write before completion is a [`ConnectionError::SendFailed`].
pub fn send_all(stream: &mut TcpStream, bytes: &[u8]) -> Result<(), ConnectionError> {
    let mut sent = 0;
    while sent < bytes.len() {
        match stream.write(&bytes[sent..]) {
            Ok(0) | Err(_) => return Err(ConnectionError::SendFailed),
            Ok(n) => sent += n,
        }
    }
    Ok(())
}
