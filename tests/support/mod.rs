//! In-process HTTP/1.1 fixture server for engine tests.
//!
//! Serves a fixed body over plain TCP, one request per connection
//! (`Connection: close` discipline), with optional `Accept-Ranges: bytes`
//! support and optional throttling so tests can pause or cancel
//! mid-transfer.

use sha2::{Digest, Sha256};
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub struct ServerConfig {
    /// Advertise and honor `Range` requests.
    pub accept_ranges: bool,
    /// Bytes per write burst and the delay between bursts.
    pub throttle: Option<(usize, Duration)>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            accept_ranges: true,
            throttle: None,
        }
    }
}

pub struct TestServer {
    addr: SocketAddr,
    body: Arc<Vec<u8>>,
    stop: Arc<AtomicBool>,
}

impl TestServer {
    pub fn serve(body: Vec<u8>, config: ServerConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind fixture server");
        let addr = listener.local_addr().expect("fixture server addr");
        let body = Arc::new(body);
        let stop = Arc::new(AtomicBool::new(false));
        let config = Arc::new(config);

        {
            let body = Arc::clone(&body);
            let stop = Arc::clone(&stop);
            let config = Arc::clone(&config);
            thread::spawn(move || {
                for incoming in listener.incoming() {
                    if stop.load(Ordering::Acquire) {
                        break;
                    }
                    let Ok(socket) = incoming else { continue };
                    let body = Arc::clone(&body);
                    let config = Arc::clone(&config);
                    thread::spawn(move || handle_client(socket, &body, &config));
                }
            });
        }

        Self { addr, body, stop }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{}", self.addr.port(), path)
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        // Wake the accept loop so it observes the stop flag.
        let _ = TcpStream::connect(self.addr);
    }
}

fn handle_client(mut socket: TcpStream, body: &[u8], config: &ServerConfig) {
    let _ = socket.set_read_timeout(Some(Duration::from_secs(5)));

    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    while !request.windows(4).any(|window| window == b"\r\n\r\n") {
        match socket.read(&mut buf) {
            Ok(0) | Err(_) => return,
            Ok(n) => request.extend_from_slice(&buf[..n]),
        }
        if request.len() > 64 * 1024 {
            return;
        }
    }

    let text = String::from_utf8_lossy(&request);
    let method = text
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().next())
        .unwrap_or("")
        .to_string();

    let range = text.lines().find_map(|line| {
        let lower = line.to_ascii_lowercase();
        lower.strip_prefix("range: bytes=").map(|value| {
            let mut bounds = value.trim().splitn(2, '-');
            let start: u64 = bounds.next().unwrap_or("0").parse().unwrap_or(0);
            let end: u64 = bounds
                .next()
                .unwrap_or("")
                .parse()
                .unwrap_or((body.len() as u64).saturating_sub(1));
            (start, end)
        })
    });

    match method.as_str() {
        "HEAD" => {
            let mut response = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n",
                body.len()
            );
            if config.accept_ranges {
                response.push_str("Accept-Ranges: bytes\r\n");
            }
            response.push_str("Connection: close\r\n\r\n");
            let _ = socket.write_all(response.as_bytes());
        }
        "GET" => {
            let (status, slice) = match range {
                Some((start, end)) if config.accept_ranges && (start as usize) < body.len() => {
                    let end = (end as usize).min(body.len() - 1);
                    ("206 Partial Content", &body[start as usize..=end])
                }
                _ => ("200 OK", body),
            };
            let mut header = format!(
                "HTTP/1.1 {}\r\nContent-Length: {}\r\n",
                status,
                slice.len()
            );
            if config.accept_ranges {
                header.push_str("Accept-Ranges: bytes\r\n");
            }
            header.push_str("Connection: close\r\n\r\n");
            if socket.write_all(header.as_bytes()).is_err() {
                return;
            }
            match config.throttle {
                None => {
                    let _ = socket.write_all(slice);
                }
                Some((burst, delay)) => {
                    for piece in slice.chunks(burst.max(1)) {
                        if socket.write_all(piece).is_err() {
                            return;
                        }
                        thread::sleep(delay);
                    }
                }
            }
        }
        _ => {}
    }

    let _ = socket.shutdown(Shutdown::Both);
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Deterministic non-repeating test payload.
pub fn patterned_body(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + 7) % 251) as u8).collect()
}

/// Polls `condition` every 20 ms until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    condition()
}
