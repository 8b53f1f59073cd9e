//! Minimal HTTP/1.1 fixture server with Range support and fault injection.
//!
//! Serves a single static body. GET with `Range: bytes=S-E` answers 206 with
//! that slice; GET without a range answers 200 with the whole body. Faults:
//! a 403 budget (for user-agent rotation tests), permanent 429 with a
//! `Retry-After` header, a 404 mode, and a toggleable "close the connection
//! when the requested range starts at or past a threshold" interruption.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

#[derive(Debug, Clone, Default)]
pub struct RangeServerOptions {
    /// Respond 403 to this many requests before serving normally.
    pub forbidden_first: usize,
    /// Always respond 429 with this `Retry-After` value.
    pub always_rate_limited: Option<u64>,
    /// Always respond 404.
    pub not_found: bool,
    /// While enabled, close the connection without a response for any
    /// request whose range starts at or beyond this offset.
    pub interrupt_at_or_after: Option<u64>,
    /// `Content-Disposition` header to include on responses.
    pub content_disposition: Option<String>,
}

/// One observed request.
#[derive(Debug, Clone)]
pub struct RequestRecord {
    pub method: String,
    pub range: Option<(u64, u64)>,
    pub user_agent: Option<String>,
}

pub struct TestServer {
    pub url: String,
    requests: Arc<Mutex<Vec<RequestRecord>>>,
    interrupt_enabled: Arc<AtomicBool>,
}

impl TestServer {
    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<RequestRecord> {
        self.requests.lock().unwrap().clone()
    }

    /// Count of requests that carried a Range header.
    pub fn ranged_request_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.range.is_some())
            .count()
    }

    /// Turn the connection-drop fault off (used by resume tests).
    pub fn disable_interruption(&self) {
        self.interrupt_enabled.store(false, Ordering::Relaxed);
    }
}

pub fn start(body: Vec<u8>) -> TestServer {
    start_with_options(body, RangeServerOptions::default())
}

pub fn start_with_options(body: Vec<u8>, opts: RangeServerOptions) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind test server");
    let port = listener.local_addr().unwrap().port();
    let body = Arc::new(body);
    let requests: Arc<Mutex<Vec<RequestRecord>>> = Arc::new(Mutex::new(Vec::new()));
    let interrupt_enabled = Arc::new(AtomicBool::new(opts.interrupt_at_or_after.is_some()));
    let forbidden_left = Arc::new(AtomicUsize::new(opts.forbidden_first));

    {
        let body = Arc::clone(&body);
        let requests = Arc::clone(&requests);
        let interrupt_enabled = Arc::clone(&interrupt_enabled);
        let forbidden_left = Arc::clone(&forbidden_left);
        thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                let body = Arc::clone(&body);
                let requests = Arc::clone(&requests);
                let interrupt_enabled = Arc::clone(&interrupt_enabled);
                let forbidden_left = Arc::clone(&forbidden_left);
                let opts = opts.clone();
                thread::spawn(move || {
                    handle(stream, &body, &opts, &requests, &interrupt_enabled, &forbidden_left)
                });
            }
        });
    }

    TestServer {
        url: format!("http://127.0.0.1:{}/data.bin", port),
        requests,
        interrupt_enabled,
    }
}

fn handle(
    mut stream: TcpStream,
    body: &[u8],
    opts: &RangeServerOptions,
    requests: &Mutex<Vec<RequestRecord>>,
    interrupt_enabled: &AtomicBool,
    forbidden_left: &AtomicUsize,
) {
    let _ = stream.set_read_timeout(Some(std::time::Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(std::time::Duration::from_secs(2)));
    let mut buf = [0u8; 8192];
    let n = match stream.read(&mut buf) {
        Ok(0) | Err(_) => return,
        Ok(n) => n,
    };
    let request = match std::str::from_utf8(&buf[..n]) {
        Ok(s) => s,
        Err(_) => return,
    };
    let record = parse_request(request);
    let range = record.range;
    requests.lock().unwrap().push(record);

    if opts.not_found {
        let _ = stream.write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n");
        return;
    }
    if let Some(retry_after) = opts.always_rate_limited {
        let response = format!(
            "HTTP/1.1 429 Too Many Requests\r\nRetry-After: {}\r\nContent-Length: 0\r\n\r\n",
            retry_after
        );
        let _ = stream.write_all(response.as_bytes());
        return;
    }
    if forbidden_left
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1))
        .is_ok()
    {
        let _ = stream.write_all(b"HTTP/1.1 403 Forbidden\r\nContent-Length: 0\r\n\r\n");
        return;
    }
    if let Some(threshold) = opts.interrupt_at_or_after {
        if interrupt_enabled.load(Ordering::Relaxed) {
            let start = range.map(|(s, _)| s).unwrap_or(0);
            if start >= threshold {
                // Drop the connection mid-handshake: no status, no body.
                let _ = stream.shutdown(std::net::Shutdown::Both);
                return;
            }
        }
    }

    let total = body.len() as u64;
    let disposition = opts
        .content_disposition
        .as_ref()
        .map(|v| format!("Content-Disposition: {}\r\n", v))
        .unwrap_or_default();

    let (status, content_range, slice) = match range {
        Some(_) if total == 0 => (
            "416 Range Not Satisfiable",
            "bytes */0".to_string(),
            &body[0..0],
        ),
        Some((start, end)) => {
            let start = start.min(total);
            let end = end.min(total.saturating_sub(1));
            if start > end {
                (
                    "416 Range Not Satisfiable",
                    format!("bytes */{}", total),
                    &body[0..0],
                )
            } else {
                let slice = &body[start as usize..=(end as usize)];
                (
                    "206 Partial Content",
                    format!("bytes {}-{}/{}", start, end, total),
                    slice,
                )
            }
        }
        None => (
            "200 OK",
            format!("bytes 0-{}/{}", total.saturating_sub(1), total),
            body,
        ),
    };

    let response = format!(
        "HTTP/1.1 {}\r\nContent-Length: {}\r\nContent-Range: {}\r\nAccept-Ranges: bytes\r\nConnection: close\r\n{}\r\n",
        status,
        slice.len(),
        content_range,
        disposition
    );
    let _ = stream.write_all(response.as_bytes());
    let _ = stream.write_all(slice);
}

/// Pull method, `Range: bytes=S-E`, and `User-Agent` out of the raw request.
fn parse_request(request: &str) -> RequestRecord {
    let mut record = RequestRecord {
        method: String::new(),
        range: None,
        user_agent: None,
    };
    for line in request.lines() {
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        if record.method.is_empty() {
            record.method = line.split_whitespace().next().unwrap_or("").to_string();
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            let value = value.trim();
            if name.trim().eq_ignore_ascii_case("range") {
                if let Some(spec) = value.strip_prefix("bytes=") {
                    if let Some((a, b)) = spec.split_once('-') {
                        let start = a.trim().parse::<u64>().unwrap_or(0);
                        let end = b.trim().parse::<u64>().unwrap_or(u64::MAX);
                        record.range = Some((start, end));
                    }
                }
            } else if name.trim().eq_ignore_ascii_case("user-agent") {
                record.user_agent = Some(value.to_string());
            }
        }
    }
    record
}
