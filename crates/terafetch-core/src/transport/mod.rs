//! HTTP transport: ranged GETs through libcurl with retry, rotating
//! user agents, and typed failure classification.
//!
//! One transport instance is shared by all workers. Mutable state (the
//! user-agent cursor) sits behind a lock; everything else is read-only after
//! construction. Requests follow up to 10 redirects, verify TLS, and carry
//! browser-mimicking headers plus the auth cookies when present.

mod agents;
mod classify;
mod retry;

pub use retry::RetryConfig;

use std::cell::{Cell, RefCell};
use std::sync::RwLock;
use std::time::Duration;

use crate::auth::AuthContext;
use crate::cancel::CancelToken;
use crate::error::{ErrorKind, FetchError};

use agents::{BROWSER_HEADERS, USER_AGENTS};
use classify::{classify_curl_error, classify_http_status, parse_http_status, parse_retry_after};

/// Transport tuning. Defaults suit metadata requests; the engine raises
/// `transfer_timeout` for multi-minute segment bodies.
#[derive(Debug, Clone, Default)]
pub struct TransportConfig {
    pub connect_timeout: Option<Duration>,
    /// Overall cap for buffered requests.
    pub request_timeout: Option<Duration>,
    /// Overall cap for streaming range requests.
    pub transfer_timeout: Option<Duration>,
    pub proxy_url: Option<String>,
    pub retry: Option<RetryConfig>,
    pub auth: Option<AuthContext>,
}

/// A fully buffered response. Only produced for 200/206.
#[derive(Debug)]
pub struct HttpResponse {
    pub status: u32,
    /// Raw `Name: value` lines of the final response (redirects dropped).
    pub headers: Vec<String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        classify::header_value(&self.headers, name)
    }
}

struct AgentState {
    index: usize,
    current: String,
}

pub struct HttpTransport {
    connect_timeout: Duration,
    request_timeout: Duration,
    transfer_timeout: Duration,
    proxy_url: Option<String>,
    retry: RetryConfig,
    cookie_header: Option<String>,
    agent: RwLock<AgentState>,
}

impl HttpTransport {
    pub fn new(config: TransportConfig) -> Self {
        let cookie_header = config.auth.as_ref().and_then(|a| a.cookie_header());
        let current = config
            .auth
            .as_ref()
            .and_then(|a| a.user_agent.clone())
            .unwrap_or_else(|| USER_AGENTS[0].to_string());
        Self {
            connect_timeout: config.connect_timeout.unwrap_or(Duration::from_secs(10)),
            request_timeout: config.request_timeout.unwrap_or(Duration::from_secs(30)),
            transfer_timeout: config.transfer_timeout.unwrap_or(Duration::from_secs(3600)),
            proxy_url: config.proxy_url,
            retry: config.retry.unwrap_or_default(),
            cookie_header,
            agent: RwLock::new(AgentState { index: 0, current }),
        }
    }

    /// Advance to the next user agent in the rotation.
    pub fn rotate_user_agent(&self) {
        let mut agent = self.agent.write().unwrap();
        agent.index = (agent.index + 1) % USER_AGENTS.len();
        agent.current = USER_AGENTS[agent.index].to_string();
    }

    pub fn current_user_agent(&self) -> String {
        self.agent.read().unwrap().current.clone()
    }

    pub fn set_user_agent(&self, user_agent: impl Into<String>) {
        self.agent.write().unwrap().current = user_agent.into();
    }

    /// Buffered GET with retry. Returns only 200/206 responses; everything
    /// else surfaces as a typed error.
    pub fn get(&self, url: &str, extra_headers: &[(String, String)]) -> Result<HttpResponse, FetchError> {
        let mut last: Option<FetchError> = None;
        for attempt in 1..=self.retry.max_attempts {
            if attempt > 1 {
                std::thread::sleep(self.retry_delay(last.as_ref(), attempt));
            }
            match self.attempt_get(url, extra_headers) {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    if e.code == 403 {
                        self.rotate_user_agent();
                    }
                    if !e.is_retryable() {
                        return Err(e);
                    }
                    tracing::debug!(attempt, error = %e, "GET failed, will retry");
                    last = Some(e);
                }
            }
        }
        Err(self.exhausted(last))
    }

    /// Streaming ranged GET with retry. `sink` receives `(offset_in_range,
    /// chunk)` pairs and may abort by returning an error; the offset restarts
    /// at 0 on every retry attempt, so positional sinks rewrite the same
    /// region instead of corrupting it. Returns the delivered byte count,
    /// which on success equals `end - start + 1`.
    pub fn get_range_to(
        &self,
        url: &str,
        start: u64,
        end: u64,
        cancel: &CancelToken,
        sink: &mut dyn FnMut(u64, &[u8]) -> Result<(), FetchError>,
    ) -> Result<u64, FetchError> {
        let mut last: Option<FetchError> = None;
        for attempt in 1..=self.retry.max_attempts {
            if cancel.is_cancelled() {
                return Err(FetchError::cancelled());
            }
            if attempt > 1 && !cancel.sleep(self.retry_delay(last.as_ref(), attempt)) {
                return Err(FetchError::cancelled());
            }
            match self.attempt_range(url, start, end, cancel, sink) {
                Ok(n) => return Ok(n),
                Err(e) => {
                    if e.kind == ErrorKind::Cancelled {
                        return Err(e);
                    }
                    if e.code == 403 {
                        self.rotate_user_agent();
                    }
                    if !e.is_retryable() {
                        return Err(e);
                    }
                    tracing::debug!(attempt, start, end, error = %e, "range GET failed, will retry");
                    last = Some(e);
                }
            }
        }
        Err(self.exhausted(last))
    }

    fn retry_delay(&self, last: Option<&FetchError>, attempt: u32) -> Duration {
        // A server-sent Retry-After wins over the backoff schedule, bounded
        // by the configured cap so a hostile header cannot stall us forever.
        match last.and_then(|e| e.retry_after) {
            Some(secs) => Duration::from_secs(secs).min(self.retry.max_delay),
            None => self.retry.delay_for(attempt - 1),
        }
    }

    fn exhausted(&self, last: Option<FetchError>) -> FetchError {
        let attempts = self.retry.max_attempts;
        match last {
            Some(e) => e.with_context("attempts", attempts.to_string()),
            None => FetchError::new(
                ErrorKind::DownloadFailed,
                0,
                format!("request failed after {} attempts", attempts),
            ),
        }
    }

    fn attempt_get(
        &self,
        url: &str,
        extra_headers: &[(String, String)],
    ) -> Result<HttpResponse, FetchError> {
        let mut easy = self.prepare_easy(url, extra_headers, false)?;
        let headers: RefCell<Vec<String>> = RefCell::new(Vec::new());
        let body: RefCell<Vec<u8>> = RefCell::new(Vec::new());
        {
            let mut transfer = easy.transfer();
            transfer
                .header_function(|line| {
                    collect_header(&headers, line);
                    true
                })
                .map_err(setup_err)?;
            transfer
                .write_function(|data| {
                    // Error bodies are swallowed; the status decides below.
                    if matches!(parse_http_status(&headers.borrow()), Some(200) | Some(206)) {
                        body.borrow_mut().extend_from_slice(data);
                    }
                    Ok(data.len())
                })
                .map_err(setup_err)?;
            transfer
                .perform()
                .map_err(|e| classify_curl_error(&e).with_url(url))?;
        }
        let code = easy.response_code().map_err(setup_err)?;
        let headers = headers.into_inner();
        if let Some(err) = classify_http_status(code, parse_retry_after(&headers)) {
            return Err(err.with_url(url));
        }
        Ok(HttpResponse {
            status: code,
            headers,
            body: body.into_inner(),
        })
    }

    fn attempt_range(
        &self,
        url: &str,
        start: u64,
        end: u64,
        cancel: &CancelToken,
        sink: &mut dyn FnMut(u64, &[u8]) -> Result<(), FetchError>,
    ) -> Result<u64, FetchError> {
        let expected = end - start + 1;
        let mut easy = self.prepare_easy(url, &[], true)?;
        easy.range(&format!("{}-{}", start, end)).map_err(setup_err)?;

        let headers: RefCell<Vec<String>> = RefCell::new(Vec::new());
        let sink_error: RefCell<Option<FetchError>> = RefCell::new(None);
        let delivered = Cell::new(0u64);
        {
            let mut transfer = easy.transfer();
            transfer
                .header_function(|line| {
                    collect_header(&headers, line);
                    true
                })
                .map_err(setup_err)?;
            transfer
                .write_function(|data| {
                    if cancel.is_cancelled() {
                        *sink_error.borrow_mut() = Some(FetchError::cancelled());
                        return Ok(0);
                    }
                    // 206 always carries our range; a 200 body only lines up
                    // with the file when the range starts at zero.
                    let deliverable = match parse_http_status(&headers.borrow()) {
                        Some(206) => true,
                        Some(200) => start == 0,
                        _ => false,
                    };
                    if !deliverable {
                        return Ok(data.len());
                    }
                    let remaining = (expected - delivered.get()) as usize;
                    if remaining == 0 {
                        return Ok(data.len());
                    }
                    let take = data.len().min(remaining);
                    match sink(delivered.get(), &data[..take]) {
                        Ok(()) => {
                            delivered.set(delivered.get() + take as u64);
                            Ok(data.len())
                        }
                        Err(e) => {
                            *sink_error.borrow_mut() = Some(e);
                            Ok(0)
                        }
                    }
                })
                .map_err(setup_err)?;
            if let Err(e) = transfer.perform() {
                if let Some(err) = sink_error.borrow_mut().take() {
                    return Err(err);
                }
                return Err(classify_curl_error(&e).with_url(url));
            }
        }

        let code = easy.response_code().map_err(setup_err)?;
        let headers = headers.into_inner();
        if let Some(err) = classify_http_status(code, parse_retry_after(&headers)) {
            return Err(err.with_url(url));
        }
        if code == 200 && start != 0 {
            return Err(FetchError::new(
                ErrorKind::InvalidResponse,
                code,
                "server ignored the range request",
            )
            .with_url(url));
        }
        let got = delivered.get();
        if got != expected {
            return Err(FetchError::new(
                ErrorKind::NetworkTimeout,
                0,
                format!(
                    "connection closed early: got {} of {} bytes",
                    got, expected
                ),
            ));
        }
        Ok(got)
    }

    fn prepare_easy(
        &self,
        url: &str,
        extra_headers: &[(String, String)],
        streaming: bool,
    ) -> Result<curl::easy::Easy, FetchError> {
        let mut easy = curl::easy::Easy::new();
        easy.url(url).map_err(|e| classify_curl_error(&e))?;
        easy.useragent(&self.current_user_agent()).map_err(setup_err)?;
        easy.follow_location(true).map_err(setup_err)?;
        easy.max_redirections(10).map_err(setup_err)?;
        easy.connect_timeout(self.connect_timeout).map_err(setup_err)?;
        if streaming {
            easy.timeout(self.transfer_timeout).map_err(setup_err)?;
            // Abort when throughput sits under 1 KiB/s for a minute; kinder
            // to large segments on slow links than a short wall-clock cap.
            easy.low_speed_limit(1024).map_err(setup_err)?;
            easy.low_speed_time(Duration::from_secs(60)).map_err(setup_err)?;
            easy.buffer_size(32 * 1024).map_err(setup_err)?;
        } else {
            easy.timeout(self.request_timeout).map_err(setup_err)?;
        }
        if let Some(ref proxy) = self.proxy_url {
            easy.proxy(proxy).map_err(setup_err)?;
        }

        let mut list = curl::easy::List::new();
        for (name, value) in BROWSER_HEADERS {
            list.append(&format!("{}: {}", name, value)).map_err(setup_err)?;
        }
        if let Some(ref cookie) = self.cookie_header {
            list.append(&format!("Cookie: {}", cookie)).map_err(setup_err)?;
        }
        for (name, value) in extra_headers {
            list.append(&format!("{}: {}", name.trim(), value.trim()))
                .map_err(setup_err)?;
        }
        easy.http_headers(list).map_err(setup_err)?;
        Ok(easy)
    }
}

/// Accumulate header lines, restarting on each `HTTP/` status line so only
/// the final response of a redirect chain is kept.
fn collect_header(headers: &RefCell<Vec<String>>, line: &[u8]) {
    if let Ok(s) = std::str::from_utf8(line) {
        let line = s.trim_end();
        let mut headers = headers.borrow_mut();
        if line.starts_with("HTTP/") {
            headers.clear();
        }
        if !line.is_empty() {
            headers.push(line.to_string());
        }
    }
}

fn setup_err(e: curl::Error) -> FetchError {
    FetchError::new(ErrorKind::DownloadFailed, 0, format!("curl: {}", e))
}
