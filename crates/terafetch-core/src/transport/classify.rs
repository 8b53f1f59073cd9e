//! Map curl failures and HTTP status codes onto the error taxonomy.

use crate::error::{ErrorKind, FetchError};

/// Classify a curl transfer error. Network-class failures (timeouts, refused
/// or reset connections, DNS, truncated reads) come back as retryable
/// `NetworkTimeout`; malformed URLs and TLS problems do not.
pub(super) fn classify_curl_error(e: &curl::Error) -> FetchError {
    if e.is_url_malformed() || e.is_unsupported_protocol() {
        return FetchError::new(ErrorKind::InvalidUrl, 0, e.to_string());
    }
    if e.is_ssl_connect_error() || e.is_ssl_certproblem() || e.is_peer_failed_verification() {
        return FetchError::new(
            ErrorKind::InvalidResponse,
            0,
            format!("TLS failure: {}", e),
        );
    }
    FetchError::new(ErrorKind::NetworkTimeout, 0, e.to_string())
}

/// Classify a response status. `None` means the status is acceptable.
pub(super) fn classify_http_status(
    code: u32,
    retry_after: Option<u64>,
) -> Option<FetchError> {
    match code {
        200 | 206 => None,
        401 => Some(FetchError::new(
            ErrorKind::AuthRequired,
            code,
            "authentication required",
        )),
        403 => Some(FetchError::new(
            ErrorKind::RateLimit,
            code,
            "access forbidden, rotating user agent",
        )),
        404 => Some(FetchError::new(
            ErrorKind::FileNotFound,
            code,
            "file not found or share link expired",
        )),
        416 => Some(FetchError::new(
            ErrorKind::RangeNotSatisfiable,
            code,
            "requested range not satisfiable",
        )),
        429 => {
            let mut err = FetchError::new(ErrorKind::RateLimit, code, "rate limited by server");
            if let Some(secs) = retry_after {
                err = err.with_retry_after(secs);
            }
            Some(err)
        }
        500..=599 => Some(FetchError::new(
            ErrorKind::InvalidResponse,
            code,
            "server error",
        )),
        _ => Some(FetchError::new(
            ErrorKind::InvalidResponse,
            code,
            "unexpected response status",
        )),
    }
}

/// Parse the status code out of a header block's `HTTP/...` line.
pub(super) fn parse_http_status(headers: &[String]) -> Option<u32> {
    let line = headers.iter().find(|l| l.starts_with("HTTP/"))?;
    line.split_whitespace().nth(1)?.parse().ok()
}

/// Case-insensitive header lookup over raw `Name: value` lines.
pub(super) fn header_value<'a>(headers: &'a [String], name: &str) -> Option<&'a str> {
    headers.iter().find_map(|line| {
        let (n, v) = line.split_once(':')?;
        if n.trim().eq_ignore_ascii_case(name) {
            Some(v.trim())
        } else {
            None
        }
    })
}

/// `Retry-After` in seconds, when present and numeric.
pub(super) fn parse_retry_after(headers: &[String]) -> Option<u64> {
    header_value(headers, "retry-after")?.parse().ok()
}
