//! Size/filename probing for direct URLs.
//!
//! The engine never issues anything but GET, so probing uses a one-byte
//! ranged GET (`Range: bytes=0-0`) instead of HEAD. Range-capable servers
//! answer 206 with the total size in `Content-Range`; servers that ignore
//! ranges answer 200 and the size comes from `Content-Length`.

use crate::error::FetchError;
use crate::transport::HttpTransport;

#[derive(Debug, Clone, Default)]
pub struct ProbeResult {
    /// Total file size, when the server reported one.
    pub size: Option<u64>,
    /// True when the server honored the byte range (206).
    pub accept_ranges: bool,
    /// Filename from `Content-Disposition`, when present.
    pub filename_hint: Option<String>,
}

/// Probe `url` for size and filename with a single ranged GET.
pub fn probe_size(transport: &HttpTransport, url: &str) -> Result<ProbeResult, FetchError> {
    let resp = transport.get(url, &[("Range".to_string(), "bytes=0-0".to_string())])?;

    let mut result = ProbeResult {
        filename_hint: resp
            .header("content-disposition")
            .and_then(parse_disposition_filename),
        ..ProbeResult::default()
    };

    if resp.status == 206 {
        result.accept_ranges = true;
        result.size = resp.header("content-range").and_then(content_range_total);
    } else {
        result.size = resp
            .header("content-length")
            .and_then(|v| v.parse().ok())
            .or(Some(resp.body.len() as u64));
    }
    Ok(result)
}

/// Total size out of `bytes 0-0/12345`; `*` means unknown.
fn content_range_total(value: &str) -> Option<u64> {
    let (_, total) = value.split_once('/')?;
    let total = total.trim();
    if total == "*" {
        return None;
    }
    total.parse().ok()
}

/// Filename out of `attachment; filename="name.bin"` (quoted or bare).
fn parse_disposition_filename(value: &str) -> Option<String> {
    let lower = value.to_ascii_lowercase();
    let idx = lower.find("filename=")?;
    let raw = value[idx + "filename=".len()..].trim();
    let name = raw
        .split(';')
        .next()?
        .trim()
        .trim_matches('"')
        .trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}
