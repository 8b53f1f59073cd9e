//! Per-invocation download settings and rate-limit string parsing.

use std::path::PathBuf;

use crate::error::{ErrorKind, FetchError};
use crate::planner::{ResumeMetadata, MAX_THREADS};

/// Settings for one download run. The engine reads no environment and no
/// config files; everything it needs arrives here.
#[derive(Debug, Clone, Default)]
pub struct DownloadConfig {
    /// Final output path. Empty means "use the resolved filename in cwd".
    pub output_path: PathBuf,
    /// Requested worker count; clamped to `1..=32` by the planner.
    pub threads: usize,
    /// Global bandwidth cap in bytes/sec. 0 means unlimited.
    pub rate_limit_bps: u64,
    /// Optional proxy URL (http://, https:// or socks5://).
    pub proxy_url: Option<String>,
    /// Suppress progress output.
    pub quiet: bool,
    /// Pre-loaded resume state (set by `resume`, not by callers).
    pub resume_data: Option<ResumeMetadata>,
}

impl DownloadConfig {
    /// Requested thread count clamped to the supported range.
    pub fn normalized_threads(&self) -> usize {
        self.threads.clamp(1, MAX_THREADS)
    }

    pub fn validate(&self) -> Result<(), FetchError> {
        if let Some(ref proxy) = self.proxy_url {
            let ok = proxy.starts_with("http://")
                || proxy.starts_with("https://")
                || proxy.starts_with("socks5://");
            if !ok {
                return Err(FetchError::new(
                    ErrorKind::InvalidUrl,
                    0,
                    format!("unsupported proxy scheme in {:?}", proxy),
                )
                .with_suggestion("Use an http://, https:// or socks5:// proxy URL"));
            }
        }
        Ok(())
    }
}

/// Parse a human-readable rate limit ("5M", "500K", "1.5G", "2048") into
/// bytes per second. Empty input means unlimited (0).
pub fn parse_rate_limit(input: &str) -> Result<u64, FetchError> {
    let s = input.trim();
    if s.is_empty() {
        return Ok(0);
    }
    if let Ok(v) = s.parse::<u64>() {
        return Ok(v);
    }

    let upper = s.to_ascii_uppercase();
    let (num, multiplier) = if let Some(rest) = strip_any(&upper, &["KB", "K"]) {
        (rest, 1024u64)
    } else if let Some(rest) = strip_any(&upper, &["MB", "M"]) {
        (rest, 1024 * 1024)
    } else if let Some(rest) = strip_any(&upper, &["GB", "G"]) {
        (rest, 1024 * 1024 * 1024)
    } else if let Some(rest) = strip_any(&upper, &["TB", "T"]) {
        (rest, 1024u64.pow(4))
    } else if let Some(rest) = upper.strip_suffix('B') {
        (rest, 1)
    } else {
        return Err(invalid_rate(input, "unsupported suffix"));
    };

    let value: f64 = num
        .trim()
        .parse()
        .map_err(|_| invalid_rate(input, "invalid numeric value"))?;
    if value < 0.0 {
        return Err(invalid_rate(input, "rate cannot be negative"));
    }
    let bytes = value * multiplier as f64;
    if !bytes.is_finite() || bytes > u64::MAX as f64 {
        return Err(invalid_rate(input, "rate value overflow"));
    }
    Ok(bytes as u64)
}

fn strip_any<'a>(s: &'a str, suffixes: &[&str]) -> Option<&'a str> {
    suffixes.iter().find_map(|suf| s.strip_suffix(suf))
}

fn invalid_rate(input: &str, why: &str) -> FetchError {
    FetchError::new(
        ErrorKind::InvalidUrl,
        0,
        format!("invalid rate limit {:?}: {}", input, why),
    )
    .with_suggestion("Use formats like 1M (1 MiB/s), 500K, 2G, or a plain byte count")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_clamping() {
        let mut cfg = DownloadConfig::default();
        cfg.threads = 0;
        assert_eq!(cfg.normalized_threads(), 1);
        cfg.threads = 8;
        assert_eq!(cfg.normalized_threads(), 8);
        cfg.threads = 100;
        assert_eq!(cfg.normalized_threads(), 32);
    }

    #[test]
    fn proxy_scheme_validation() {
        let mut cfg = DownloadConfig::default();
        assert!(cfg.validate().is_ok());
        cfg.proxy_url = Some("socks5://127.0.0.1:1080".into());
        assert!(cfg.validate().is_ok());
        cfg.proxy_url = Some("ftp://proxy:21".into());
        let err = cfg.validate().unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidUrl);
    }

    #[test]
    fn rate_limit_plain_bytes_and_empty() {
        assert_eq!(parse_rate_limit("").unwrap(), 0);
        assert_eq!(parse_rate_limit("  ").unwrap(), 0);
        assert_eq!(parse_rate_limit("2048").unwrap(), 2048);
    }

    #[test]
    fn rate_limit_suffixes() {
        assert_eq!(parse_rate_limit("1K").unwrap(), 1024);
        assert_eq!(parse_rate_limit("1KB").unwrap(), 1024);
        assert_eq!(parse_rate_limit("5M").unwrap(), 5 * 1024 * 1024);
        assert_eq!(parse_rate_limit("5mb").unwrap(), 5 * 1024 * 1024);
        assert_eq!(parse_rate_limit("1G").unwrap(), 1024 * 1024 * 1024);
        assert_eq!(parse_rate_limit("1T").unwrap(), 1024u64.pow(4));
        assert_eq!(parse_rate_limit("512B").unwrap(), 512);
    }

    #[test]
    fn rate_limit_fractional() {
        assert_eq!(parse_rate_limit("1.5M").unwrap(), 1_572_864);
        assert_eq!(parse_rate_limit("0.5K").unwrap(), 512);
    }

    #[test]
    fn rate_limit_rejects_garbage() {
        assert!(parse_rate_limit("fast").is_err());
        assert!(parse_rate_limit("-1M").is_err());
        assert!(parse_rate_limit("1X").is_err());
    }
}
