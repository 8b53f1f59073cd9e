//! Typed download errors: kind, severity, retryability, remediation.
//!
//! The transport and planner classify failures into these kinds so callers can
//! decide retries without string matching. Error text never carries cookie or
//! token values; URLs are stored with their query string stripped.

use std::collections::BTreeMap;
use std::fmt;

/// High-level classification of a download failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidUrl,
    AuthRequired,
    RateLimit,
    NetworkTimeout,
    FileNotFound,
    QuotaExceeded,
    InvalidResponse,
    DownloadFailed,
    PermissionDenied,
    DiskSpace,
    CorruptedFile,
    RangeNotSatisfiable,
    ResumeDataCorrupted,
    ResumeIncompatible,
    PartialFileInvalid,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidUrl => "InvalidURL",
            ErrorKind::AuthRequired => "AuthRequired",
            ErrorKind::RateLimit => "RateLimit",
            ErrorKind::NetworkTimeout => "NetworkTimeout",
            ErrorKind::FileNotFound => "FileNotFound",
            ErrorKind::QuotaExceeded => "QuotaExceeded",
            ErrorKind::InvalidResponse => "InvalidResponse",
            ErrorKind::DownloadFailed => "DownloadFailed",
            ErrorKind::PermissionDenied => "PermissionDenied",
            ErrorKind::DiskSpace => "DiskSpace",
            ErrorKind::CorruptedFile => "CorruptedFile",
            ErrorKind::RangeNotSatisfiable => "RangeNotSatisfiable",
            ErrorKind::ResumeDataCorrupted => "ResumeDataCorrupted",
            ErrorKind::ResumeIncompatible => "ResumeIncompatible",
            ErrorKind::PartialFileInvalid => "PartialFileInvalid",
            ErrorKind::Cancelled => "Cancelled",
        }
    }

    fn default_severity(&self) -> Severity {
        match self {
            ErrorKind::RateLimit | ErrorKind::NetworkTimeout => Severity::Warning,
            ErrorKind::QuotaExceeded | ErrorKind::PermissionDenied | ErrorKind::DiskSpace => {
                Severity::Critical
            }
            ErrorKind::Cancelled => Severity::Info,
            _ => Severity::Error,
        }
    }

    fn default_suggestion(&self, code: u32) -> Option<&'static str> {
        let s = match self {
            ErrorKind::InvalidUrl => "Provide a valid share URL (e.g. https://terabox.com/s/...)",
            ErrorKind::AuthRequired => {
                "Provide valid cookies with --cookies; the share may require a signed-in account"
            }
            ErrorKind::RateLimit => {
                "Wait before retrying, or lower bandwidth usage with --limit-rate"
            }
            ErrorKind::NetworkTimeout => {
                "Check your connection and retry; a proxy may help on unstable links"
            }
            ErrorKind::FileNotFound => "Verify the share link is still valid and the file exists",
            ErrorKind::QuotaExceeded => "Download quota exhausted; try again later",
            ErrorKind::InvalidResponse => {
                if code >= 500 {
                    "Server error; try again later"
                } else {
                    "Unexpected response from server; the link may be invalid"
                }
            }
            ErrorKind::DownloadFailed => "Check disk space and network connection, then retry",
            ErrorKind::PermissionDenied => "Check file and directory permissions",
            ErrorKind::DiskSpace => "Free up disk space or choose another output directory",
            ErrorKind::CorruptedFile => "Delete the output file and download again",
            ErrorKind::RangeNotSatisfiable => {
                "The requested byte range is invalid; restart the download"
            }
            ErrorKind::ResumeDataCorrupted => {
                "Delete the .terafetch.json file and restart the download"
            }
            ErrorKind::ResumeIncompatible => {
                "Delete the .part and .terafetch.json files and restart the download"
            }
            ErrorKind::PartialFileInvalid => "Delete the .part file and restart the download",
            ErrorKind::Cancelled => return None,
        };
        Some(s)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How serious an error is for the caller. `Critical` should stop execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}

/// A classified download error.
///
/// `code` is the HTTP status when one exists, otherwise 0. `context` holds
/// free-form key/value details (segment index, paths, redacted URL).
#[derive(Debug, Clone)]
pub struct FetchError {
    pub kind: ErrorKind,
    pub code: u32,
    pub message: String,
    pub severity: Severity,
    pub suggestion: Option<String>,
    /// Server-directed wait in seconds (from `Retry-After`).
    pub retry_after: Option<u64>,
    pub context: BTreeMap<String, String>,
}

impl FetchError {
    pub fn new(kind: ErrorKind, code: u32, message: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            severity: kind.default_severity(),
            suggestion: kind.default_suggestion(code).map(str::to_string),
            message: message.into(),
            retry_after: None,
            context: BTreeMap::new(),
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after = Some(seconds);
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Attach a URL to the context with its query string removed. Signed
    /// direct URLs carry credentials in the query, which must never leak
    /// into error output.
    pub fn with_url(self, url: &str) -> Self {
        self.with_context("url", redact_url(url))
    }

    pub fn is_retryable(&self) -> bool {
        match self.kind {
            ErrorKind::NetworkTimeout | ErrorKind::RateLimit => true,
            ErrorKind::InvalidResponse => self.code >= 500,
            _ => false,
        }
    }

    pub fn is_critical(&self) -> bool {
        self.severity == Severity::Critical
    }

    /// Map an I/O failure to the taxonomy: out-of-space and permission
    /// problems get their own kinds so the CLI can suggest remediation.
    pub fn from_io(kind: ErrorKind, err: &std::io::Error, what: impl fmt::Display) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
            std::io::ErrorKind::StorageFull => ErrorKind::DiskSpace,
            _ => kind,
        };
        FetchError::new(kind, 0, format!("{}: {}", what, err))
    }

    pub fn cancelled() -> Self {
        FetchError::new(ErrorKind::Cancelled, 0, "operation cancelled")
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.code != 0 {
            write!(f, "{} (HTTP {}): {}", self.kind, self.code, self.message)?;
        } else {
            write!(f, "{}: {}", self.kind, self.message)?;
        }
        if let Some(secs) = self.retry_after {
            write!(f, " (retry after {}s)", secs)?;
        }
        if let Some(ref s) = self.suggestion {
            write!(f, " - {}", s)?;
        }
        Ok(())
    }
}

impl std::error::Error for FetchError {}

/// Strip the query string from a URL so signed tokens never reach logs.
pub fn redact_url(url: &str) -> String {
    match url.split_once('?') {
        Some((base, _)) => format!("{}?[redacted]", base),
        None => url.to_string(),
    }
}
