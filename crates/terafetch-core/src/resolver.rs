//! Resolver seam: turns a share URL into concrete file facts.
//!
//! The engine only depends on the `LinkResolver` trait and treats the
//! resolved `direct_url` as opaque. Service-specific resolution (share APIs,
//! scraping) lives behind this trait; `DirectResolver` covers the plain case
//! where the input already is a direct URL.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::auth::AuthContext;
use crate::error::{ErrorKind, FetchError};
use crate::probe;
use crate::transport::HttpTransport;

/// Everything the engine needs to know about one downloadable file.
/// Immutable once resolved; serialized inside the resume sidecar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub filename: String,
    pub size: u64,
    pub direct_url: String,
    pub share_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

/// Translates a share URL into `FileMetadata`.
pub trait LinkResolver {
    fn resolve(
        &self,
        share_url: &str,
        auth: Option<&AuthContext>,
    ) -> Result<FileMetadata, FetchError>;
}

/// Resolver for URLs that already point at the file: probes the size with a
/// one-byte ranged GET and derives the filename from the response or the
/// URL path.
pub struct DirectResolver {
    transport: Arc<HttpTransport>,
}

impl DirectResolver {
    pub fn new(transport: Arc<HttpTransport>) -> Self {
        Self { transport }
    }
}

impl LinkResolver for DirectResolver {
    fn resolve(
        &self,
        share_url: &str,
        _auth: Option<&AuthContext>,
    ) -> Result<FileMetadata, FetchError> {
        if !share_url.starts_with("http://") && !share_url.starts_with("https://") {
            return Err(FetchError::new(
                ErrorKind::InvalidUrl,
                0,
                format!("not an HTTP(S) URL: {}", crate::error::redact_url(share_url)),
            ));
        }
        let probed = probe::probe_size(&self.transport, share_url)?;
        let size = probed.size.ok_or_else(|| {
            FetchError::new(
                ErrorKind::InvalidResponse,
                0,
                "server did not report a file size",
            )
            .with_url(share_url)
        })?;
        let filename = probed
            .filename_hint
            .unwrap_or_else(|| filename_from_url(share_url));
        Ok(FileMetadata {
            filename,
            size,
            direct_url: share_url.to_string(),
            share_id: crate::error::redact_url(share_url),
            timestamp: Utc::now(),
            checksum: None,
        })
    }
}

/// Last path segment of the URL, or a generic name when the path is bare.
pub(crate) fn filename_from_url(url: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    let name = without_query
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or("");
    if name.is_empty() || name.contains(':') {
        "download.bin".to_string()
    } else {
        name.to_string()
    }
}
