//! Netscape cookie-file loading.
//!
//! Produces an `AuthContext` the engine forwards verbatim. Cookie values are
//! credentials: they are never logged and never appear in error text.

use anyhow::{bail, Context, Result};
use std::path::Path;

use terafetch_core::AuthContext;

/// Parse a Netscape-format cookie file (the format browser exporters and
/// curl use): seven tab-separated fields per line, `#` for comments.
pub fn load_cookie_file(path: &Path) -> Result<AuthContext> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read cookie file {}", path.display()))?;

    let mut cookies = Vec::new();
    for (lineno, line) in data.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 7 {
            bail!(
                "invalid cookie format at line {}: expected 7 tab-separated fields",
                lineno + 1
            );
        }
        let name = fields[5].trim();
        let value = fields[6].trim();
        if name.is_empty() {
            bail!("invalid cookie format at line {}: empty name", lineno + 1);
        }
        cookies.push((name.to_string(), value.to_string()));
    }

    if cookies.is_empty() {
        bail!("no cookies found in {}", path.display());
    }
    tracing::debug!(count = cookies.len(), "loaded cookies");
    Ok(AuthContext {
        cookies,
        user_agent: None,
    })
}
