//! Opaque credentials forwarded on HTTP requests.

/// Cookies plus an optional user-agent, produced by an external auth provider
/// (cookie file loader, browser export, ...). The engine never inspects the
/// values; the transport forwards them as a `Cookie` header and must keep them
/// out of logs and error context.
#[derive(Debug, Clone, Default)]
pub struct AuthContext {
    /// Cookie name/value pairs, sent verbatim.
    pub cookies: Vec<(String, String)>,
    /// When set, overrides the transport's rotating user-agent as the
    /// starting value.
    pub user_agent: Option<String>,
}

impl AuthContext {
    /// Render the `Cookie` header value, or None when no cookies are present.
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        let joined = self
            .cookies
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join("; ");
        Some(joined)
    }
}
