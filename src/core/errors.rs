//! Defines the primary error type threaded through every internal layer.

use thiserror::Error;

/// The error taxonomy shared by the path parser, cache, fetcher, sumdb proxy,
/// and dispatcher. Every non-internal variant carries an optional detail that
/// the dispatcher surfaces verbatim in the response body.
#[derive(Error, Debug, Clone)]
pub enum ProxyError {
    /// The requested artifact does not exist, upstream returned 404/410, or
    /// the path/sumdb host failed validation. Soft in the upstream chain:
    /// enables fall-through to the next proxy.
    #[error("not found{}", detail_suffix(.0))]
    NotFound(Option<String>),

    /// Malformed request path, bad `!`-escape, or an unsupported request
    /// kind. Never retried.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Anything other than GET/HEAD. Never retried.
    #[error("method not allowed")]
    MethodNotAllowed,

    /// The caller's context was cancelled while a fetch was in flight.
    #[error("fetch cancelled")]
    FetchCancelled,

    /// The outer fetch deadline elapsed.
    #[error("fetch timed out")]
    FetchTimedOut,

    /// Upstream responded with a non-fall-through status, or the local
    /// toolchain failed for a reason other than "module does not exist".
    /// Hard in the upstream chain: still allowed to continue on a hard
    /// (`|`) fall-through separator, but not on a soft (`,`) one.
    #[error("bad upstream: {0}")]
    BadUpstream(String),

    /// The upstream chain element was the literal `off`.  Never retried.
    #[error("module disabled")]
    ModuleDisabled,

    /// Anything unexpected: becomes a 500 with no body detail and no
    /// cache-control header.
    #[error("internal error: {0}")]
    Internal(String),
}

fn detail_suffix(detail: &Option<String>) -> String {
    match detail {
        Some(d) => format!(": {d}"),
        None => String::new(),
    }
}

impl ProxyError {
    /// Builds a `NotFound` carrying a detail string, normalizing any
    /// existing taxonomy prefix per the response-policy rule: a detail that
    /// already begins with `"not found: "` is left alone; a detail with a
    /// different tag (e.g. `"gone: ..."`) is rewritten so the final body
    /// never double-prefixes or mixes tags.
    pub fn not_found(detail: impl Into<String>) -> Self {
        let detail = detail.into();
        let rewritten = if let Some(rest) = detail.strip_prefix("not found: ") {
            rest.to_string()
        } else if let Some(idx) = detail.find(": ") {
            // Strip any other "tag: " prefix (e.g. "gone: ...", "bad upstream: ...").
            detail[idx + 2..].to_string()
        } else {
            detail
        };
        ProxyError::NotFound(Some(rewritten))
    }

    /// A bare `not found` with no detail.
    pub fn bare_not_found() -> Self {
        ProxyError::NotFound(None)
    }

    /// Whether this error is soft in the upstream chain (404/410-equivalent):
    /// fall through on both `,` and `|` separators.
    pub fn is_soft_fallthrough(&self) -> bool {
        matches!(self, ProxyError::NotFound(_))
    }

    /// The response body the dispatcher should emit for this error,
    /// following the not-found body grammar from the response policy.
    /// Returns `None` for `Internal`, which carries no body detail.
    pub fn not_found_body(&self) -> Option<String> {
        match self {
            ProxyError::NotFound(None) => Some("not found".to_string()),
            ProxyError::NotFound(Some(d)) => Some(format!("not found: {d}")),
            ProxyError::BadRequest(d) => Some(format!("not found: {d}")),
            ProxyError::ModuleDisabled => Some("not found: module disabled".to_string()),
            ProxyError::BadUpstream(d) => Some(format!("not found: {d}")),
            ProxyError::FetchTimedOut => Some("not found: fetch timed out".to_string()),
            ProxyError::FetchCancelled => Some("not found: fetch cancelled".to_string()),
            ProxyError::MethodNotAllowed | ProxyError::Internal(_) => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;

impl From<std::io::Error> for ProxyError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::NotFound {
            ProxyError::bare_not_found()
        } else {
            ProxyError::Internal(e.to_string())
        }
    }
}

impl From<reqwest::Error> for ProxyError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProxyError::FetchTimedOut
        } else {
            ProxyError::BadUpstream(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_detail_is_not_double_prefixed() {
        let e = ProxyError::not_found("not found: bad-escape");
        assert_eq!(e.not_found_body().unwrap(), "not found: bad-escape");
    }

    #[test]
    fn not_found_detail_rewrites_other_tags() {
        let e = ProxyError::not_found("gone: upstream retired");
        assert_eq!(e.not_found_body().unwrap(), "not found: upstream retired");
    }

    #[test]
    fn bare_not_found_has_no_colon() {
        let e = ProxyError::bare_not_found();
        assert_eq!(e.not_found_body().unwrap(), "not found");
    }
}
