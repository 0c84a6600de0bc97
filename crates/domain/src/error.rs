use crate::model::Provider;

/// Classification of a failed upstream HTTP call.
///
/// Drives key-state transitions in the pool: `AuthFailed` invalidates the
/// key, `RateLimited` puts it into cooldown, the rest leave it untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamErrorKind {
    /// 401/403 or an explicit "Invalid API key" error body.
    AuthFailed,
    /// HTTP 429.
    RateLimited,
    /// 5xx or a provider-specific error body.
    ProviderError,
    /// Non-JSON where JSON was expected.
    InvalidResponse,
}

impl std::fmt::Display for UpstreamErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            UpstreamErrorKind::AuthFailed => "auth_failed",
            UpstreamErrorKind::RateLimited => "rate_limited",
            UpstreamErrorKind::ProviderError => "provider_error",
            UpstreamErrorKind::InvalidResponse => "invalid_response",
        };
        f.write_str(s)
    }
}

/// Shared error type used across all searchgate crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("config: {0}")]
    Config(String),

    #[error("auth: {0}")]
    Auth(String),

    /// Truncated, tampered, or otherwise undecryptable ciphertext.
    /// Deliberately carries no detail — the causes are indistinguishable
    /// to callers and the input is secret material.
    #[error("invalid ciphertext")]
    InvalidCiphertext,

    #[error("store: {0}")]
    Store(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// A local fixed-window limiter rejected the request.
    #[error("rate limit exceeded, retry in {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// Preflight found no key with usable credit.
    #[error("no keys with credits: {reason}")]
    NoCredits { retry_after_ms: u64, reason: String },

    #[error("no active {provider} keys")]
    NoActiveKeys { provider: Provider },

    /// The rate gate's bounded wait expired before a slot opened.
    #[error("rate gate timeout after {waited_ms}ms")]
    RateGateTimeout { waited_ms: u64 },

    #[error("{0}")]
    SessionInvalid(String),

    #[error("tool \"{tool}\" is not allowed for this token")]
    ToolNotAllowed { tool: String, allowed: Vec<String> },

    #[error("{provider} upstream {kind}: {message}")]
    Upstream {
        provider: Provider,
        kind: UpstreamErrorKind,
        message: String,
    },

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// The upstream classification, when this error came from a provider call.
    pub fn upstream_kind(&self) -> Option<UpstreamErrorKind> {
        match self {
            Error::Upstream { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_display_includes_provider_and_kind() {
        let err = Error::Upstream {
            provider: Provider::Tavily,
            kind: UpstreamErrorKind::RateLimited,
            message: "too many requests".into(),
        };
        let s = err.to_string();
        assert!(s.contains("tavily"));
        assert!(s.contains("rate_limited"));
        assert!(s.contains("too many requests"));
    }

    #[test]
    fn upstream_kind_accessor() {
        let err = Error::Upstream {
            provider: Provider::Brave,
            kind: UpstreamErrorKind::AuthFailed,
            message: "forbidden".into(),
        };
        assert_eq!(err.upstream_kind(), Some(UpstreamErrorKind::AuthFailed));
        assert!(Error::Other("x".into()).upstream_kind().is_none());
    }

    #[test]
    fn invalid_ciphertext_carries_no_detail() {
        assert_eq!(Error::InvalidCiphertext.to_string(), "invalid ciphertext");
    }
}
