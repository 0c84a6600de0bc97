//! HTTP-response classification shared by both provider clients.

use reqwest::StatusCode;

use sg_domain::error::{Error, UpstreamErrorKind};
use sg_domain::model::Provider;

/// Convert a [`reqwest::Error`] into the domain error type.
///
/// Timeout errors map to [`Error::Timeout`]; everything else maps to
/// [`Error::Http`].
pub(crate) fn from_reqwest(provider: Provider, e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(format!("{provider}: {e}"))
    } else {
        Error::Http(format!("{provider}: {e}"))
    }
}

/// Classify a non-success upstream response into an [`Error::Upstream`].
pub(crate) fn classify_failure(provider: Provider, status: StatusCode, body: &str) -> Error {
    let message = upstream_message(body);

    let kind = if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        UpstreamErrorKind::AuthFailed
    } else if message.contains("Invalid API key") {
        // Some providers report bad keys with a 200-family status or a
        // generic 4xx; the body is authoritative.
        UpstreamErrorKind::AuthFailed
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        UpstreamErrorKind::RateLimited
    } else {
        UpstreamErrorKind::ProviderError
    };

    Error::Upstream {
        provider,
        kind,
        message: format!("HTTP {}: {message}", status.as_u16()),
    }
}

/// An expected-JSON body that did not parse.
pub(crate) fn invalid_response(provider: Provider, detail: impl Into<String>) -> Error {
    Error::Upstream {
        provider,
        kind: UpstreamErrorKind::InvalidResponse,
        message: detail.into(),
    }
}

const MESSAGE_MAX_CHARS: usize = 200;

/// Pull the most useful human-readable message out of an error body.
/// Providers disagree on the envelope, so probe the common shapes before
/// falling back to the raw text. Either way the result is truncated —
/// these messages end up in usage-log rows.
fn upstream_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for probe in [
            value.get("error"),
            value.get("message"),
            value.get("detail").and_then(|d| d.get("error")),
        ]
        .into_iter()
        .flatten()
        {
            if let Some(s) = probe.as_str() {
                return truncate_chars(s);
            }
        }
    }
    truncate_chars(body.trim())
}

/// Char-boundary-safe truncation; byte slicing would panic on multi-byte
/// input.
fn truncate_chars(text: &str) -> String {
    if text.chars().count() > MESSAGE_MAX_CHARS {
        let head: String = text.chars().take(MESSAGE_MAX_CHARS).collect();
        format!("{head}…")
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind_of(err: Error) -> UpstreamErrorKind {
        err.upstream_kind().expect("expected an upstream error")
    }

    #[test]
    fn status_401_and_403_are_auth_failed() {
        for status in [StatusCode::UNAUTHORIZED, StatusCode::FORBIDDEN] {
            let err = classify_failure(Provider::Tavily, status, "{}");
            assert_eq!(kind_of(err), UpstreamErrorKind::AuthFailed);
        }
    }

    #[test]
    fn status_429_is_rate_limited() {
        let err = classify_failure(Provider::Brave, StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert_eq!(kind_of(err), UpstreamErrorKind::RateLimited);
    }

    #[test]
    fn status_5xx_is_provider_error() {
        let err = classify_failure(Provider::Tavily, StatusCode::BAD_GATEWAY, "upstream down");
        assert_eq!(kind_of(err), UpstreamErrorKind::ProviderError);
    }

    #[test]
    fn invalid_api_key_body_overrides_status() {
        let err = classify_failure(
            Provider::Tavily,
            StatusCode::BAD_REQUEST,
            r#"{"error": "Invalid API key provided"}"#,
        );
        assert_eq!(kind_of(err), UpstreamErrorKind::AuthFailed);
    }

    #[test]
    fn message_extracted_from_common_envelopes() {
        let err = classify_failure(
            Provider::Brave,
            StatusCode::TOO_MANY_REQUESTS,
            r#"{"error": "quota exceeded"}"#,
        );
        assert!(err.to_string().contains("quota exceeded"));

        let err = classify_failure(
            Provider::Tavily,
            StatusCode::INTERNAL_SERVER_ERROR,
            r#"{"detail": {"error": "boom"}}"#,
        );
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn raw_body_is_truncated() {
        let long = "x".repeat(500);
        let err = classify_failure(Provider::Tavily, StatusCode::BAD_GATEWAY, &long);
        assert!(err.to_string().len() < 300);
    }

    #[test]
    fn multibyte_body_truncates_on_char_boundaries() {
        // 300 em-dashes: byte index 200 falls inside a 3-byte sequence,
        // so byte slicing would panic here.
        let long = "—".repeat(300);
        let err = classify_failure(Provider::Brave, StatusCode::BAD_GATEWAY, &long);
        let rendered = err.to_string();
        assert!(rendered.chars().count() < 300);
        assert!(rendered.contains('—'));
    }

    #[test]
    fn json_extracted_message_is_bounded_too() {
        let body = format!(r#"{{"error": "{}"}}"#, "é".repeat(1_000));
        let err = classify_failure(Provider::Tavily, StatusCode::INTERNAL_SERVER_ERROR, &body);
        let rendered = err.to_string();
        assert!(rendered.chars().count() < 300, "got {} chars", rendered.chars().count());
        assert!(rendered.ends_with('…'));
    }
}
