//! Client bearer tokens.
//!
//! The full token (`<prefix>.<secret>`) is shown exactly once at creation.
//! Only the SHA-256 digest of the secret half is stored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An issued client token. Immutable after creation except for `revoked_at`,
/// which is monotonic: once set it is never cleared.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientToken {
    pub id: String,
    pub description: Option<String>,
    /// Public lookup half, unique across all tokens.
    pub prefix: String,
    /// Hex SHA-256 of the secret half.
    pub secret_hash: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    /// When set, the token may only invoke these tools.
    pub allowed_tools: Option<Vec<String>>,
    /// Per-token requests/minute override for the shared limiter.
    pub rate_limit: Option<u32>,
    pub created_at: DateTime<Utc>,
}

impl ClientToken {
    /// A token is valid iff it has not been revoked and has not expired.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        if self.revoked_at.is_some() {
            return false;
        }
        self.expires_at.is_none_or(|exp| exp > now)
    }

    /// Whether this token may invoke `tool`. An absent allowlist permits
    /// every tool.
    pub fn allows_tool(&self, tool: &str) -> bool {
        match &self.allowed_tools {
            Some(allowed) => allowed.iter().any(|t| t == tool),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn token() -> ClientToken {
        ClientToken {
            id: "t1".into(),
            description: None,
            prefix: "pfx12345".into(),
            secret_hash: "00".repeat(32),
            expires_at: None,
            revoked_at: None,
            allowed_tools: None,
            rate_limit: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn fresh_token_is_valid() {
        assert!(token().is_valid(Utc::now()));
    }

    #[test]
    fn revoked_token_is_invalid_even_before_expiry() {
        let now = Utc::now();
        let mut t = token();
        t.expires_at = Some(now + Duration::days(30));
        t.revoked_at = Some(now);
        assert!(!t.is_valid(now));
    }

    #[test]
    fn expired_token_is_invalid() {
        let now = Utc::now();
        let mut t = token();
        t.expires_at = Some(now - Duration::seconds(1));
        assert!(!t.is_valid(now));
    }

    #[test]
    fn allowlist_gates_tools() {
        let mut t = token();
        assert!(t.allows_tool("tavily_search"));

        t.allowed_tools = Some(vec!["brave_web_search".into()]);
        assert!(t.allows_tool("brave_web_search"));
        assert!(!t.allows_tool("tavily_search"));
    }

    #[test]
    fn empty_allowlist_denies_everything() {
        let mut t = token();
        t.allowed_tools = Some(vec![]);
        assert!(!t.allows_tool("tavily_search"));
    }
}
