//! Stored upstream API keys.
//!
//! Secrets are AEAD-encrypted at rest (`ciphertext`); `masked` is the only
//! display form the admin API ever returns in listings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Lifecycle state of a stored key.
///
/// `Cooldown` applies to Tavily keys only; Brave keys move between
/// `Active`, `Disabled`, and `Invalid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStatus {
    Active,
    Disabled,
    Cooldown,
    Invalid,
}

impl std::fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            KeyStatus::Active => "active",
            KeyStatus::Disabled => "disabled",
            KeyStatus::Cooldown => "cooldown",
            KeyStatus::Invalid => "invalid",
        };
        f.write_str(s)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Credit snapshot
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Last known credit state of a Tavily key, as reported by the provider's
/// usage endpoint. All fields are optional — a key that has never been
/// refreshed has an empty snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreditSnapshot {
    pub key_usage: Option<i64>,
    pub key_limit: Option<i64>,
    pub key_remaining: Option<i64>,
    pub account_plan_usage: Option<i64>,
    pub account_plan_limit: Option<i64>,
    pub account_pay_as_you_go_usage: Option<i64>,
    pub account_pay_as_you_go_limit: Option<i64>,
    pub account_remaining: Option<i64>,
    /// `min(key_remaining, account_remaining)` with null-as-unlimited.
    pub remaining: Option<i64>,
    pub checked_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl CreditSnapshot {
    /// Combine key-level and account-level remaining credit. `None` means
    /// "unlimited" on either side, so the result is `None` only when both
    /// sides are unknown.
    pub fn effective_remaining(
        key_remaining: Option<i64>,
        account_remaining: Option<i64>,
    ) -> Option<i64> {
        match (key_remaining, account_remaining) {
            (Some(k), Some(a)) => Some(k.min(a)),
            (Some(k), None) => Some(k),
            (None, Some(a)) => Some(a),
            (None, None) => None,
        }
    }

    /// Whether the snapshot is still within its cache TTL.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp > now)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tavily key
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A stored Tavily API key with cooldown state, a credit snapshot, and the
/// exclusive credits-refresh lease.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TavilyKey {
    pub id: String,
    /// Human-unique across all Tavily keys (enforced by the store).
    pub label: String,
    pub ciphertext: String,
    pub masked: String,
    pub status: KeyStatus,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub credits: CreditSnapshot,
    pub refresh_lock_until: Option<DateTime<Utc>>,
    pub refresh_lock_id: Option<String>,
}

impl TavilyKey {
    pub fn new(label: impl Into<String>, ciphertext: String, masked: String) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            label: label.into(),
            ciphertext,
            masked,
            status: KeyStatus::Active,
            cooldown_until: None,
            last_used_at: None,
            created_at: now,
            updated_at: now,
            credits: CreditSnapshot::default(),
            refresh_lock_until: None,
            refresh_lock_id: None,
        }
    }

    /// Whether a cooldown has lapsed and the key may be treated as active
    /// again (the pool flips the status lazily at selection time).
    pub fn cooldown_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == KeyStatus::Cooldown
            && self.cooldown_until.is_none_or(|until| until <= now)
    }

    /// Whether the key is a selection candidate at `now`.
    pub fn is_selectable(&self, now: DateTime<Utc>) -> bool {
        self.status == KeyStatus::Active || self.cooldown_expired(now)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Brave key
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A stored Brave API key. No credit accounting and no cooldown state —
/// the rate gate paces Brave traffic instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BraveKey {
    pub id: String,
    pub label: String,
    pub ciphertext: String,
    pub masked: String,
    pub status: KeyStatus,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BraveKey {
    pub fn new(label: impl Into<String>, ciphertext: String, masked: String) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            label: label.into(),
            ciphertext,
            masked,
            status: KeyStatus::Active,
            last_used_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn effective_remaining_null_is_unlimited() {
        assert_eq!(CreditSnapshot::effective_remaining(None, None), None);
        assert_eq!(CreditSnapshot::effective_remaining(Some(5), None), Some(5));
        assert_eq!(CreditSnapshot::effective_remaining(None, Some(7)), Some(7));
        assert_eq!(
            CreditSnapshot::effective_remaining(Some(5), Some(7)),
            Some(5)
        );
    }

    #[test]
    fn snapshot_freshness() {
        let now = Utc::now();
        let mut snap = CreditSnapshot::default();
        assert!(!snap.is_fresh(now), "empty snapshot is never fresh");

        snap.expires_at = Some(now + Duration::seconds(30));
        assert!(snap.is_fresh(now));

        snap.expires_at = Some(now - Duration::seconds(1));
        assert!(!snap.is_fresh(now));
    }

    #[test]
    fn new_key_is_active_with_empty_snapshot() {
        let key = TavilyKey::new("prod", "ct".into(), "tvly-…abcd".into());
        assert_eq!(key.status, KeyStatus::Active);
        assert!(key.last_used_at.is_none());
        assert_eq!(key.credits, CreditSnapshot::default());
        assert!(key.is_selectable(Utc::now()));
    }

    #[test]
    fn cooldown_key_becomes_selectable_after_expiry() {
        let now = Utc::now();
        let mut key = TavilyKey::new("k", "ct".into(), "m".into());
        key.status = KeyStatus::Cooldown;
        key.cooldown_until = Some(now + Duration::seconds(60));
        assert!(!key.is_selectable(now));

        key.cooldown_until = Some(now - Duration::seconds(1));
        assert!(key.cooldown_expired(now));
        assert!(key.is_selectable(now));
    }

    #[test]
    fn invalid_key_is_never_selectable() {
        let mut key = TavilyKey::new("k", "ct".into(), "m".into());
        key.status = KeyStatus::Invalid;
        assert!(!key.is_selectable(Utc::now()));
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&KeyStatus::Cooldown).unwrap(),
            "\"cooldown\""
        );
        let parsed: KeyStatus = serde_json::from_str("\"invalid\"").unwrap();
        assert_eq!(parsed, KeyStatus::Invalid);
    }
}
