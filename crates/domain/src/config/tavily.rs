use serde::{Deserialize, Serialize};

use crate::model::SelectionStrategy;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tavily (P-A)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TavilyConfig {
    #[serde(default = "d_base_url")]
    pub base_url: String,
    #[serde(default = "d_timeout")]
    pub http_timeout_ms: u64,
    /// Cooldown applied to a key after an upstream 429.
    #[serde(default = "d_cooldown")]
    pub cooldown_ms: u64,
    /// How many alternate keys the pipeline tries after a key-level failure.
    #[serde(default = "d_retries")]
    pub max_retries: u32,
    /// Startup default; the live value comes from server settings.
    #[serde(default)]
    pub selection_strategy: SelectionStrategy,
    #[serde(default)]
    pub credits: CreditsConfig,
}

impl Default for TavilyConfig {
    fn default() -> Self {
        Self {
            base_url: d_base_url(),
            http_timeout_ms: d_timeout(),
            cooldown_ms: d_cooldown(),
            max_retries: d_retries(),
            selection_strategy: SelectionStrategy::default(),
            credits: CreditsConfig::default(),
        }
    }
}

/// Credit accounting knobs for the Tavily key pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditsConfig {
    /// Lifetime of the exclusive refresh lease.
    #[serde(default = "d_lock")]
    pub refresh_lock_ms: u64,
    /// How long a fetched snapshot stays fresh.
    #[serde(default = "d_ttl")]
    pub cache_ttl_ms: u64,
    /// A key with `remaining` at or below this counts as exhausted.
    #[serde(default = "d_min_remaining")]
    pub min_remaining: i64,
    /// Cooldown applied when a refresh finds the key exhausted.
    #[serde(default = "d_credits_cooldown")]
    pub cooldown_ms: u64,
}

impl Default for CreditsConfig {
    fn default() -> Self {
        Self {
            refresh_lock_ms: d_lock(),
            cache_ttl_ms: d_ttl(),
            min_remaining: d_min_remaining(),
            cooldown_ms: d_credits_cooldown(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_base_url() -> String {
    "https://api.tavily.com".into()
}
fn d_timeout() -> u64 {
    30_000
}
fn d_cooldown() -> u64 {
    60_000
}
fn d_retries() -> u32 {
    2
}
fn d_lock() -> u64 {
    15_000
}
fn d_ttl() -> u64 {
    60_000
}
fn d_min_remaining() -> i64 {
    1
}
fn d_credits_cooldown() -> u64 {
    300_000
}
