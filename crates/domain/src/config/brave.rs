use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Brave (P-B)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BraveConfig {
    #[serde(default = "d_base_url")]
    pub base_url: String,
    #[serde(default = "d_timeout")]
    pub http_timeout_ms: u64,
    /// Outgoing queries/second the rate gate admits. 0 disables pacing.
    #[serde(default = "d_qps")]
    pub max_qps: u32,
    /// Longest a request may sit in the gate queue before giving up.
    #[serde(default = "d_queue")]
    pub max_queue_ms: u64,
    /// What to do when the gate wait expires.
    #[serde(default)]
    pub overflow: OverflowPolicy,
}

impl BraveConfig {
    /// Minimum interval between request starts, derived from `max_qps`.
    pub fn min_interval_ms(&self) -> u64 {
        if self.max_qps == 0 {
            0
        } else {
            1_000 / u64::from(self.max_qps)
        }
    }
}

impl Default for BraveConfig {
    fn default() -> Self {
        Self {
            base_url: d_base_url(),
            http_timeout_ms: d_timeout(),
            max_qps: d_qps(),
            max_queue_ms: d_queue(),
            overflow: OverflowPolicy::default(),
        }
    }
}

/// Behaviour when a request times out waiting for a Brave rate-gate slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Serve the call from Tavily instead.
    #[default]
    FallbackToTavily,
    /// Surface a rate-limit error to the client.
    Reject,
}

impl OverflowPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "fallback_to_tavily" => Some(OverflowPolicy::FallbackToTavily),
            "reject" => Some(OverflowPolicy::Reject),
            _ => None,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_base_url() -> String {
    "https://api.search.brave.com/res/v1".into()
}
fn d_timeout() -> u64 {
    10_000
}
fn d_qps() -> u32 {
    1
}
fn d_queue() -> u64 {
    30_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn min_interval_from_qps() {
        let mut cfg = BraveConfig::default();
        assert_eq!(cfg.min_interval_ms(), 1_000);

        cfg.max_qps = 4;
        assert_eq!(cfg.min_interval_ms(), 250);

        cfg.max_qps = 0;
        assert_eq!(cfg.min_interval_ms(), 0);
    }
}
