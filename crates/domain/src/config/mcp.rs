use serde::{Deserialize, Serialize};

use crate::model::SourceMode;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// MCP surface
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Lower bound for the settings-cache TTL. Anything shorter just hammers
/// the store without changing observable staleness.
pub const SETTINGS_TTL_FLOOR_MS: u64 = 250;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpConfig {
    /// Idle sessions are garbage-collected after this long.
    #[serde(default = "d_session_idle")]
    pub session_idle_ms: u64,
    /// Startup default; the live value comes from server settings.
    #[serde(default)]
    pub source_mode: SourceMode,
    /// TTL of the server-settings cache.
    #[serde(default = "d_settings_ttl")]
    pub settings_cache_ttl_ms: u64,
}

impl McpConfig {
    /// The configured settings TTL, clamped to the floor.
    pub fn effective_settings_ttl_ms(&self) -> u64 {
        self.settings_cache_ttl_ms.max(SETTINGS_TTL_FLOOR_MS)
    }
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            session_idle_ms: d_session_idle(),
            source_mode: SourceMode::default(),
            settings_cache_ttl_ms: d_settings_ttl(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_session_idle() -> u64 {
    30 * 60 * 1_000
}
fn d_settings_ttl() -> u64 {
    5_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_ttl_clamped_to_floor() {
        let mut cfg = McpConfig::default();
        assert_eq!(cfg.effective_settings_ttl_ms(), 5_000);

        cfg.settings_cache_ttl_ms = 10;
        assert_eq!(cfg.effective_settings_ttl_ms(), SETTINGS_TTL_FLOOR_MS);
    }
}
