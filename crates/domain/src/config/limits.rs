use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request rate limits
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Fixed-window limits applied by the MCP pipeline. Both windows are one
/// minute; a value of 0 rejects every request on that limiter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Requests/minute per client token (overridable per token).
    #[serde(default = "d_60")]
    pub per_token_per_minute: u32,
    /// Requests/minute across all clients.
    #[serde(default = "d_600")]
    pub global_per_minute: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            per_token_per_minute: 60,
            global_per_minute: 600,
        }
    }
}

fn d_60() -> u32 {
    60
}
fn d_600() -> u32 {
    600
}
