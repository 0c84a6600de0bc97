mod brave;
mod limits;
mod mcp;
mod server;
mod tavily;

pub use brave::*;
pub use limits::*;
pub use mcp::*;
pub use server::*;
pub use tavily::*;

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{SelectionStrategy, SourceMode};

/// Environment variable holding the admin bearer token. Required.
pub const ADMIN_TOKEN_ENV: &str = "ADMIN_API_TOKEN";
/// Environment variable holding the AEAD key material. Required.
pub const ENCRYPTION_SECRET_ENV: &str = "KEY_ENCRYPTION_SECRET";
/// Environment variable holding the usage-log HMAC key. Optional; falls
/// back to the encryption secret.
pub const USAGE_HASH_SECRET_ENV: &str = "USAGE_HASH_SECRET";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Gateway configuration: an optional TOML file providing the baseline,
/// with the documented environment variables overriding individual fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    /// Root directory of the file-backed store.
    #[serde(default = "d_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub tavily: TavilyConfig,
    #[serde(default)]
    pub brave: BraveConfig,
    #[serde(default)]
    pub mcp: McpConfig,
}

fn d_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            data_dir: d_data_dir(),
            limits: LimitsConfig::default(),
            tavily: TavilyConfig::default(),
            brave: BraveConfig::default(),
            mcp: McpConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration: TOML file (explicit path, or `searchgate.toml`
    /// in the working directory if present), then environment overrides.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(p) => Some(p.to_path_buf()),
            None => {
                let default = PathBuf::from("searchgate.toml");
                default.exists().then_some(default)
            }
        };

        let mut config = match path {
            Some(ref p) => {
                let raw = std::fs::read_to_string(p).map_err(Error::Io)?;
                toml::from_str(&raw)
                    .map_err(|e| Error::Config(format!("{}: {e}", p.display())))?
            }
            None => Config::default(),
        };

        config.apply_env();
        Ok(config)
    }

    /// Apply the documented environment-variable overrides.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Override fields from a name → value lookup. Split out from
    /// [`Config::apply_env`] so tests don't have to mutate process env.
    pub fn apply_overrides(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(v) = get("SEARCHGATE_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = get("ENABLE_QUERY_AUTH") {
            self.server.enable_query_auth = is_truthy(&v);
        }

        set_u32(&mut self.limits.per_token_per_minute, &get, "MCP_RATE_LIMIT_PER_MINUTE");
        set_u32(&mut self.limits.global_per_minute, &get, "MCP_GLOBAL_RATE_LIMIT_PER_MINUTE");

        set_u64(&mut self.tavily.cooldown_ms, &get, "MCP_COOLDOWN_MS");
        set_u32(&mut self.tavily.max_retries, &get, "MCP_MAX_RETRIES");
        set_u64(&mut self.tavily.http_timeout_ms, &get, "TAVILY_HTTP_TIMEOUT_MS");
        if let Some(v) = get("TAVILY_KEY_SELECTION_STRATEGY") {
            match SelectionStrategy::parse(&v) {
                Some(s) => self.tavily.selection_strategy = s,
                None => warn_unparsed("TAVILY_KEY_SELECTION_STRATEGY", &v),
            }
        }
        set_u64(&mut self.tavily.credits.refresh_lock_ms, &get, "TAVILY_CREDITS_REFRESH_LOCK_MS");
        set_u64(&mut self.tavily.credits.cache_ttl_ms, &get, "TAVILY_CREDITS_CACHE_TTL_MS");
        set_i64(&mut self.tavily.credits.min_remaining, &get, "TAVILY_CREDITS_MIN_REMAINING");
        set_u64(&mut self.tavily.credits.cooldown_ms, &get, "TAVILY_CREDITS_COOLDOWN_MS");

        set_u32(&mut self.brave.max_qps, &get, "BRAVE_MAX_QPS");
        set_u64(&mut self.brave.max_queue_ms, &get, "BRAVE_MAX_QUEUE_MS");
        set_u64(&mut self.brave.http_timeout_ms, &get, "BRAVE_HTTP_TIMEOUT_MS");
        if let Some(v) = get("BRAVE_OVERFLOW") {
            match OverflowPolicy::parse(&v) {
                Some(p) => self.brave.overflow = p,
                None => warn_unparsed("BRAVE_OVERFLOW", &v),
            }
        }

        if let Some(v) = get("SEARCH_SOURCE_MODE") {
            match SourceMode::parse(&v) {
                Some(m) => self.mcp.source_mode = m,
                None => warn_unparsed("SEARCH_SOURCE_MODE", &v),
            }
        }
        set_u64(&mut self.mcp.session_idle_ms, &get, "MCP_SESSION_IDLE_MS");
        set_u64(&mut self.mcp.settings_cache_ttl_ms, &get, "SETTINGS_CACHE_TTL_MS");
    }
}

fn is_truthy(v: &str) -> bool {
    matches!(v.trim(), "1" | "true" | "TRUE" | "yes" | "on")
}

fn warn_unparsed(name: &str, value: &str) {
    tracing::warn!(env_var = name, value, "unrecognised value, keeping default");
}

fn set_u32(field: &mut u32, get: &impl Fn(&str) -> Option<String>, name: &str) {
    if let Some(v) = get(name) {
        match v.trim().parse() {
            Ok(n) => *field = n,
            Err(_) => warn_unparsed(name, &v),
        }
    }
}

fn set_u64(field: &mut u64, get: &impl Fn(&str) -> Option<String>, name: &str) {
    if let Some(v) = get(name) {
        match v.trim().parse() {
            Ok(n) => *field = n,
            Err(_) => warn_unparsed(name, &v),
        }
    }
}

fn set_i64(field: &mut i64, get: &impl Fn(&str) -> Option<String>, name: &str) {
    if let Some(v) = get(name) {
        match v.trim().parse() {
            Ok(n) => *field = n,
            Err(_) => warn_unparsed(name, &v),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

fn issue(severity: ConfigSeverity, field: &str, message: impl Into<String>) -> ConfigIssue {
    ConfigIssue {
        severity,
        field: field.into(),
        message: message.into(),
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good. Secret presence is
    /// checked separately by [`check_required_env`] because secrets never
    /// live in the config struct.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        use ConfigSeverity::{Error, Warning};
        let mut issues = Vec::new();

        if self.server.port == 0 {
            issues.push(issue(Error, "server.port", "port must be greater than 0"));
        }
        if self.server.host.is_empty() {
            issues.push(issue(Error, "server.host", "host must not be empty"));
        }

        for (field, url) in [
            ("tavily.base_url", &self.tavily.base_url),
            ("brave.base_url", &self.brave.base_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                issues.push(issue(
                    Error,
                    field,
                    format!("must start with http:// or https:// (got \"{url}\")"),
                ));
            }
        }

        if self.limits.per_token_per_minute == 0 {
            issues.push(issue(
                Warning,
                "limits.per_token_per_minute",
                "0 rejects every client request",
            ));
        }
        if self.limits.global_per_minute == 0 {
            issues.push(issue(
                Warning,
                "limits.global_per_minute",
                "0 rejects every client request",
            ));
        }

        if self.brave.max_qps == 0 {
            issues.push(issue(
                Warning,
                "brave.max_qps",
                "0 disables Brave request pacing",
            ));
        }

        if self.mcp.settings_cache_ttl_ms < SETTINGS_TTL_FLOOR_MS {
            issues.push(issue(
                Warning,
                "mcp.settings_cache_ttl_ms",
                format!("below the {SETTINGS_TTL_FLOOR_MS}ms floor; the floor applies"),
            ));
        }

        if self.tavily.credits.refresh_lock_ms == 0 {
            issues.push(issue(
                Error,
                "tavily.credits.refresh_lock_ms",
                "refresh lease lifetime must be greater than 0",
            ));
        }

        if self.server.cors.allowed_origins.len() == 1
            && self.server.cors.allowed_origins[0] == "*"
        {
            issues.push(issue(
                Warning,
                "server.cors.allowed_origins",
                "wildcard \"*\" allows all origins (not recommended for production)",
            ));
        }

        if self.server.enable_query_auth {
            issues.push(issue(
                Warning,
                "server.enable_query_auth",
                "tokens passed as query parameters may be logged by proxies",
            ));
        }

        issues
    }
}

/// Check the required secret environment variables, without reading their
/// values into the config.
pub fn check_required_env() -> Vec<ConfigIssue> {
    use ConfigSeverity::{Error, Warning};
    let mut issues = Vec::new();

    match std::env::var(ADMIN_TOKEN_ENV) {
        Ok(v) if v.len() >= 32 => {}
        Ok(v) if !v.is_empty() => issues.push(issue(
            Warning,
            ADMIN_TOKEN_ENV,
            format!("token is {} bytes; at least 32 is recommended", v.len()),
        )),
        _ => issues.push(issue(Error, ADMIN_TOKEN_ENV, "must be set")),
    }

    match std::env::var(ENCRYPTION_SECRET_ENV) {
        Ok(v) if !v.is_empty() => {}
        _ => issues.push(issue(Error, ENCRYPTION_SECRET_ENV, "must be set")),
    }

    issues
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn overrides(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn apply(cfg: &mut Config, pairs: &[(&str, &str)]) {
        let map = overrides(pairs);
        cfg.apply_overrides(|name| map.get(name).cloned());
    }

    #[test]
    fn defaults_match_documentation() {
        let cfg = Config::default();
        assert_eq!(cfg.limits.per_token_per_minute, 60);
        assert_eq!(cfg.limits.global_per_minute, 600);
        assert_eq!(cfg.tavily.cooldown_ms, 60_000);
        assert_eq!(cfg.tavily.max_retries, 2);
        assert_eq!(cfg.tavily.credits.refresh_lock_ms, 15_000);
        assert_eq!(cfg.tavily.credits.cache_ttl_ms, 60_000);
        assert_eq!(cfg.tavily.credits.min_remaining, 1);
        assert_eq!(cfg.tavily.credits.cooldown_ms, 300_000);
        assert_eq!(cfg.brave.max_qps, 1);
        assert_eq!(cfg.brave.max_queue_ms, 30_000);
        assert_eq!(cfg.brave.overflow, OverflowPolicy::FallbackToTavily);
        assert_eq!(
            cfg.mcp.source_mode,
            crate::model::SourceMode::BravePreferTavilyFallback
        );
        assert_eq!(
            cfg.tavily.selection_strategy,
            crate::model::SelectionStrategy::RoundRobin
        );
    }

    #[test]
    fn env_overrides_apply() {
        let mut cfg = Config::default();
        apply(
            &mut cfg,
            &[
                ("MCP_RATE_LIMIT_PER_MINUTE", "10"),
                ("MCP_GLOBAL_RATE_LIMIT_PER_MINUTE", "100"),
                ("MCP_COOLDOWN_MS", "5000"),
                ("MCP_MAX_RETRIES", "4"),
                ("SEARCH_SOURCE_MODE", "combined"),
                ("TAVILY_KEY_SELECTION_STRATEGY", "random"),
                ("BRAVE_MAX_QPS", "2"),
                ("BRAVE_OVERFLOW", "reject"),
                ("ENABLE_QUERY_AUTH", "true"),
                ("SEARCHGATE_DATA_DIR", "/var/lib/searchgate"),
            ],
        );
        assert_eq!(cfg.limits.per_token_per_minute, 10);
        assert_eq!(cfg.limits.global_per_minute, 100);
        assert_eq!(cfg.tavily.cooldown_ms, 5_000);
        assert_eq!(cfg.tavily.max_retries, 4);
        assert_eq!(cfg.mcp.source_mode, crate::model::SourceMode::Combined);
        assert_eq!(
            cfg.tavily.selection_strategy,
            crate::model::SelectionStrategy::Random
        );
        assert_eq!(cfg.brave.max_qps, 2);
        assert_eq!(cfg.brave.overflow, OverflowPolicy::Reject);
        assert!(cfg.server.enable_query_auth);
        assert_eq!(cfg.data_dir, PathBuf::from("/var/lib/searchgate"));
    }

    #[test]
    fn unparsable_override_keeps_default() {
        let mut cfg = Config::default();
        apply(&mut cfg, &[("MCP_MAX_RETRIES", "many")]);
        assert_eq!(cfg.tavily.max_retries, 2);

        apply(&mut cfg, &[("SEARCH_SOURCE_MODE", "everything")]);
        assert_eq!(
            cfg.mcp.source_mode,
            crate::model::SourceMode::BravePreferTavilyFallback
        );
    }

    #[test]
    fn valid_default_config_has_no_errors() {
        let errors: Vec<_> = Config::default()
            .validate()
            .into_iter()
            .filter(|i| i.severity == ConfigSeverity::Error)
            .collect();
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
    }

    #[test]
    fn port_zero_is_error() {
        let mut cfg = Config::default();
        cfg.server.port = 0;
        let issues = cfg.validate();
        let found = issues.iter().find(|i| i.field == "server.port").unwrap();
        assert_eq!(found.severity, ConfigSeverity::Error);
    }

    #[test]
    fn bad_base_url_is_error() {
        let mut cfg = Config::default();
        cfg.brave.base_url = "ftp://brave".into();
        let issues = cfg.validate();
        assert!(issues.iter().any(|i| i.field == "brave.base_url"));
    }

    #[test]
    fn zero_limits_are_warnings_not_errors() {
        let mut cfg = Config::default();
        cfg.limits.per_token_per_minute = 0;
        let issues = cfg.validate();
        let found = issues
            .iter()
            .find(|i| i.field == "limits.per_token_per_minute")
            .unwrap();
        assert_eq!(found.severity, ConfigSeverity::Warning);
    }

    #[test]
    fn toml_round_trip() {
        let cfg = Config::default();
        let raw = toml::to_string(&cfg).unwrap();
        let back: Config = toml::from_str(&raw).unwrap();
        assert_eq!(back.server.port, cfg.server.port);
        assert_eq!(back.tavily.cooldown_ms, cfg.tavily.cooldown_ms);
    }

    #[test]
    fn issue_display_format() {
        let i = issue(ConfigSeverity::Error, "server.port", "port must be greater than 0");
        assert_eq!(format!("{i}"), "[ERROR] server.port: port must be greater than 0");
    }
}
