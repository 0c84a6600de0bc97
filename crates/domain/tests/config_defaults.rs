//! Partial TOML files must deserialize with documented defaults filled in.

use sg_domain::config::{Config, OverflowPolicy};
use sg_domain::model::{SelectionStrategy, SourceMode};

#[test]
fn empty_toml_yields_defaults() {
    let cfg: Config = toml::from_str("").unwrap();
    assert_eq!(cfg.server.port, 8787);
    assert_eq!(cfg.server.host, "127.0.0.1");
    assert_eq!(cfg.limits.per_token_per_minute, 60);
    assert_eq!(cfg.limits.global_per_minute, 600);
    assert_eq!(cfg.brave.overflow, OverflowPolicy::FallbackToTavily);
    assert_eq!(cfg.mcp.source_mode, SourceMode::BravePreferTavilyFallback);
}

#[test]
fn partial_section_keeps_sibling_defaults() {
    let cfg: Config = toml::from_str(
        r#"
        [server]
        port = 9000

        [tavily]
        max_retries = 5
        "#,
    )
    .unwrap();
    assert_eq!(cfg.server.port, 9000);
    assert_eq!(cfg.server.host, "127.0.0.1");
    assert_eq!(cfg.tavily.max_retries, 5);
    assert_eq!(cfg.tavily.cooldown_ms, 60_000);
    assert_eq!(cfg.tavily.selection_strategy, SelectionStrategy::RoundRobin);
}

#[test]
fn enums_parse_from_wire_names() {
    let cfg: Config = toml::from_str(
        r#"
        [tavily]
        selection_strategy = "random"

        [mcp]
        source_mode = "combined"

        [brave]
        overflow = "reject"
        "#,
    )
    .unwrap();
    assert_eq!(cfg.tavily.selection_strategy, SelectionStrategy::Random);
    assert_eq!(cfg.mcp.source_mode, SourceMode::Combined);
    assert_eq!(cfg.brave.overflow, OverflowPolicy::Reject);
}
