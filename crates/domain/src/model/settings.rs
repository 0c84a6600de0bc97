//! Server policy settings, stored as a `key → value` string map.

use serde::{Deserialize, Serialize};

/// Recognised setting keys.
pub mod setting_keys {
    pub const SELECTION_STRATEGY: &str = "tavilyKeySelectionStrategy";
    pub const SOURCE_MODE: &str = "searchSourceMode";
    pub const RESEARCH_ENABLED: &str = "researchEnabled";
}

/// How the pool picks among eligible Tavily keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    #[default]
    RoundRobin,
    Random,
}

impl SelectionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectionStrategy::RoundRobin => "round_robin",
            SelectionStrategy::Random => "random",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "round_robin" => Some(SelectionStrategy::RoundRobin),
            "random" => Some(SelectionStrategy::Random),
            _ => None,
        }
    }
}

/// Which upstream(s) serve a given search call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceMode {
    TavilyOnly,
    BraveOnly,
    Combined,
    #[default]
    BravePreferTavilyFallback,
}

impl SourceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceMode::TavilyOnly => "tavily_only",
            SourceMode::BraveOnly => "brave_only",
            SourceMode::Combined => "combined",
            SourceMode::BravePreferTavilyFallback => "brave_prefer_tavily_fallback",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "tavily_only" => Some(SourceMode::TavilyOnly),
            "brave_only" => Some(SourceMode::BraveOnly),
            "combined" => Some(SourceMode::Combined),
            "brave_prefer_tavily_fallback" => Some(SourceMode::BravePreferTavilyFallback),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_round_trips_through_strings() {
        for s in [SelectionStrategy::RoundRobin, SelectionStrategy::Random] {
            assert_eq!(SelectionStrategy::parse(s.as_str()), Some(s));
        }
        assert_eq!(SelectionStrategy::parse("fastest"), None);
    }

    #[test]
    fn mode_round_trips_through_strings() {
        for m in [
            SourceMode::TavilyOnly,
            SourceMode::BraveOnly,
            SourceMode::Combined,
            SourceMode::BravePreferTavilyFallback,
        ] {
            assert_eq!(SourceMode::parse(m.as_str()), Some(m));
        }
        assert_eq!(SourceMode::parse("both"), None);
    }

    #[test]
    fn serde_matches_wire_names() {
        assert_eq!(
            serde_json::to_string(&SourceMode::BravePreferTavilyFallback).unwrap(),
            "\"brave_prefer_tavily_fallback\""
        );
    }
}
