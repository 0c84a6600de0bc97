//! Append-only usage and audit records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The two upstream providers this gateway fronts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Tavily,
    Brave,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Tavily => "tavily",
            Provider::Brave => "brave",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one tool call against one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    Success,
    Error,
}

/// One row in a provider's usage log. Written once, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRow {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub tool_name: String,
    pub outcome: CallOutcome,
    pub latency_ms: Option<u64>,
    pub client_token_id: String,
    pub client_token_prefix: Option<String>,
    pub upstream_key_id: Option<String>,
    /// Keyed HMAC of the query, for correlation without storing the text.
    pub query_hash: Option<String>,
    /// Truncated, control-character-free fragment of the query.
    pub query_preview: Option<String>,
    pub args_json: serde_json::Value,
    pub error_message: Option<String>,
}

/// One row in the admin audit log. Written once, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRow {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub outcome: CallOutcome,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub details: serde_json::Value,
}

impl AuditRow {
    pub fn new(event_type: impl Into<String>, outcome: CallOutcome) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.into(),
            outcome,
            resource_type: None,
            resource_id: None,
            ip: None,
            user_agent: None,
            details: serde_json::Value::Null,
        }
    }

    pub fn resource(mut self, kind: impl Into<String>, id: impl Into<String>) -> Self {
        self.resource_type = Some(kind.into());
        self.resource_id = Some(id.into());
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_wire_names() {
        assert_eq!(Provider::Tavily.as_str(), "tavily");
        assert_eq!(
            serde_json::to_string(&Provider::Brave).unwrap(),
            "\"brave\""
        );
    }

    #[test]
    fn audit_row_builder() {
        let row = AuditRow::new("key.create", CallOutcome::Success)
            .resource("tavily_key", "abc")
            .details(serde_json::json!({ "label": "prod" }));
        assert_eq!(row.event_type, "key.create");
        assert_eq!(row.resource_type.as_deref(), Some("tavily_key"));
        assert_eq!(row.details["label"], "prod");
    }

    #[test]
    fn usage_row_serializes_camel_case() {
        let row = UsageRow {
            id: "u1".into(),
            timestamp: Utc::now(),
            tool_name: "tavily_search".into(),
            outcome: CallOutcome::Success,
            latency_ms: Some(120),
            client_token_id: "t1".into(),
            client_token_prefix: Some("pfx".into()),
            upstream_key_id: Some("k1".into()),
            query_hash: None,
            query_preview: None,
            args_json: serde_json::json!({}),
            error_message: None,
        };
        let json = serde_json::to_value(&row).unwrap();
        assert!(json.get("toolName").is_some());
        assert!(json.get("latencyMs").is_some());
        assert!(json.get("clientTokenId").is_some());
    }
}
