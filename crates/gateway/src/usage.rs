//! Usage accounting for tool calls.
//!
//! One row per provider touched, written to that provider's append-only
//! log. Query text is never stored: a keyed HMAC allows correlation and
//! a short sanitised preview helps operators eyeball traffic.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

use sg_domain::model::{CallOutcome, ClientToken, Provider, UsageRow};
use sg_store::Store;
use sg_vault::hmac_sha256_hex;

use crate::dispatch::ProviderUse;

const PREVIEW_MAX_CHARS: usize = 80;

pub struct UsageRecorder {
    store: Arc<dyn Store>,
    hmac_key: Vec<u8>,
}

impl UsageRecorder {
    pub fn new(store: Arc<dyn Store>, hmac_key: Vec<u8>) -> Self {
        Self { store, hmac_key }
    }

    /// Record the outcome of one dispatched tool call.
    ///
    /// A dispatch may have touched each provider several times (key
    /// rotation); the row reflects the final attempt per provider.
    pub async fn record(
        &self,
        tool_name: &str,
        uses: &[ProviderUse],
        token: &ClientToken,
        query: Option<&str>,
        args: &Value,
        latency_ms: u64,
    ) {
        for provider in [Provider::Tavily, Provider::Brave] {
            let Some(last) = uses.iter().rev().find(|u| u.provider == provider) else {
                continue;
            };

            let row = UsageRow {
                id: uuid::Uuid::new_v4().to_string(),
                timestamp: Utc::now(),
                tool_name: tool_name.to_string(),
                outcome: last.outcome,
                latency_ms: Some(latency_ms),
                client_token_id: token.id.clone(),
                client_token_prefix: Some(token.prefix.clone()),
                upstream_key_id: last.key_id.clone(),
                query_hash: query.map(|q| hmac_sha256_hex(&self.hmac_key, q.as_bytes())),
                query_preview: query.map(sanitize_preview),
                args_json: args.clone(),
                error_message: last.error.clone(),
            };

            if let Err(e) = self.store.append_usage(provider, row).await {
                tracing::warn!(provider = %provider, error = %e, "usage row write failed");
            }
        }
    }
}

/// Truncated, control-character-free fragment of the query text.
fn sanitize_preview(query: &str) -> String {
    query
        .chars()
        .filter(|c| !c.is_control())
        .take(PREVIEW_MAX_CHARS)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sg_store::FileStore;

    fn token() -> ClientToken {
        ClientToken {
            id: "tok-1".into(),
            description: None,
            prefix: "pfx".into(),
            secret_hash: "00".repeat(32),
            expires_at: None,
            revoked_at: None,
            allowed_tools: None,
            rate_limit: None,
            created_at: Utc::now(),
        }
    }

    fn success(provider: Provider, key_id: &str) -> ProviderUse {
        ProviderUse {
            provider,
            key_id: Some(key_id.into()),
            outcome: CallOutcome::Success,
            error: None,
        }
    }

    fn failure(provider: Provider, key_id: &str, message: &str) -> ProviderUse {
        ProviderUse {
            provider,
            key_id: Some(key_id.into()),
            outcome: CallOutcome::Error,
            error: Some(message.into()),
        }
    }

    #[tokio::test]
    async fn one_row_per_provider_with_final_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileStore::open(dir.path()).unwrap());
        let recorder = UsageRecorder::new(store.clone(), b"hmac-key".to_vec());

        // K1 rate-limited, retried on K2 which succeeded.
        let uses = vec![
            failure(Provider::Tavily, "k1", "tavily upstream rate_limited: HTTP 429"),
            success(Provider::Tavily, "k2"),
        ];
        recorder
            .record(
                "tavily_search",
                &uses,
                &token(),
                Some("rust web framework"),
                &serde_json::json!({"query": "rust web framework"}),
                42,
            )
            .await;

        let rows = store.recent_usage(Provider::Tavily, 10).await.unwrap();
        assert_eq!(rows.len(), 1, "exactly one row for the call");
        assert_eq!(rows[0].outcome, CallOutcome::Success);
        assert_eq!(rows[0].upstream_key_id.as_deref(), Some("k2"));
        assert!(rows[0].query_hash.is_some());
        assert_eq!(
            rows[0].query_preview.as_deref(),
            Some("rust web framework")
        );

        assert!(store
            .recent_usage(Provider::Brave, 10)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn combined_call_writes_both_provider_logs() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileStore::open(dir.path()).unwrap());
        let recorder = UsageRecorder::new(store.clone(), b"hmac-key".to_vec());

        let uses = vec![
            success(Provider::Tavily, "tk"),
            success(Provider::Brave, "bk"),
        ];
        recorder
            .record(
                "brave_web_search",
                &uses,
                &token(),
                Some("espresso"),
                &serde_json::json!({"q": "espresso"}),
                17,
            )
            .await;

        assert_eq!(store.recent_usage(Provider::Tavily, 10).await.unwrap().len(), 1);
        assert_eq!(store.recent_usage(Provider::Brave, 10).await.unwrap().len(), 1);
    }

    #[test]
    fn preview_is_sanitised_and_truncated() {
        let noisy = format!("line1\nline2\ttabbed {}", "x".repeat(200));
        let preview = sanitize_preview(&noisy);
        assert!(!preview.contains('\n'));
        assert!(!preview.contains('\t'));
        assert_eq!(preview.chars().count(), PREVIEW_MAX_CHARS);
    }

    #[test]
    fn hash_is_keyed() {
        let a = hmac_sha256_hex(b"key-a", b"query");
        let b = hmac_sha256_hex(b"key-b", b"query");
        assert_ne!(a, b);
    }
}
