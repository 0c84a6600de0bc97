//! Tavily (P-A) client: search, extract, crawl, map, asynchronous
//! research, and the usage/credits endpoint.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use sg_domain::error::{Error, Result, UpstreamErrorKind};
use sg_domain::model::Provider;

use crate::classify::{classify_failure, from_reqwest, invalid_response};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Constants
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// First research poll delay; grows ×1.5 per poll up to the cap.
const RESEARCH_POLL_INITIAL: Duration = Duration::from_secs(2);
const RESEARCH_POLL_CAP: Duration = Duration::from_secs(10);
/// Total poll budget by research model.
const RESEARCH_BUDGET_MINI: Duration = Duration::from_secs(5 * 60);
const RESEARCH_BUDGET_PRO: Duration = Duration::from_secs(15 * 60);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// HTTP client for the Tavily API. Key-agnostic; the per-call `api_key`
/// comes decrypted from the pool.
pub struct TavilyClient {
    http: reqwest::Client,
    base_url: String,
}

impl TavilyClient {
    pub fn new(base_url: &str, timeout_ms: u64) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| from_reqwest(Provider::Tavily, e))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    // ── Tool operations (schema-transparent) ────────────────────────

    pub async fn search(&self, api_key: &str, args: &Value) -> Result<Value> {
        self.post_json("/search", api_key, args).await
    }

    pub async fn extract(&self, api_key: &str, args: &Value) -> Result<Value> {
        self.post_json("/extract", api_key, args).await
    }

    pub async fn crawl(&self, api_key: &str, args: &Value) -> Result<Value> {
        self.post_json("/crawl", api_key, args).await
    }

    pub async fn map(&self, api_key: &str, args: &Value) -> Result<Value> {
        self.post_json("/map", api_key, args).await
    }

    /// Submit a research request and poll it to completion.
    ///
    /// `/research` is asynchronous upstream: submission returns a request
    /// id which is polled with exponential backoff until the job reports
    /// `completed` or `failed`, bounded by a model-dependent budget.
    pub async fn research(&self, api_key: &str, args: &Value) -> Result<Value> {
        let model = args
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or("mini")
            .to_string();
        let budget = research_budget(&model);

        let submitted = self.post_json("/research", api_key, args).await?;
        let request_id = submitted
            .get("request_id")
            .or_else(|| submitted.get("id"))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                invalid_response(Provider::Tavily, "research submission returned no request id")
            })?
            .to_string();

        let deadline = tokio::time::Instant::now() + budget;
        let mut delay = RESEARCH_POLL_INITIAL;
        loop {
            if tokio::time::Instant::now() + delay > deadline {
                return Err(Error::Timeout(format!(
                    "tavily research {request_id} did not finish within {}s ({model})",
                    budget.as_secs()
                )));
            }
            tokio::time::sleep(delay).await;
            delay = next_poll_delay(delay);

            let status = self
                .get_json(&format!("/research/{request_id}"), api_key)
                .await?;
            match status.get("status").and_then(Value::as_str) {
                Some("completed") => return Ok(status),
                Some("failed") => {
                    let message = status
                        .get("error")
                        .and_then(Value::as_str)
                        .unwrap_or("research job failed")
                        .to_string();
                    return Err(Error::Upstream {
                        provider: Provider::Tavily,
                        kind: UpstreamErrorKind::ProviderError,
                        message,
                    });
                }
                _ => {
                    tracing::debug!(request_id = %request_id, "research still running");
                }
            }
        }
    }

    // ── Credits ─────────────────────────────────────────────────────

    /// Fetch the key's usage/limit counters from `/usage`.
    pub async fn usage(&self, api_key: &str) -> Result<CreditsUsage> {
        let value = self.get_json("/usage", api_key).await?;
        serde_json::from_value(value)
            .map_err(|e| invalid_response(Provider::Tavily, format!("usage body: {e}")))
    }

    // ── Internal helpers ────────────────────────────────────────────

    async fn post_json(&self, path: &str, api_key: &str, body: &Value) -> Result<Value> {
        let response = self
            .http
            .post(format!("{}{path}", self.base_url))
            .bearer_auth(api_key)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| from_reqwest(Provider::Tavily, e))?;
        read_json(response).await
    }

    async fn get_json(&self, path: &str, api_key: &str) -> Result<Value> {
        let response = self
            .http
            .get(format!("{}{path}", self.base_url))
            .bearer_auth(api_key)
            .send()
            .await
            .map_err(|e| from_reqwest(Provider::Tavily, e))?;
        read_json(response).await
    }
}

async fn read_json(response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| from_reqwest(Provider::Tavily, e))?;

    if !status.is_success() {
        return Err(classify_failure(Provider::Tavily, status, &body));
    }
    serde_json::from_str(&body)
        .map_err(|_| invalid_response(Provider::Tavily, "expected a JSON body"))
}

fn research_budget(model: &str) -> Duration {
    match model {
        "pro" => RESEARCH_BUDGET_PRO,
        _ => RESEARCH_BUDGET_MINI,
    }
}

fn next_poll_delay(current: Duration) -> Duration {
    (current * 3 / 2).min(RESEARCH_POLL_CAP)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Usage payload
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Response body of `GET /usage`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreditsUsage {
    #[serde(default)]
    pub key: KeyUsage,
    #[serde(default)]
    pub account: AccountUsage,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct KeyUsage {
    pub usage: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccountUsage {
    pub plan_usage: Option<i64>,
    pub plan_limit: Option<i64>,
    pub paygo_usage: Option<i64>,
    pub paygo_limit: Option<i64>,
}

impl KeyUsage {
    /// Credits left on the key itself; `None` when the key is unlimited.
    pub fn remaining(&self) -> Option<i64> {
        match (self.limit, self.usage) {
            (Some(limit), Some(usage)) => Some(limit - usage),
            (Some(limit), None) => Some(limit),
            (None, _) => None,
        }
    }
}

impl AccountUsage {
    /// Credits left on the account: plan remainder plus pay-as-you-go
    /// remainder, each side null-as-unlimited.
    pub fn remaining(&self) -> Option<i64> {
        let plan = match (self.plan_limit, self.plan_usage) {
            (Some(limit), Some(usage)) => Some(limit - usage),
            (Some(limit), None) => Some(limit),
            (None, _) => None,
        };
        let paygo = match (self.paygo_limit, self.paygo_usage) {
            (Some(limit), Some(usage)) => Some(limit - usage),
            (Some(limit), None) => Some(limit),
            (None, _) => None,
        };
        match (plan, paygo) {
            (Some(p), Some(g)) => Some(p + g),
            (Some(p), None) => Some(p),
            (None, Some(g)) => Some(g),
            (None, None) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_delay_backs_off_to_cap() {
        let mut delay = RESEARCH_POLL_INITIAL;
        let mut schedule = Vec::new();
        for _ in 0..8 {
            schedule.push(delay.as_millis());
            delay = next_poll_delay(delay);
        }
        assert_eq!(schedule[0], 2_000);
        assert_eq!(schedule[1], 3_000);
        assert_eq!(schedule[2], 4_500);
        assert!(schedule.iter().all(|&ms| ms <= 10_000));
        assert_eq!(*schedule.last().unwrap(), 10_000);
    }

    #[test]
    fn research_budget_by_model() {
        assert_eq!(research_budget("mini"), Duration::from_secs(300));
        assert_eq!(research_budget("pro"), Duration::from_secs(900));
        assert_eq!(research_budget("unknown"), Duration::from_secs(300));
    }

    #[test]
    fn usage_body_parses() {
        let usage: CreditsUsage = serde_json::from_str(
            r#"{
                "key": { "usage": 120, "limit": 1000 },
                "account": { "plan_usage": 500, "plan_limit": 4000, "paygo_usage": 0, "paygo_limit": 100 }
            }"#,
        )
        .unwrap();
        assert_eq!(usage.key.remaining(), Some(880));
        assert_eq!(usage.account.remaining(), Some(3600));
    }

    #[test]
    fn unlimited_key_has_no_remaining() {
        let usage: CreditsUsage =
            serde_json::from_str(r#"{ "key": { "usage": 5 }, "account": {} }"#).unwrap();
        assert_eq!(usage.key.remaining(), None);
        assert_eq!(usage.account.remaining(), None);
    }
}
