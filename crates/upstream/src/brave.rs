//! Brave Search (P-B) client: web and local search.
//!
//! Brave's API is GET-based with query parameters and authenticates via
//! the `X-Subscription-Token` header.

use std::time::Duration;

use serde_json::Value;

use sg_domain::error::Result;
use sg_domain::model::Provider;

use crate::classify::{classify_failure, from_reqwest, invalid_response};

pub struct BraveClient {
    http: reqwest::Client,
    base_url: String,
}

impl BraveClient {
    pub fn new(base_url: &str, timeout_ms: u64) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| from_reqwest(Provider::Brave, e))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub async fn web_search(&self, api_key: &str, args: &Value) -> Result<Value> {
        self.get_json("/web/search", api_key, query_pairs(args)).await
    }

    /// Local search rides the web endpoint with a locations filter; result
    /// entries carry `name`/`website` instead of `title`/`url`.
    pub async fn local_search(&self, api_key: &str, args: &Value) -> Result<Value> {
        let mut pairs = query_pairs(args);
        pairs.push(("result_filter".into(), "locations".into()));
        self.get_json("/web/search", api_key, pairs).await
    }

    async fn get_json(
        &self,
        path: &str,
        api_key: &str,
        query: Vec<(String, String)>,
    ) -> Result<Value> {
        let response = self
            .http
            .get(format!("{}{path}", self.base_url))
            .header("X-Subscription-Token", api_key)
            .header("Accept", "application/json")
            .query(&query)
            .send()
            .await
            .map_err(|e| from_reqwest(Provider::Brave, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| from_reqwest(Provider::Brave, e))?;

        if !status.is_success() {
            return Err(classify_failure(Provider::Brave, status, &body));
        }
        serde_json::from_str(&body)
            .map_err(|_| invalid_response(Provider::Brave, "expected a JSON body"))
    }
}

/// Flatten a JSON argument object into query pairs. Scalars are
/// stringified; arrays and objects are skipped (Brave has none).
fn query_pairs(args: &Value) -> Vec<(String, String)> {
    let Some(map) = args.as_object() else {
        return Vec::new();
    };
    map.iter()
        .filter_map(|(k, v)| {
            let rendered = match v {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => return None,
            };
            Some((k.clone(), rendered))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_pairs_stringifies_scalars() {
        let args = serde_json::json!({
            "q": "rust web framework",
            "count": 10,
            "safesearch": true,
            "filters": ["ignored"],
        });
        let mut pairs = query_pairs(&args);
        pairs.sort();
        assert_eq!(
            pairs,
            vec![
                ("count".to_string(), "10".to_string()),
                ("q".to_string(), "rust web framework".to_string()),
                ("safesearch".to_string(), "true".to_string()),
            ]
        );
    }

    #[test]
    fn query_pairs_of_non_object_is_empty() {
        assert!(query_pairs(&serde_json::json!("just a string")).is_empty());
        assert!(query_pairs(&serde_json::json!(null)).is_empty());
    }
}
