//! Read-only telemetry over the usage logs.
//!
//! - `GET /admin/api/usage`          — recent raw rows
//! - `GET /admin/api/usage/summary`  — per-provider aggregates
//! - `GET /admin/api/cost-estimate`  — rough upstream spend from the logs
//! - `GET /admin/api/metrics`        — live gauge snapshot

use std::collections::HashMap;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use serde_json::json;

use sg_domain::model::{CallOutcome, KeyStatus, Provider, UsageRow};

use super::guard::AdminGuard;
use super::{api_error, store_error};
use crate::state::AppState;

/// How many rows each aggregate endpoint scans per provider.
const SUMMARY_SCAN_LIMIT: usize = 5_000;

#[derive(Deserialize)]
pub struct UsageQuery {
    provider: Option<String>,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    100
}

pub async fn usage(
    State(state): State<AppState>,
    Query(query): Query<UsageQuery>,
    _guard: AdminGuard,
) -> Response {
    let limit = query.limit.min(SUMMARY_SCAN_LIMIT);

    match query.provider.as_deref() {
        Some("tavily") => rows_response(&state, Provider::Tavily, limit).await,
        Some("brave") => rows_response(&state, Provider::Brave, limit).await,
        Some(other) => api_error(
            StatusCode::BAD_REQUEST,
            format!("unknown provider \"{other}\""),
        ),
        None => {
            let (tavily, brave) = match (
                state.store.recent_usage(Provider::Tavily, limit).await,
                state.store.recent_usage(Provider::Brave, limit).await,
            ) {
                (Ok(t), Ok(b)) => (t, b),
                (Err(e), _) | (_, Err(e)) => return store_error(e),
            };
            Json(json!({ "tavily": tavily, "brave": brave })).into_response()
        }
    }
}

async fn rows_response(state: &AppState, provider: Provider, limit: usize) -> Response {
    match state.store.recent_usage(provider, limit).await {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => store_error(e),
    }
}

pub async fn usage_summary(State(state): State<AppState>, _guard: AdminGuard) -> Response {
    let (tavily, brave) = match (
        state
            .store
            .recent_usage(Provider::Tavily, SUMMARY_SCAN_LIMIT)
            .await,
        state
            .store
            .recent_usage(Provider::Brave, SUMMARY_SCAN_LIMIT)
            .await,
    ) {
        (Ok(t), Ok(b)) => (t, b),
        (Err(e), _) | (_, Err(e)) => return store_error(e),
    };

    Json(json!({
        "tavily": summarize(&tavily),
        "brave": summarize(&brave),
    }))
    .into_response()
}

fn summarize(rows: &[UsageRow]) -> serde_json::Value {
    let total = rows.len();
    let success = rows
        .iter()
        .filter(|r| r.outcome == CallOutcome::Success)
        .count();

    let latencies: Vec<u64> = rows.iter().filter_map(|r| r.latency_ms).collect();
    let avg_latency_ms = if latencies.is_empty() {
        0
    } else {
        latencies.iter().sum::<u64>() / latencies.len() as u64
    };

    let mut by_tool: HashMap<&str, usize> = HashMap::new();
    for row in rows {
        *by_tool.entry(row.tool_name.as_str()).or_default() += 1;
    }

    json!({
        "total": total,
        "success": success,
        "error": total - success,
        "avgLatencyMs": avg_latency_ms,
        "byTool": by_tool,
    })
}

pub async fn cost_estimate(State(state): State<AppState>, _guard: AdminGuard) -> Response {
    let (tavily, brave) = match (
        state
            .store
            .recent_usage(Provider::Tavily, SUMMARY_SCAN_LIMIT)
            .await,
        state
            .store
            .recent_usage(Provider::Brave, SUMMARY_SCAN_LIMIT)
            .await,
    ) {
        (Ok(t), Ok(b)) => (t, b),
        (Err(e), _) | (_, Err(e)) => return store_error(e),
    };

    // Tavily bills in credits: advanced-depth searches cost 2, everything
    // else 1. Brave plans meter plain request counts.
    let tavily_success: Vec<&UsageRow> = tavily
        .iter()
        .filter(|r| r.outcome == CallOutcome::Success)
        .collect();
    let estimated_credits: u64 = tavily_success
        .iter()
        .map(|r| {
            let advanced = r
                .args_json
                .get("search_depth")
                .and_then(|v| v.as_str())
                .is_some_and(|d| d == "advanced");
            if advanced {
                2
            } else {
                1
            }
        })
        .sum();

    let brave_requests = brave
        .iter()
        .filter(|r| r.outcome == CallOutcome::Success)
        .count();

    Json(json!({
        "windowRows": SUMMARY_SCAN_LIMIT,
        "tavily": {
            "calls": tavily_success.len(),
            "estimatedCredits": estimated_credits,
        },
        "brave": {
            "requests": brave_requests,
        },
    }))
    .into_response()
}

pub async fn metrics(State(state): State<AppState>, _guard: AdminGuard) -> Response {
    let (tavily_keys, brave_keys) = match (
        state.store.list_tavily_keys().await,
        state.store.list_brave_keys().await,
    ) {
        (Ok(t), Ok(b)) => (t, b),
        (Err(e), _) | (_, Err(e)) => return store_error(e),
    };

    let mut tavily_status: HashMap<&str, usize> = HashMap::new();
    for key in &tavily_keys {
        *tavily_status.entry(status_name(key.status)).or_default() += 1;
    }
    let mut brave_status: HashMap<&str, usize> = HashMap::new();
    for key in &brave_keys {
        *brave_status.entry(status_name(key.status)).or_default() += 1;
    }

    Json(json!({
        "sessions": state.sessions.count(),
        "limiterIdentities": state.token_limiter.identity_count(),
        "tavilyKeys": tavily_status,
        "braveKeys": brave_status,
    }))
    .into_response()
}

fn status_name(status: KeyStatus) -> &'static str {
    match status {
        KeyStatus::Active => "active",
        KeyStatus::Disabled => "disabled",
        KeyStatus::Cooldown => "cooldown",
        KeyStatus::Invalid => "invalid",
    }
}
