//! The client-facing MCP endpoint.
//!
//! `POST /mcp` runs the full pipeline per request: bearer-token
//! validation, global and per-token rate limiting, credit preflight for
//! tool calls, session routing, dispatch, and usage accounting.
//! `GET /mcp` is the server→client event stream for an existing session.

use std::convert::Infallible;
use std::time::Instant;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use sg_domain::model::{ClientToken, SourceMode};
use sg_vault::{constant_time_eq, sha256_hex, split_token};

use crate::dispatch::ToolCall;
use crate::limiter::LimitDecision;
use crate::mcp::protocol::{
    initialize_result, tool_text_result, JsonRpcRequest, JsonRpcResponse, RpcBody,
    INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND, SESSION_ERROR,
};
use crate::mcp::session::{MISSING_SESSION, UNKNOWN_SESSION};
use crate::mcp::tools::tool_definitions;
use crate::pool::Preflight;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct AuthQuery {
    token: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /mcp
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn post_mcp(
    State(state): State<AppState>,
    Query(auth): Query<AuthQuery>,
    headers: HeaderMap,
    Json(raw_body): Json<Value>,
) -> Response {
    // 1–2. Client token.
    let token = match authenticate(&state, &headers, auth.token.as_deref()).await {
        Ok(token) => token,
        Err(reply) => return reply,
    };

    // 3. Global limiter first, then the per-token window (which a token's
    // own rateLimit overrides).
    if let LimitDecision::Limited { retry_after_ms } = state.global_limiter.check("global") {
        return rate_limited_response(retry_after_ms);
    }
    let per_token_max = token
        .rate_limit
        .unwrap_or(state.config.limits.per_token_per_minute);
    if let LimitDecision::Limited { retry_after_ms } =
        state.token_limiter.check_with_limit(&token.id, per_token_max)
    {
        return rate_limited_response(retry_after_ms);
    }

    let body = match RpcBody::parse(raw_body) {
        Ok(body) => body,
        Err(message) => {
            return json_rpc_http_error(StatusCode::BAD_REQUEST, INVALID_REQUEST, message)
        }
    };

    // 4. Preflight before any tool call reaches a provider. Skipped when
    // the pool cannot be involved (brave_only serves search from Brave).
    if body.requests().iter().any(|r| r.method == "tools/call") {
        let mode = state.settings.source_mode().await;
        if mode != SourceMode::BraveOnly {
            match state.pool.preflight().await {
                Ok(Preflight::Ok) => {}
                Ok(Preflight::Throttled {
                    retry_after_ms,
                    reason,
                }) => return preflight_throttled_response(retry_after_ms, &reason),
                Err(e) => {
                    tracing::error!(error = %e, "preflight failed");
                    return internal_error_response();
                }
            }
        }
    }

    // 5. Session routing: initialize mints a session, everything else
    // must present one.
    let session_header = headers
        .get("mcp-session-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let (session_id, minted) = match (session_header, body.contains_initialize()) {
        (None, true) => {
            let (version, client) = initialize_client_info(&body);
            let entry = state.sessions.create(version, client);
            (entry.session_id, true)
        }
        (None, false) => {
            return json_rpc_http_error(StatusCode::BAD_REQUEST, SESSION_ERROR, MISSING_SESSION)
        }
        (Some(id), _) => {
            if !state.sessions.touch(&id) {
                return json_rpc_http_error(
                    StatusCode::BAD_REQUEST,
                    SESSION_ERROR,
                    UNKNOWN_SESSION,
                );
            }
            (id, false)
        }
    };

    // One in-flight request per session.
    let _permit = state.sessions.acquire(&session_id).await;

    let mut responses = Vec::new();
    for request in body.requests() {
        if let Some(response) = handle_rpc(&state, &token, request).await {
            responses.push(response);
        }
    }

    let mut reply = match (&body, responses.len()) {
        // All notifications: nothing to return.
        (_, 0) => StatusCode::ACCEPTED.into_response(),
        (RpcBody::Single(_), _) => Json(responses.remove(0)).into_response(),
        (RpcBody::Batch(_), _) => Json(responses).into_response(),
    };
    if minted {
        if let Ok(value) = session_id.parse() {
            reply.headers_mut().insert("mcp-session-id", value);
        }
    }
    reply
}

/// Protocol version and client name from the initialize params, if sent.
fn initialize_client_info(body: &RpcBody) -> (Option<String>, Option<String>) {
    let Some(init) = body.requests().iter().find(|r| r.method == "initialize") else {
        return (None, None);
    };
    let params = init.params.as_ref();
    let version = params
        .and_then(|p| p.get("protocolVersion"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let client = params
        .and_then(|p| p.pointer("/clientInfo/name"))
        .and_then(Value::as_str)
        .map(str::to_string);
    (version, client)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /mcp (event stream)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn get_mcp(
    State(state): State<AppState>,
    Query(auth): Query<AuthQuery>,
    headers: HeaderMap,
) -> Response {
    if let Err(reply) = authenticate(&state, &headers, auth.token.as_deref()).await {
        return reply;
    }

    let Some(session_id) = headers.get("mcp-session-id").and_then(|v| v.to_str().ok()) else {
        return json_rpc_http_error(StatusCode::BAD_REQUEST, SESSION_ERROR, MISSING_SESSION);
    };
    if !state.sessions.touch(session_id) {
        return json_rpc_http_error(StatusCode::BAD_REQUEST, SESSION_ERROR, UNKNOWN_SESSION);
    }

    // No server-initiated messages today: hold the stream open and let
    // the keep-alive comments do the talking.
    let stream = futures_util::stream::pending::<Result<Event, Infallible>>();
    Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Per-request evaluation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Evaluate one JSON-RPC request. Returns `None` for notifications.
async fn handle_rpc(
    state: &AppState,
    token: &ClientToken,
    request: &JsonRpcRequest,
) -> Option<JsonRpcResponse> {
    if request.is_notification() {
        return None;
    }
    let id = request.response_id();

    match request.method.as_str() {
        "initialize" => Some(JsonRpcResponse::ok(id, initialize_result())),
        "ping" => Some(JsonRpcResponse::ok(id, json!({}))),
        "tools/list" => {
            let research = state.settings.research_enabled().await;
            let tools = tool_definitions(research);
            Some(JsonRpcResponse::ok(id, json!({ "tools": tools })))
        }
        "tools/call" => Some(handle_tool_call(state, token, request, id).await),
        _ => Some(JsonRpcResponse::error(
            id,
            METHOD_NOT_FOUND,
            format!("method \"{}\" not found", request.method),
        )),
    }
}

async fn handle_tool_call(
    state: &AppState,
    token: &ClientToken,
    request: &JsonRpcRequest,
    id: Value,
) -> JsonRpcResponse {
    let params = request.params.clone().unwrap_or(Value::Null);
    let Some(tool_name) = params.get("name").and_then(Value::as_str) else {
        return JsonRpcResponse::error(id, INVALID_PARAMS, "tools/call requires a tool name");
    };
    let tool_name = tool_name.to_string();
    let arguments = params
        .get("arguments")
        .cloned()
        .unwrap_or_else(|| json!({}));

    // 5. Per-token tool allowlist.
    if !token.allows_tool(&tool_name) {
        let allowed = token
            .allowed_tools
            .clone()
            .unwrap_or_default()
            .join(", ");
        return JsonRpcResponse::error(
            id,
            INVALID_REQUEST,
            format!("tool \"{tool_name}\" is not allowed for this token (allowed: {allowed})"),
        );
    }

    if tool_name == "tavily_research" && !state.settings.research_enabled().await {
        return JsonRpcResponse::error(
            id,
            INVALID_REQUEST,
            "tavily_research is disabled on this server",
        );
    }

    let Some(call) = ToolCall::parse(&tool_name, arguments) else {
        return JsonRpcResponse::error(id, INVALID_PARAMS, format!("unknown tool \"{tool_name}\""));
    };

    let started = Instant::now();
    let dispatched = match state.dispatcher.dispatch(&call).await {
        Ok(dispatched) => dispatched,
        Err(e) => {
            tracing::error!(tool = %tool_name, error = %e, "dispatch failed");
            return JsonRpcResponse::error(id, INTERNAL_ERROR, "internal error");
        }
    };
    let latency_ms = started.elapsed().as_millis() as u64;

    // 6. Usage accounting, one row per provider touched.
    state
        .usage
        .record(
            &tool_name,
            &dispatched.uses,
            token,
            call.query(),
            call.args(),
            latency_ms,
        )
        .await;

    let result = match dispatched.payload {
        Ok(payload) => {
            let text = serde_json::to_string_pretty(&payload)
                .unwrap_or_else(|_| payload.to_string());
            tool_text_result(text, false)
        }
        Err(message) => tool_text_result(message, true),
    };
    JsonRpcResponse::ok(id, result)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Auth & error replies
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Resolve and verify the client token for this request.
async fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
    query_token: Option<&str>,
) -> Result<ClientToken, Response> {
    let bearer = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    let presented = match (bearer, query_token) {
        (Some(b), _) => Some(b),
        (None, Some(q)) if state.config.server.enable_query_auth => Some(q),
        _ => None,
    };

    let Some(presented) = presented else {
        return Err(json_rpc_http_error(
            StatusCode::UNAUTHORIZED,
            SESSION_ERROR,
            "Missing Authorization: Bearer <token>",
        ));
    };

    let Some((prefix, secret)) = split_token(presented) else {
        return Err(unauthorized_response());
    };

    let record = match state.store.find_token_by_prefix(prefix).await {
        Ok(Some(record)) => record,
        Ok(None) => return Err(unauthorized_response()),
        Err(e) => {
            tracing::error!(error = %e, "token lookup failed");
            return Err(internal_error_response());
        }
    };

    // Hash the presented secret and compare against the stored digest in
    // constant time.
    let presented_hash = sha256_hex(secret.as_bytes());
    if !constant_time_eq(presented_hash.as_bytes(), record.secret_hash.as_bytes()) {
        return Err(unauthorized_response());
    }
    if !record.is_valid(Utc::now()) {
        return Err(unauthorized_response());
    }

    Ok(record)
}

fn json_rpc_http_error(status: StatusCode, code: i64, message: impl Into<String>) -> Response {
    (
        status,
        Json(JsonRpcResponse::error(Value::Null, code, message)),
    )
        .into_response()
}

fn unauthorized_response() -> Response {
    json_rpc_http_error(StatusCode::UNAUTHORIZED, SESSION_ERROR, "Unauthorized")
}

fn internal_error_response() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "Internal server error" })),
    )
        .into_response()
}

fn rate_limited_response(retry_after_ms: u64) -> Response {
    (
        StatusCode::TOO_MANY_REQUESTS,
        Json(json!({
            "error": "Rate limit exceeded",
            "retryAfterMs": retry_after_ms,
        })),
    )
        .into_response()
}

fn preflight_throttled_response(retry_after_ms: u64, reason: &str) -> Response {
    let mut reply = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(json!({
            "error": "No keys with credits",
            "retryAfterMs": retry_after_ms,
            "reason": reason,
        })),
    )
        .into_response();
    let seconds = retry_after_ms.div_ceil(1_000).max(1);
    if let Ok(value) = seconds.to_string().parse() {
        reply.headers_mut().insert("Retry-After", value);
    }
    reply
}
