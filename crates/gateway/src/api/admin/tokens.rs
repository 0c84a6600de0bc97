//! Client-token management.
//!
//! The full token appears exactly once, in the create response. Listings
//! only ever show the public prefix.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sg_domain::model::{AuditRow, CallOutcome, ClientToken};
use sg_vault::generate_client_token;

use super::guard::AdminGuard;
use super::{api_error, audit, store_error};
use crate::state::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenView {
    pub id: String,
    pub description: Option<String>,
    pub prefix: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub allowed_tools: Option<Vec<String>>,
    pub rate_limit: Option<u32>,
    pub created_at: DateTime<Utc>,
}

impl From<ClientToken> for TokenView {
    fn from(token: ClientToken) -> Self {
        Self {
            id: token.id,
            description: token.description,
            prefix: token.prefix,
            expires_at: token.expires_at,
            revoked_at: token.revoked_at,
            allowed_tools: token.allowed_tools,
            rate_limit: token.rate_limit,
            created_at: token.created_at,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTokenRequest {
    pub description: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub allowed_tools: Option<Vec<String>>,
    pub rate_limit: Option<u32>,
}

pub async fn list_tokens(State(state): State<AppState>, _guard: AdminGuard) -> Response {
    match state.store.list_tokens().await {
        Ok(mut tokens) => {
            tokens.sort_by_key(|t| t.created_at);
            let views: Vec<TokenView> = tokens.into_iter().map(TokenView::from).collect();
            Json(views).into_response()
        }
        Err(e) => store_error(e),
    }
}

pub async fn create_token(
    State(state): State<AppState>,
    guard: AdminGuard,
    Json(body): Json<CreateTokenRequest>,
) -> Response {
    if let Some(expires_at) = body.expires_at {
        if expires_at <= Utc::now() {
            return api_error(StatusCode::BAD_REQUEST, "expiresAt must be in the future");
        }
    }

    let issued = generate_client_token();
    let token = ClientToken {
        id: uuid::Uuid::new_v4().to_string(),
        description: body.description,
        prefix: issued.prefix,
        secret_hash: issued.secret_hash,
        expires_at: body.expires_at,
        revoked_at: None,
        allowed_tools: body.allowed_tools,
        rate_limit: body.rate_limit,
        created_at: Utc::now(),
    };
    let view = TokenView::from(token.clone());

    if let Err(e) = state.store.insert_token(token).await {
        return store_error(e);
    }
    audit(
        &state,
        &guard,
        AuditRow::new("token.create", CallOutcome::Success)
            .resource("client_token", &view.id)
            .details(serde_json::json!({
                "prefix": view.prefix,
                "description": view.description,
            })),
    )
    .await;

    // The one and only time the full token leaves the server.
    (
        StatusCode::CREATED,
        Json(serde_json::json!({
            "token": issued.token,
            "record": view,
        })),
    )
        .into_response()
}

pub async fn revoke_token(
    State(state): State<AppState>,
    Path(id): Path<String>,
    guard: AdminGuard,
) -> Response {
    match state.store.revoke_token(&id).await {
        Ok(true) => {
            audit(
                &state,
                &guard,
                AuditRow::new("token.revoke", CallOutcome::Success).resource("client_token", &id),
            )
            .await;
            Json(serde_json::json!({ "ok": true })).into_response()
        }
        Ok(false) => api_error(StatusCode::NOT_FOUND, format!("token {id}")),
        Err(e) => store_error(e),
    }
}

pub async fn delete_token(
    State(state): State<AppState>,
    Path(id): Path<String>,
    guard: AdminGuard,
) -> Response {
    match state.store.delete_token(&id).await {
        Ok(true) => {
            audit(
                &state,
                &guard,
                AuditRow::new("token.delete", CallOutcome::Success).resource("client_token", &id),
            )
            .await;
            Json(serde_json::json!({ "ok": true })).into_response()
        }
        Ok(false) => api_error(StatusCode::NOT_FOUND, format!("token {id}")),
        Err(e) => store_error(e),
    }
}
