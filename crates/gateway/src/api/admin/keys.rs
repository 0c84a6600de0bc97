//! Tavily key management.
//!
//! - `GET    /admin/api/keys`                    — list (masked)
//! - `POST   /admin/api/keys`                    — create
//! - `PATCH  /admin/api/keys/:id`                — relabel / enable / disable
//! - `DELETE /admin/api/keys/:id`                — delete
//! - `GET    /admin/api/keys/:id/reveal`         — decrypt (per-IP limited)
//! - `POST   /admin/api/keys/:id/refresh-credits`— refresh snapshot under lease
//! - `POST   /admin/api/keys/sync-credits`       — refresh all non-invalid keys

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sg_domain::error::Error;
use sg_domain::model::{AuditRow, CallOutcome, CreditSnapshot, KeyStatus, TavilyKey};
use sg_vault::mask_secret;

use super::guard::AdminGuard;
use super::{api_error, audit, store_error};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Views & request bodies
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A key as the admin API returns it — never the ciphertext.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyView {
    pub id: String,
    pub label: String,
    pub masked: String,
    pub status: KeyStatus,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub credits: CreditSnapshot,
}

impl From<TavilyKey> for KeyView {
    fn from(key: TavilyKey) -> Self {
        Self {
            id: key.id,
            label: key.label,
            masked: key.masked,
            status: key.status,
            cooldown_until: key.cooldown_until,
            last_used_at: key.last_used_at,
            created_at: key.created_at,
            updated_at: key.updated_at,
            credits: key.credits,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateKeyRequest {
    pub label: String,
    pub api_key: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateKeyRequest {
    pub label: Option<String>,
    pub status: Option<KeyStatus>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handlers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn list_keys(State(state): State<AppState>, _guard: AdminGuard) -> Response {
    match state.store.list_tavily_keys().await {
        Ok(mut keys) => {
            keys.sort_by_key(|k| k.created_at);
            let views: Vec<KeyView> = keys.into_iter().map(KeyView::from).collect();
            Json(views).into_response()
        }
        Err(e) => store_error(e),
    }
}

pub async fn create_key(
    State(state): State<AppState>,
    guard: AdminGuard,
    Json(body): Json<CreateKeyRequest>,
) -> Response {
    let label = body.label.trim();
    if label.is_empty() || body.api_key.trim().is_empty() {
        return api_error(StatusCode::BAD_REQUEST, "label and apiKey are required");
    }

    let ciphertext = match state.vault.encrypt(&body.api_key) {
        Ok(ct) => ct,
        Err(e) => return store_error(e),
    };
    let key = TavilyKey::new(label, ciphertext, mask_secret(&body.api_key));
    let view = KeyView::from(key.clone());

    if let Err(e) = state.store.insert_tavily_key(key).await {
        return store_error(e);
    }
    audit(
        &state,
        &guard,
        AuditRow::new("key.create", CallOutcome::Success)
            .resource("tavily_key", &view.id)
            .details(serde_json::json!({ "label": view.label })),
    )
    .await;

    (StatusCode::CREATED, Json(view)).into_response()
}

pub async fn update_key(
    State(state): State<AppState>,
    Path(id): Path<String>,
    guard: AdminGuard,
    Json(body): Json<UpdateKeyRequest>,
) -> Response {
    // Admin moves keys between active and disabled only; cooldown and
    // invalid are machine-set states.
    if matches!(body.status, Some(KeyStatus::Cooldown) | Some(KeyStatus::Invalid)) {
        return api_error(
            StatusCode::BAD_REQUEST,
            "status may only be set to \"active\" or \"disabled\"",
        );
    }

    let mut key = match state.store.get_tavily_key(&id).await {
        Ok(Some(key)) => key,
        Ok(None) => return api_error(StatusCode::NOT_FOUND, format!("tavily key {id}")),
        Err(e) => return store_error(e),
    };

    if let Some(label) = &body.label {
        let label = label.trim();
        if label.is_empty() {
            return api_error(StatusCode::BAD_REQUEST, "label must not be empty");
        }
        key.label = label.to_string();
    }
    if let Some(status) = body.status {
        key.status = status;
        // Re-activating (or disabling) clears any pending cooldown.
        key.cooldown_until = None;
    }
    key.updated_at = Utc::now();

    let view = KeyView::from(key.clone());
    if let Err(e) = state.store.update_tavily_key(key).await {
        return store_error(e);
    }
    audit(
        &state,
        &guard,
        AuditRow::new("key.update", CallOutcome::Success)
            .resource("tavily_key", &id)
            .details(serde_json::json!({
                "label": body.label,
                "status": body.status,
            })),
    )
    .await;
    Json(view).into_response()
}

pub async fn delete_key(
    State(state): State<AppState>,
    Path(id): Path<String>,
    guard: AdminGuard,
) -> Response {
    match state.store.delete_tavily_key(&id).await {
        Ok(true) => {
            audit(
                &state,
                &guard,
                AuditRow::new("key.delete", CallOutcome::Success).resource("tavily_key", &id),
            )
            .await;
            Json(serde_json::json!({ "ok": true })).into_response()
        }
        Ok(false) => api_error(StatusCode::NOT_FOUND, format!("tavily key {id}")),
        Err(e) => store_error(e),
    }
}

pub async fn reveal_key(
    State(state): State<AppState>,
    Path(id): Path<String>,
    guard: AdminGuard,
) -> Response {
    let key = match state.store.get_tavily_key(&id).await {
        Ok(Some(key)) => key,
        Ok(None) => return api_error(StatusCode::NOT_FOUND, format!("tavily key {id}")),
        Err(e) => return store_error(e),
    };
    let secret = match state.vault.decrypt(&key.ciphertext) {
        Ok(secret) => secret,
        Err(e) => return store_error(e),
    };

    audit(
        &state,
        &guard,
        AuditRow::new("key.reveal", CallOutcome::Success).resource("tavily_key", &id),
    )
    .await;
    Json(serde_json::json!({
        "id": key.id,
        "label": key.label,
        "apiKey": secret,
    }))
    .into_response()
}

pub async fn refresh_credits(
    State(state): State<AppState>,
    Path(id): Path<String>,
    guard: AdminGuard,
) -> Response {
    match state.pool.refresh_credits(&id).await {
        Ok(snapshot) => {
            audit(
                &state,
                &guard,
                AuditRow::new("key.refresh_credits", CallOutcome::Success)
                    .resource("tavily_key", &id)
                    .details(serde_json::json!({ "remaining": snapshot.remaining })),
            )
            .await;
            Json(snapshot).into_response()
        }
        Err(Error::Conflict(message)) => api_error(StatusCode::CONFLICT, message),
        Err(Error::NotFound(message)) => api_error(StatusCode::NOT_FOUND, message),
        Err(e) => {
            audit(
                &state,
                &guard,
                AuditRow::new("key.refresh_credits", CallOutcome::Error)
                    .resource("tavily_key", &id)
                    .details(serde_json::json!({ "error": e.to_string() })),
            )
            .await;
            api_error(StatusCode::BAD_GATEWAY, e.to_string())
        }
    }
}

pub async fn sync_credits(State(state): State<AppState>, guard: AdminGuard) -> Response {
    match state.pool.sync_all_credits().await {
        Ok(report) => {
            audit(
                &state,
                &guard,
                AuditRow::new("key.sync_credits", CallOutcome::Success)
                    .details(serde_json::to_value(&report).unwrap_or_default()),
            )
            .await;
            Json(report).into_response()
        }
        Err(e) => store_error(e),
    }
}
