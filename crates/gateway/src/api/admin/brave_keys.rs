//! Brave key management. Same surface as the Tavily keys minus credit
//! accounting — Brave keys have no cooldown or snapshot.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sg_domain::model::{AuditRow, BraveKey, CallOutcome, KeyStatus};
use sg_vault::mask_secret;

use super::guard::AdminGuard;
use super::{api_error, audit, store_error};
use crate::state::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BraveKeyView {
    pub id: String,
    pub label: String,
    pub masked: String,
    pub status: KeyStatus,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<BraveKey> for BraveKeyView {
    fn from(key: BraveKey) -> Self {
        Self {
            id: key.id,
            label: key.label,
            masked: key.masked,
            status: key.status,
            last_used_at: key.last_used_at,
            created_at: key.created_at,
            updated_at: key.updated_at,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBraveKeyRequest {
    pub label: String,
    pub api_key: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBraveKeyRequest {
    pub label: Option<String>,
    pub status: Option<KeyStatus>,
}

pub async fn list_keys(State(state): State<AppState>, _guard: AdminGuard) -> Response {
    match state.store.list_brave_keys().await {
        Ok(mut keys) => {
            keys.sort_by_key(|k| k.created_at);
            let views: Vec<BraveKeyView> = keys.into_iter().map(BraveKeyView::from).collect();
            Json(views).into_response()
        }
        Err(e) => store_error(e),
    }
}

pub async fn create_key(
    State(state): State<AppState>,
    guard: AdminGuard,
    Json(body): Json<CreateBraveKeyRequest>,
) -> Response {
    let label = body.label.trim();
    if label.is_empty() || body.api_key.trim().is_empty() {
        return api_error(StatusCode::BAD_REQUEST, "label and apiKey are required");
    }

    let ciphertext = match state.vault.encrypt(&body.api_key) {
        Ok(ct) => ct,
        Err(e) => return store_error(e),
    };
    let key = BraveKey::new(label, ciphertext, mask_secret(&body.api_key));
    let view = BraveKeyView::from(key.clone());

    if let Err(e) = state.store.insert_brave_key(key).await {
        return store_error(e);
    }
    audit(
        &state,
        &guard,
        AuditRow::new("brave_key.create", CallOutcome::Success)
            .resource("brave_key", &view.id)
            .details(serde_json::json!({ "label": view.label })),
    )
    .await;
    (StatusCode::CREATED, Json(view)).into_response()
}

pub async fn update_key(
    State(state): State<AppState>,
    Path(id): Path<String>,
    guard: AdminGuard,
    Json(body): Json<UpdateBraveKeyRequest>,
) -> Response {
    // Brave keys have no cooldown state at all.
    if matches!(body.status, Some(KeyStatus::Cooldown) | Some(KeyStatus::Invalid)) {
        return api_error(
            StatusCode::BAD_REQUEST,
            "status may only be set to \"active\" or \"disabled\"",
        );
    }

    let mut key = match state.store.get_brave_key(&id).await {
        Ok(Some(key)) => key,
        Ok(None) => return api_error(StatusCode::NOT_FOUND, format!("brave key {id}")),
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
    }
    key.updated_at = Utc::now();

    let view = BraveKeyView::from(key.clone());
    if let Err(e) = state.store.update_brave_key(key).await {
        return store_error(e);
    }
    audit(
        &state,
        &guard,
        AuditRow::new("brave_key.update", CallOutcome::Success)
            .resource("brave_key", &id)
            .details(serde_json::json!({ "label": body.label, "status": body.status })),
    )
    .await;
    Json(view).into_response()
}

pub async fn delete_key(
    State(state): State<AppState>,
    Path(id): Path<String>,
    guard: AdminGuard,
) -> Response {
    match state.store.delete_brave_key(&id).await {
        Ok(true) => {
            audit(
                &state,
                &guard,
                AuditRow::new("brave_key.delete", CallOutcome::Success).resource("brave_key", &id),
            )
            .await;
            Json(serde_json::json!({ "ok": true })).into_response()
        }
        Ok(false) => api_error(StatusCode::NOT_FOUND, format!("brave key {id}")),
        Err(e) => store_error(e),
    }
}

pub async fn reveal_key(
    State(state): State<AppState>,
    Path(id): Path<String>,
    guard: AdminGuard,
) -> Response {
    let key = match state.store.get_brave_key(&id).await {
        Ok(Some(key)) => key,
        Ok(None) => return api_error(StatusCode::NOT_FOUND, format!("brave key {id}")),
        Err(e) => return store_error(e),
    };
    let secret = match state.vault.decrypt(&key.ciphertext) {
        Ok(secret) => secret,
        Err(e) => return store_error(e),
    };

    audit(
        &state,
        &guard,
        AuditRow::new("brave_key.reveal", CallOutcome::Success).resource("brave_key", &id),
    )
    .await;
    Json(serde_json::json!({
        "id": key.id,
        "label": key.label,
        "apiKey": secret,
    }))
    .into_response()
}
