//! Server policy: read and update the live settings.
//!
//! - `GET   /admin/api/server-info` — current policy plus entity counts
//! - `PATCH /admin/api/server-info` — update strategy / source mode / research

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use serde_json::json;

use sg_domain::model::{AuditRow, CallOutcome, SelectionStrategy, SourceMode};

use super::guard::AdminGuard;
use super::{api_error, audit, store_error};
use crate::state::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateServerInfoRequest {
    pub selection_strategy: Option<String>,
    pub search_source_mode: Option<String>,
    pub research_enabled: Option<bool>,
}

pub async fn server_info(State(state): State<AppState>, _guard: AdminGuard) -> Response {
    let (tavily_keys, brave_keys, tokens) = match (
        state.store.list_tavily_keys().await,
        state.store.list_brave_keys().await,
        state.store.list_tokens().await,
    ) {
        (Ok(t), Ok(b), Ok(k)) => (t.len(), b.len(), k.len()),
        (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => return store_error(e),
    };

    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "selectionStrategy": state.settings.selection_strategy().await,
        "searchSourceMode": state.settings.source_mode().await,
        "researchEnabled": state.settings.research_enabled().await,
        "counts": {
            "tavilyKeys": tavily_keys,
            "braveKeys": brave_keys,
            "tokens": tokens,
        },
        "sessions": state.sessions.count(),
    }))
    .into_response()
}

pub async fn update_server_info(
    State(state): State<AppState>,
    guard: AdminGuard,
    Json(body): Json<UpdateServerInfoRequest>,
) -> Response {
    if let Some(raw) = &body.selection_strategy {
        let Some(strategy) = SelectionStrategy::parse(raw) else {
            return api_error(
                StatusCode::BAD_REQUEST,
                format!("unknown selectionStrategy \"{raw}\""),
            );
        };
        if let Err(e) = state.settings.set_selection_strategy(strategy).await {
            return store_error(e);
        }
    }

    if let Some(raw) = &body.search_source_mode {
        let Some(mode) = SourceMode::parse(raw) else {
            return api_error(
                StatusCode::BAD_REQUEST,
                format!("unknown searchSourceMode \"{raw}\""),
            );
        };
        if let Err(e) = state.settings.set_source_mode(mode).await {
            return store_error(e);
        }
    }

    if let Some(enabled) = body.research_enabled {
        if let Err(e) = state.settings.set_research_enabled(enabled).await {
            return store_error(e);
        }
    }

    audit(
        &state,
        &guard,
        AuditRow::new("settings.update", CallOutcome::Success).details(json!({
            "selectionStrategy": body.selection_strategy,
            "searchSourceMode": body.search_source_mode,
            "researchEnabled": body.research_enabled,
        })),
    )
    .await;

    Json(json!({
        "selectionStrategy": state.settings.selection_strategy().await,
        "searchSourceMode": state.settings.source_mode().await,
        "researchEnabled": state.settings.research_enabled().await,
    }))
    .into_response()
}
