//! Admin API surface under `/admin/api`.
//!
//! Every handler authenticates through [`guard::AdminGuard`]; mutations
//! append an audit row.

pub mod brave_keys;
pub mod guard;
pub mod keys;
pub mod settings;
pub mod telemetry;
pub mod tokens;
pub mod transfer;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};

use sg_domain::error::Error;
use sg_domain::model::AuditRow;

use crate::state::AppState;
use guard::AdminGuard;

/// Build a standardized JSON error response: `{ "error": "<message>" }`.
pub(crate) fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

/// Map a store/domain error to the admin HTTP surface: constraint
/// violations are 400, unknown resources 404, everything else 500 with
/// the cause logged.
pub(crate) fn store_error(e: Error) -> Response {
    match e {
        Error::NotFound(message) => api_error(StatusCode::NOT_FOUND, message),
        Error::Conflict(message) => api_error(StatusCode::BAD_REQUEST, message),
        other => {
            tracing::error!(error = %other, "admin operation failed");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        }
    }
}

/// Append an audit row stamped with the caller metadata from the guard.
pub(crate) async fn audit(state: &AppState, guard: &AdminGuard, mut row: AuditRow) {
    row.ip = guard.ip.clone();
    row.user_agent = guard.user_agent.clone();
    if let Err(e) = state.store.append_audit(row).await {
        tracing::warn!(error = %e, "audit row write failed");
    }
}
