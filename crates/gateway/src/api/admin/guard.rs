//! Admin auth guard — `AdminGuard` Axum extractor.
//!
//! Handlers opt in by adding `guard: AdminGuard` to their parameter
//! list. The guard also captures caller metadata for audit rows.

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::Json;

use sg_vault::{constant_time_eq, sha256};

use crate::state::AppState;

/// Axum extractor that enforces the admin bearer token.
///
/// The presented token is hashed to a fixed-length digest and compared
/// in constant time, so neither content nor length leaks through timing.
pub struct AdminGuard {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

#[async_trait]
impl FromRequestParts<AppState> for AdminGuard {
    type Rejection = (StatusCode, Json<serde_json::Value>);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let provided = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .unwrap_or("");

        let provided_hash = sha256(provided.as_bytes());
        if !constant_time_eq(&provided_hash, state.admin_token_hash.as_slice()) {
            return Err((
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({ "error": "Unauthorized" })),
            ));
        }

        let ip = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(|v| v.trim().to_string());
        let user_agent = parts
            .headers
            .get("user-agent")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Ok(AdminGuard { ip, user_agent })
    }
}
