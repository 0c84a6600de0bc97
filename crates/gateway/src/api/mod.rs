pub mod admin;
pub mod mcp;

use std::sync::Arc;

use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::Router;

use crate::state::AppState;

/// Public liveness probe.
pub async fn health() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Build the full API router.
///
/// `/health` is public, `/mcp` authenticates client tokens inside the
/// handler, and everything under `/admin/api` goes through the
/// `AdminGuard` extractor. The reveal endpoints additionally sit behind
/// a per-IP limiter.
pub fn router() -> Router<AppState> {
    let reveal_governor = {
        use tower_governor::governor::GovernorConfigBuilder;
        use tower_governor::GovernorLayer;

        let config = GovernorConfigBuilder::default()
            .per_second(1)
            .burst_size(5)
            .finish()
            .expect("reveal limiter: per_second and burst_size must be > 0");
        GovernorLayer {
            config: Arc::new(config),
        }
    };

    let reveal = Router::new()
        .route("/keys/:id/reveal", get(admin::keys::reveal_key))
        .route("/brave-keys/:id/reveal", get(admin::brave_keys::reveal_key))
        .route_layer(reveal_governor);

    let admin_api = Router::new()
        // Server policy
        .route(
            "/server-info",
            get(admin::settings::server_info).patch(admin::settings::update_server_info),
        )
        // Tavily keys
        .route(
            "/keys",
            get(admin::keys::list_keys).post(admin::keys::create_key),
        )
        .route("/keys/export", get(admin::transfer::export_keys))
        .route("/keys/import", post(admin::transfer::import_keys))
        .route("/keys/sync-credits", post(admin::keys::sync_credits))
        .route(
            "/keys/:id",
            axum::routing::patch(admin::keys::update_key).delete(admin::keys::delete_key),
        )
        .route(
            "/keys/:id/refresh-credits",
            post(admin::keys::refresh_credits),
        )
        // Brave keys
        .route(
            "/brave-keys",
            get(admin::brave_keys::list_keys).post(admin::brave_keys::create_key),
        )
        .route(
            "/brave-keys/:id",
            axum::routing::patch(admin::brave_keys::update_key)
                .delete(admin::brave_keys::delete_key),
        )
        // Client tokens
        .route(
            "/tokens",
            get(admin::tokens::list_tokens).post(admin::tokens::create_token),
        )
        .route("/tokens/:id/revoke", post(admin::tokens::revoke_token))
        .route("/tokens/:id", delete(admin::tokens::delete_token))
        // Telemetry
        .route("/usage", get(admin::telemetry::usage))
        .route("/usage/summary", get(admin::telemetry::usage_summary))
        .route("/cost-estimate", get(admin::telemetry::cost_estimate))
        .route("/metrics", get(admin::telemetry::metrics))
        .merge(reveal);

    Router::new()
        .route("/health", get(health))
        .route("/mcp", post(mcp::post_mcp).get(mcp::get_mcp))
        .nest("/admin/api", admin_api)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
