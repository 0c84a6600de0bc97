use std::sync::Arc;

use sg_domain::config::Config;
use sg_store::Store;
use sg_vault::Vault;

use crate::dispatch::Dispatcher;
use crate::limiter::FixedWindowLimiter;
use crate::mcp::session::SessionRegistry;
use crate::pool::KeyPool;
use crate::settings::SettingsCache;
use crate::usage::UsageRecorder;

/// Shared application state passed to all HTTP handlers.
///
/// Everything is owned here and handed down by reference — no global
/// singletons, no back-pointers between subsystems.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub vault: Arc<Vault>,

    // ── Core pipeline ─────────────────────────────────────────────────
    pub pool: Arc<KeyPool>,
    pub settings: Arc<SettingsCache>,
    pub dispatcher: Arc<Dispatcher>,
    pub usage: Arc<UsageRecorder>,

    // ── MCP sessions ──────────────────────────────────────────────────
    pub sessions: Arc<SessionRegistry>,

    // ── Request limiting ──────────────────────────────────────────────
    /// Single-identity limiter shared by all clients.
    pub global_limiter: Arc<FixedWindowLimiter>,
    /// Per-token limiter (identity = token id).
    pub token_limiter: Arc<FixedWindowLimiter>,

    // ── Security (startup-computed) ───────────────────────────────────
    /// SHA-256 of the admin bearer token (read once at startup).
    pub admin_token_hash: Arc<[u8; 32]>,
}
