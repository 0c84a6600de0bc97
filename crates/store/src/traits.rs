use async_trait::async_trait;
use chrono::{DateTime, Utc};

use sg_domain::error::Result;
use sg_domain::model::{AuditRow, BraveKey, ClientToken, Provider, TavilyKey, UsageRow};

/// The persistence contract the gateway core depends on.
///
/// Semantics every implementation must honour:
/// - `insert_*` fails with `Error::Conflict` on a duplicate key label or
///   token prefix.
/// - `update_*` fails with `Error::NotFound` for an unknown id.
/// - `try_acquire_refresh_lock` is a compare-and-set: it succeeds only
///   when the previous lease is absent or expired.
/// - usage and audit rows are append-only and never rewritten.
#[async_trait]
pub trait Store: Send + Sync {
    // ── Tavily keys ─────────────────────────────────────────────────
    async fn list_tavily_keys(&self) -> Result<Vec<TavilyKey>>;
    async fn get_tavily_key(&self, id: &str) -> Result<Option<TavilyKey>>;
    async fn insert_tavily_key(&self, key: TavilyKey) -> Result<()>;
    async fn update_tavily_key(&self, key: TavilyKey) -> Result<()>;
    /// Returns whether a row was deleted.
    async fn delete_tavily_key(&self, id: &str) -> Result<bool>;

    /// CAS-acquire the credits-refresh lease for a key. Succeeds iff the
    /// previous lease is null or expired; `holder` becomes the lock id.
    async fn try_acquire_refresh_lock(
        &self,
        id: &str,
        holder: &str,
        until: DateTime<Utc>,
    ) -> Result<bool>;
    /// Release the lease iff `holder` still owns it.
    async fn release_refresh_lock(&self, id: &str, holder: &str) -> Result<()>;

    // ── Brave keys ──────────────────────────────────────────────────
    async fn list_brave_keys(&self) -> Result<Vec<BraveKey>>;
    async fn get_brave_key(&self, id: &str) -> Result<Option<BraveKey>>;
    async fn insert_brave_key(&self, key: BraveKey) -> Result<()>;
    async fn update_brave_key(&self, key: BraveKey) -> Result<()>;
    async fn delete_brave_key(&self, id: &str) -> Result<bool>;

    // ── Client tokens ───────────────────────────────────────────────
    async fn list_tokens(&self) -> Result<Vec<ClientToken>>;
    async fn get_token(&self, id: &str) -> Result<Option<ClientToken>>;
    async fn find_token_by_prefix(&self, prefix: &str) -> Result<Option<ClientToken>>;
    async fn insert_token(&self, token: ClientToken) -> Result<()>;
    /// Set `revoked_at` if not already set. Returns whether the token exists.
    async fn revoke_token(&self, id: &str) -> Result<bool>;
    async fn delete_token(&self, id: &str) -> Result<bool>;

    // ── Server settings ─────────────────────────────────────────────
    async fn get_setting(&self, key: &str) -> Result<Option<String>>;
    async fn put_setting(&self, key: &str, value: &str) -> Result<()>;

    // ── Append-only logs ────────────────────────────────────────────
    async fn append_usage(&self, provider: Provider, row: UsageRow) -> Result<()>;
    /// The most recent `limit` usage rows for a provider, oldest first.
    async fn recent_usage(&self, provider: Provider, limit: usize) -> Result<Vec<UsageRow>>;
    async fn append_audit(&self, row: AuditRow) -> Result<()>;

    // ── Durability ──────────────────────────────────────────────────
    async fn flush(&self) -> Result<()>;
}
