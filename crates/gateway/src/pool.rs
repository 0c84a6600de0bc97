//! Upstream key pool: selection, cooldown/invalid transitions, credit
//! preflight, and the exclusive credits-refresh lease.
//!
//! Selection is best-effort: two concurrent calls may pick the same key.
//! That is acceptable — status checks happen atomically in the store, so
//! a cooling-down or invalid key is never handed out.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;

use sg_domain::config::TavilyConfig;
use sg_domain::error::{Error, Result, UpstreamErrorKind};
use sg_domain::model::{
    CreditSnapshot, KeyStatus, Provider, SelectionStrategy, TavilyKey,
};
use sg_store::Store;
use sg_upstream::TavilyClient;
use sg_vault::Vault;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A selected key, decrypted for one upstream call.
#[derive(Debug)]
pub struct KeyHandle {
    pub id: String,
    pub secret: String,
}

/// Result of the cheap credit check before a Tavily call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Preflight {
    Ok,
    Throttled { retry_after_ms: u64, reason: String },
}

/// Counters from a sync-credits sweep.
#[derive(Debug, Default, serde::Serialize)]
pub struct SyncReport {
    pub refreshed: usize,
    pub skipped: usize,
    pub failed: usize,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// KeyPool
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct KeyPool {
    store: Arc<dyn Store>,
    vault: Arc<Vault>,
    tavily_client: Arc<TavilyClient>,
    cfg: TavilyConfig,
}

impl KeyPool {
    pub fn new(
        store: Arc<dyn Store>,
        vault: Arc<Vault>,
        tavily_client: Arc<TavilyClient>,
        cfg: TavilyConfig,
    ) -> Self {
        Self {
            store,
            vault,
            tavily_client,
            cfg,
        }
    }

    // ── Selection ───────────────────────────────────────────────────

    /// Pick a Tavily key under the given strategy.
    ///
    /// Expired cooldowns are flipped back to `active` here — there is no
    /// background sweeper.
    pub async fn select_tavily(&self, strategy: SelectionStrategy) -> Result<KeyHandle> {
        let now = Utc::now();
        let mut candidates = Vec::new();

        for mut key in self.store.list_tavily_keys().await? {
            if key.cooldown_expired(now) {
                key.status = KeyStatus::Active;
                key.cooldown_until = None;
                key.updated_at = now;
                if let Err(e) = self.store.update_tavily_key(key.clone()).await {
                    tracing::warn!(key_id = %key.id, error = %e, "cooldown reset write failed");
                }
                tracing::debug!(key_id = %key.id, "cooldown lapsed, key active again");
            }
            if key.status == KeyStatus::Active {
                candidates.push(key);
            }
        }

        if candidates.is_empty() {
            return Err(Error::NoActiveKeys {
                provider: Provider::Tavily,
            });
        }

        let chosen = match strategy {
            SelectionStrategy::RoundRobin => {
                // Least-recently-used first; never-used keys lead. Ties
                // fall back to creation order.
                candidates.sort_by_key(|k| (k.last_used_at, k.created_at));
                &candidates[0]
            }
            SelectionStrategy::Random => {
                let idx = rand::thread_rng().gen_range(0..candidates.len());
                &candidates[idx]
            }
        };

        Ok(KeyHandle {
            id: chosen.id.clone(),
            secret: self.vault.decrypt(&chosen.ciphertext)?,
        })
    }

    /// Pick a Brave key. Brave has no strategy setting; least-recently-used
    /// keeps the keys rotating.
    pub async fn select_brave(&self) -> Result<KeyHandle> {
        let mut candidates: Vec<_> = self
            .store
            .list_brave_keys()
            .await?
            .into_iter()
            .filter(|k| k.status == KeyStatus::Active)
            .collect();

        if candidates.is_empty() {
            return Err(Error::NoActiveKeys {
                provider: Provider::Brave,
            });
        }
        candidates.sort_by_key(|k| (k.last_used_at, k.created_at));

        Ok(KeyHandle {
            id: candidates[0].id.clone(),
            secret: self.vault.decrypt(&candidates[0].ciphertext)?,
        })
    }

    /// Whether there is at least one active Brave key (for `brave_only`
    /// source availability).
    pub async fn has_active_brave_key(&self) -> Result<bool> {
        Ok(self
            .store
            .list_brave_keys()
            .await?
            .iter()
            .any(|k| k.status == KeyStatus::Active))
    }

    // ── Preflight ───────────────────────────────────────────────────

    /// Cheap check that some Tavily key can plausibly serve a call.
    ///
    /// A candidate disqualifies only when its snapshot is still fresh AND
    /// shows `remaining` at or below the floor; an absent or stale
    /// snapshot is treated optimistically (the next refresh will settle
    /// it).
    pub async fn preflight(&self) -> Result<Preflight> {
        let now = Utc::now();
        let keys = self.store.list_tavily_keys().await?;

        let candidates: Vec<&TavilyKey> =
            keys.iter().filter(|k| k.is_selectable(now)).collect();

        if candidates.is_empty() {
            let soonest = keys
                .iter()
                .filter(|k| k.status == KeyStatus::Cooldown)
                .filter_map(|k| k.cooldown_until)
                .min();
            return Ok(Preflight::Throttled {
                retry_after_ms: millis_until(soonest, now, self.cfg.cooldown_ms),
                reason: "no selectable keys".into(),
            });
        }

        let mut soonest_expiry: Option<DateTime<Utc>> = None;
        for key in candidates {
            if !key.credits.is_fresh(now) {
                return Ok(Preflight::Ok);
            }
            match key.credits.remaining {
                None => return Ok(Preflight::Ok),
                Some(r) if r > self.cfg.credits.min_remaining => return Ok(Preflight::Ok),
                Some(_) => {
                    let exp = key.credits.expires_at;
                    soonest_expiry = match (soonest_expiry, exp) {
                        (Some(a), Some(b)) => Some(a.min(b)),
                        (a, b) => a.or(b),
                    };
                }
            }
        }

        Ok(Preflight::Throttled {
            retry_after_ms: millis_until(soonest_expiry, now, self.cfg.credits.cooldown_ms),
            reason: "all keys at or below the credit floor".into(),
        })
    }

    // ── Outcome recording ───────────────────────────────────────────

    /// Record a successful Tavily call. Best-effort: a lost write only
    /// perturbs round-robin ordering.
    pub async fn record_tavily_success(&self, key_id: &str) {
        if let Err(e) = self.touch_tavily(key_id, None).await {
            tracing::warn!(key_id, error = %e, "last-used update failed");
        }
    }

    /// Record a failed Tavily call, applying the state transition the
    /// failure kind demands.
    pub async fn record_tavily_failure(&self, key_id: &str, kind: UpstreamErrorKind) {
        if let Err(e) = self.touch_tavily(key_id, Some(kind)).await {
            tracing::warn!(key_id, error = %e, "failure-state update failed");
        }
    }

    async fn touch_tavily(&self, key_id: &str, failure: Option<UpstreamErrorKind>) -> Result<()> {
        let now = Utc::now();
        let Some(mut key) = self.store.get_tavily_key(key_id).await? else {
            return Ok(());
        };
        key.last_used_at = Some(now);
        key.updated_at = now;
        match failure {
            Some(UpstreamErrorKind::RateLimited) => {
                key.status = KeyStatus::Cooldown;
                key.cooldown_until = Some(now + Duration::milliseconds(self.cfg.cooldown_ms as i64));
                tracing::info!(key_id, cooldown_ms = self.cfg.cooldown_ms, "key cooling down after 429");
            }
            Some(UpstreamErrorKind::AuthFailed) => {
                key.status = KeyStatus::Invalid;
                tracing::warn!(key_id, "key marked invalid after auth failure");
            }
            _ => {}
        }
        self.store.update_tavily_key(key).await
    }

    pub async fn record_brave_success(&self, key_id: &str) {
        if let Err(e) = self.touch_brave(key_id, None).await {
            tracing::warn!(key_id, error = %e, "last-used update failed");
        }
    }

    pub async fn record_brave_failure(&self, key_id: &str, kind: UpstreamErrorKind) {
        if let Err(e) = self.touch_brave(key_id, Some(kind)).await {
            tracing::warn!(key_id, error = %e, "failure-state update failed");
        }
    }

    async fn touch_brave(&self, key_id: &str, failure: Option<UpstreamErrorKind>) -> Result<()> {
        let now = Utc::now();
        let Some(mut key) = self.store.get_brave_key(key_id).await? else {
            return Ok(());
        };
        key.last_used_at = Some(now);
        key.updated_at = now;
        // Brave keys have no cooldown state; the rate gate paces traffic.
        if failure == Some(UpstreamErrorKind::AuthFailed) {
            key.status = KeyStatus::Invalid;
            tracing::warn!(key_id, "brave key marked invalid after auth failure");
        }
        self.store.update_brave_key(key).await
    }

    // ── Credit refresh ──────────────────────────────────────────────

    /// Refresh one key's credit snapshot under the exclusive lease.
    ///
    /// Fails with `Error::Conflict` when another caller holds a live
    /// lease. The lease expires on its own, so a crashed holder cannot
    /// wedge the key.
    pub async fn refresh_credits(&self, key_id: &str) -> Result<CreditSnapshot> {
        let holder = uuid::Uuid::new_v4().to_string();
        let until = Utc::now() + Duration::milliseconds(self.cfg.credits.refresh_lock_ms as i64);

        if !self
            .store
            .try_acquire_refresh_lock(key_id, &holder, until)
            .await?
        {
            return Err(Error::Conflict("Credits refresh already in progress".into()));
        }

        let result = self.refresh_credits_locked(key_id).await;

        if let Err(e) = self.store.release_refresh_lock(key_id, &holder).await {
            tracing::warn!(key_id, error = %e, "refresh lease release failed");
        }
        result
    }

    async fn refresh_credits_locked(&self, key_id: &str) -> Result<CreditSnapshot> {
        let now = Utc::now();
        let mut key = self
            .store
            .get_tavily_key(key_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("tavily key {key_id}")))?;

        let secret = self.vault.decrypt(&key.ciphertext)?;
        let usage = match self.tavily_client.usage(&secret).await {
            Ok(usage) => usage,
            Err(e) => {
                if e.upstream_kind() == Some(UpstreamErrorKind::AuthFailed) {
                    key.status = KeyStatus::Invalid;
                    key.updated_at = now;
                    self.store.update_tavily_key(key).await?;
                }
                return Err(e);
            }
        };

        let key_remaining = usage.key.remaining();
        let account_remaining = usage.account.remaining();
        let snapshot = CreditSnapshot {
            key_usage: usage.key.usage,
            key_limit: usage.key.limit,
            key_remaining,
            account_plan_usage: usage.account.plan_usage,
            account_plan_limit: usage.account.plan_limit,
            account_pay_as_you_go_usage: usage.account.paygo_usage,
            account_pay_as_you_go_limit: usage.account.paygo_limit,
            account_remaining,
            remaining: CreditSnapshot::effective_remaining(key_remaining, account_remaining),
            checked_at: Some(now),
            expires_at: Some(now + Duration::milliseconds(self.cfg.credits.cache_ttl_ms as i64)),
        };

        key.credits = snapshot.clone();
        key.updated_at = now;
        if snapshot
            .remaining
            .is_some_and(|r| r <= self.cfg.credits.min_remaining)
            && key.status == KeyStatus::Active
        {
            key.status = KeyStatus::Cooldown;
            key.cooldown_until =
                Some(now + Duration::milliseconds(self.cfg.credits.cooldown_ms as i64));
            tracing::info!(key_id, remaining = ?snapshot.remaining, "key exhausted, cooling down");
        }
        self.store.update_tavily_key(key).await?;
        Ok(snapshot)
    }

    /// Refresh every non-invalid key sequentially. Keys whose lease is
    /// held elsewhere are skipped, other failures are counted and the
    /// sweep continues.
    pub async fn sync_all_credits(&self) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        for key in self.store.list_tavily_keys().await? {
            if key.status == KeyStatus::Invalid {
                continue;
            }
            match self.refresh_credits(&key.id).await {
                Ok(_) => report.refreshed += 1,
                Err(Error::Conflict(_)) => report.skipped += 1,
                Err(e) => {
                    tracing::warn!(key_id = %key.id, error = %e, "credit refresh failed");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }
}

fn millis_until(when: Option<DateTime<Utc>>, now: DateTime<Utc>, fallback_ms: u64) -> u64 {
    match when {
        Some(t) if t > now => (t - now).num_milliseconds().max(0) as u64,
        Some(_) => 0,
        None => fallback_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sg_store::FileStore;

    fn vault() -> Arc<Vault> {
        Arc::new(Vault::new([3u8; 32]))
    }

    async fn pool_with_store(dir: &std::path::Path) -> (KeyPool, Arc<FileStore>) {
        let store = Arc::new(FileStore::open(dir).unwrap());
        // Points at a closed port; only exercised by refresh tests, which
        // expect the call to fail.
        let client = Arc::new(TavilyClient::new("http://127.0.0.1:9", 500).unwrap());
        let pool = KeyPool::new(store.clone(), vault(), client, TavilyConfig::default());
        (pool, store)
    }

    async fn seed_key(
        store: &FileStore,
        vault: &Vault,
        label: &str,
        secret: &str,
        last_used: Option<DateTime<Utc>>,
    ) -> String {
        let mut key = TavilyKey::new(label, vault.encrypt(secret).unwrap(), "m".into());
        key.last_used_at = last_used;
        let id = key.id.clone();
        store.insert_tavily_key(key).await.unwrap();
        id
    }

    #[tokio::test]
    async fn round_robin_prefers_never_used_then_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let (pool, store) = pool_with_store(dir.path()).await;
        let v = vault();
        let now = Utc::now();

        seed_key(&store, &v, "recent", "s-recent", Some(now)).await;
        let old_id = seed_key(
            &store,
            &v,
            "old",
            "s-old",
            Some(now - Duration::minutes(10)),
        )
        .await;
        let fresh_id = seed_key(&store, &v, "fresh", "s-fresh", None).await;

        let first = pool
            .select_tavily(SelectionStrategy::RoundRobin)
            .await
            .unwrap();
        assert_eq!(first.id, fresh_id, "never-used key goes first");
        assert_eq!(first.secret, "s-fresh");

        pool.record_tavily_success(&fresh_id).await;
        let second = pool
            .select_tavily(SelectionStrategy::RoundRobin)
            .await
            .unwrap();
        assert_eq!(second.id, old_id, "least-recently-used follows");
    }

    #[tokio::test]
    async fn random_selection_stays_within_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let (pool, store) = pool_with_store(dir.path()).await;
        let v = vault();

        let a = seed_key(&store, &v, "a", "sa", None).await;
        let b = seed_key(&store, &v, "b", "sb", None).await;

        for _ in 0..10 {
            let handle = pool.select_tavily(SelectionStrategy::Random).await.unwrap();
            assert!(handle.id == a || handle.id == b);
        }
    }

    #[tokio::test]
    async fn invalid_and_disabled_keys_are_never_selected() {
        let dir = tempfile::tempdir().unwrap();
        let (pool, store) = pool_with_store(dir.path()).await;
        let v = vault();

        let id = seed_key(&store, &v, "only", "s", None).await;
        let mut key = store.get_tavily_key(&id).await.unwrap().unwrap();
        key.status = KeyStatus::Invalid;
        store.update_tavily_key(key).await.unwrap();

        let err = pool
            .select_tavily(SelectionStrategy::RoundRobin)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::NoActiveKeys {
                provider: Provider::Tavily
            }
        ));
    }

    #[tokio::test]
    async fn lapsed_cooldown_flips_back_to_active_at_selection() {
        let dir = tempfile::tempdir().unwrap();
        let (pool, store) = pool_with_store(dir.path()).await;
        let v = vault();

        let id = seed_key(&store, &v, "cool", "s", None).await;
        let mut key = store.get_tavily_key(&id).await.unwrap().unwrap();
        key.status = KeyStatus::Cooldown;
        key.cooldown_until = Some(Utc::now() - Duration::seconds(1));
        store.update_tavily_key(key).await.unwrap();

        let handle = pool
            .select_tavily(SelectionStrategy::RoundRobin)
            .await
            .unwrap();
        assert_eq!(handle.id, id);

        let stored = store.get_tavily_key(&id).await.unwrap().unwrap();
        assert_eq!(stored.status, KeyStatus::Active);
        assert!(stored.cooldown_until.is_none());
    }

    #[tokio::test]
    async fn live_cooldown_excludes_the_key() {
        let dir = tempfile::tempdir().unwrap();
        let (pool, store) = pool_with_store(dir.path()).await;
        let v = vault();

        let id = seed_key(&store, &v, "cool", "s", None).await;
        let mut key = store.get_tavily_key(&id).await.unwrap().unwrap();
        key.status = KeyStatus::Cooldown;
        key.cooldown_until = Some(Utc::now() + Duration::minutes(5));
        store.update_tavily_key(key).await.unwrap();

        assert!(pool
            .select_tavily(SelectionStrategy::RoundRobin)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn rate_limited_failure_starts_cooldown() {
        let dir = tempfile::tempdir().unwrap();
        let (pool, store) = pool_with_store(dir.path()).await;
        let v = vault();

        let id = seed_key(&store, &v, "k", "s", None).await;
        pool.record_tavily_failure(&id, UpstreamErrorKind::RateLimited)
            .await;

        let key = store.get_tavily_key(&id).await.unwrap().unwrap();
        assert_eq!(key.status, KeyStatus::Cooldown);
        let until = key.cooldown_until.unwrap();
        let expected = Utc::now() + Duration::milliseconds(60_000);
        assert!((until - expected).num_milliseconds().abs() < 2_000);
        assert!(key.last_used_at.is_some());
    }

    #[tokio::test]
    async fn auth_failure_invalidates_the_key() {
        let dir = tempfile::tempdir().unwrap();
        let (pool, store) = pool_with_store(dir.path()).await;
        let v = vault();

        let id = seed_key(&store, &v, "k", "s", None).await;
        pool.record_tavily_failure(&id, UpstreamErrorKind::AuthFailed)
            .await;

        let key = store.get_tavily_key(&id).await.unwrap().unwrap();
        assert_eq!(key.status, KeyStatus::Invalid);
    }

    #[tokio::test]
    async fn provider_error_leaves_status_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let (pool, store) = pool_with_store(dir.path()).await;
        let v = vault();

        let id = seed_key(&store, &v, "k", "s", None).await;
        pool.record_tavily_failure(&id, UpstreamErrorKind::ProviderError)
            .await;

        let key = store.get_tavily_key(&id).await.unwrap().unwrap();
        assert_eq!(key.status, KeyStatus::Active);
    }

    #[tokio::test]
    async fn preflight_with_no_keys_throttles() {
        let dir = tempfile::tempdir().unwrap();
        let (pool, _store) = pool_with_store(dir.path()).await;

        match pool.preflight().await.unwrap() {
            Preflight::Throttled { retry_after_ms, .. } => {
                assert_eq!(retry_after_ms, 60_000, "falls back to the cooldown window");
            }
            Preflight::Ok => panic!("expected throttle"),
        }
    }

    #[tokio::test]
    async fn preflight_passes_on_unknown_or_stale_credits() {
        let dir = tempfile::tempdir().unwrap();
        let (pool, store) = pool_with_store(dir.path()).await;
        let v = vault();

        // No snapshot at all.
        seed_key(&store, &v, "unknown", "s", None).await;
        assert_eq!(pool.preflight().await.unwrap(), Preflight::Ok);

        // Fresh snapshot with credit left.
        let keys = store.list_tavily_keys().await.unwrap();
        let mut key = keys.into_iter().next().unwrap();
        key.credits.remaining = Some(100);
        key.credits.expires_at = Some(Utc::now() + Duration::seconds(60));
        store.update_tavily_key(key).await.unwrap();
        assert_eq!(pool.preflight().await.unwrap(), Preflight::Ok);
    }

    #[tokio::test]
    async fn preflight_throttles_when_every_fresh_snapshot_is_exhausted() {
        let dir = tempfile::tempdir().unwrap();
        let (pool, store) = pool_with_store(dir.path()).await;
        let v = vault();

        let id = seed_key(&store, &v, "empty", "s", None).await;
        let mut key = store.get_tavily_key(&id).await.unwrap().unwrap();
        key.credits.remaining = Some(0);
        key.credits.expires_at = Some(Utc::now() + Duration::seconds(30));
        store.update_tavily_key(key).await.unwrap();

        match pool.preflight().await.unwrap() {
            Preflight::Throttled { retry_after_ms, .. } => {
                assert!(retry_after_ms > 0 && retry_after_ms <= 30_000);
            }
            Preflight::Ok => panic!("expected throttle"),
        }
    }

    #[tokio::test]
    async fn refresh_conflict_while_lease_is_held() {
        let dir = tempfile::tempdir().unwrap();
        let (pool, store) = pool_with_store(dir.path()).await;
        let v = vault();

        let id = seed_key(&store, &v, "k", "s", None).await;
        assert!(store
            .try_acquire_refresh_lock(&id, "other-holder", Utc::now() + Duration::seconds(30))
            .await
            .unwrap());

        let err = pool.refresh_credits(&id).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn failed_refresh_still_releases_the_lease() {
        let dir = tempfile::tempdir().unwrap();
        let (pool, store) = pool_with_store(dir.path()).await;
        let v = vault();

        let id = seed_key(&store, &v, "k", "s", None).await;
        // The usage call hits a closed port and fails.
        assert!(pool.refresh_credits(&id).await.is_err());

        // Lease must be free again.
        assert!(store
            .try_acquire_refresh_lock(&id, "next", Utc::now() + Duration::seconds(5))
            .await
            .unwrap());
    }
}
