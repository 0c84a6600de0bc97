//! TTL-cached server settings with single-flight refresh.
//!
//! Policy values (key selection strategy, source mode, research toggle)
//! are read on every tool call, so they are served from a small cache
//! with bounded staleness. Concurrent refreshes for a cold key coalesce
//! behind one store read; a failed read serves the last known value and
//! retries on a short TTL.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use sg_domain::config::Config;
use sg_domain::model::{setting_keys, SelectionStrategy, SourceMode};
use sg_store::Store;

/// TTL used after a failed store read, so the value is retried soon.
const ERROR_RETRY_TTL: Duration = Duration::from_millis(1_000);

#[derive(Clone)]
struct CachedEntry {
    value: String,
    expires_at: Instant,
}

pub struct SettingsCache {
    store: Arc<dyn Store>,
    ttl: Duration,
    default_strategy: SelectionStrategy,
    default_mode: SourceMode,
    entries: Mutex<HashMap<&'static str, CachedEntry>>,
    /// Single-flight gate: concurrent misses queue here and re-check the
    /// cache once they get through.
    refresh: tokio::sync::Mutex<()>,
}

impl SettingsCache {
    pub fn new(store: Arc<dyn Store>, config: &Config) -> Self {
        Self {
            store,
            ttl: Duration::from_millis(config.mcp.effective_settings_ttl_ms()),
            default_strategy: config.tavily.selection_strategy,
            default_mode: config.mcp.source_mode,
            entries: Mutex::new(HashMap::new()),
            refresh: tokio::sync::Mutex::new(()),
        }
    }

    // ── Typed reads ─────────────────────────────────────────────────

    pub async fn selection_strategy(&self) -> SelectionStrategy {
        let raw = self
            .get(
                setting_keys::SELECTION_STRATEGY,
                self.default_strategy.as_str(),
            )
            .await;
        SelectionStrategy::parse(&raw).unwrap_or(self.default_strategy)
    }

    pub async fn source_mode(&self) -> SourceMode {
        let raw = self
            .get(setting_keys::SOURCE_MODE, self.default_mode.as_str())
            .await;
        SourceMode::parse(&raw).unwrap_or(self.default_mode)
    }

    pub async fn research_enabled(&self) -> bool {
        let raw = self.get(setting_keys::RESEARCH_ENABLED, "true").await;
        raw != "false"
    }

    // ── Typed writes (write-through) ────────────────────────────────

    pub async fn set_selection_strategy(
        &self,
        strategy: SelectionStrategy,
    ) -> sg_domain::Result<()> {
        self.put(setting_keys::SELECTION_STRATEGY, strategy.as_str())
            .await
    }

    pub async fn set_source_mode(&self, mode: SourceMode) -> sg_domain::Result<()> {
        self.put(setting_keys::SOURCE_MODE, mode.as_str()).await
    }

    pub async fn set_research_enabled(&self, enabled: bool) -> sg_domain::Result<()> {
        self.put(
            setting_keys::RESEARCH_ENABLED,
            if enabled { "true" } else { "false" },
        )
        .await
    }

    // ── Core ────────────────────────────────────────────────────────

    async fn get(&self, key: &'static str, fallback: &str) -> String {
        if let Some(value) = self.read_fresh(key) {
            return value;
        }

        // Cold or stale: coalesce concurrent refreshes.
        let _flight = self.refresh.lock().await;
        if let Some(value) = self.read_fresh(key) {
            return value;
        }

        match self.store.get_setting(key).await {
            Ok(found) => {
                let value = found.unwrap_or_else(|| fallback.to_string());
                self.insert(key, value.clone(), self.ttl);
                value
            }
            Err(e) => {
                tracing::warn!(key, error = %e, "settings read failed, serving last known value");
                let stale = self.read_any(key).unwrap_or_else(|| fallback.to_string());
                self.insert(key, stale.clone(), ERROR_RETRY_TTL);
                stale
            }
        }
    }

    async fn put(&self, key: &'static str, value: &str) -> sg_domain::Result<()> {
        self.store.put_setting(key, value).await?;
        self.insert(key, value.to_string(), self.ttl);
        Ok(())
    }

    fn read_fresh(&self, key: &str) -> Option<String> {
        let entries = self.entries.lock();
        let entry = entries.get(key)?;
        (entry.expires_at > Instant::now()).then(|| entry.value.clone())
    }

    fn read_any(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).map(|e| e.value.clone())
    }

    fn insert(&self, key: &'static str, value: String, ttl: Duration) {
        self.entries.lock().insert(
            key,
            CachedEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sg_store::FileStore;

    fn config() -> Config {
        Config::default()
    }

    async fn cache_with_store(dir: &std::path::Path) -> (SettingsCache, Arc<FileStore>) {
        let store = Arc::new(FileStore::open(dir).unwrap());
        let cache = SettingsCache::new(store.clone(), &config());
        (cache, store)
    }

    #[tokio::test(start_paused = true)]
    async fn defaults_served_when_store_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, _store) = cache_with_store(dir.path()).await;

        assert_eq!(
            cache.selection_strategy().await,
            SelectionStrategy::RoundRobin
        );
        assert_eq!(
            cache.source_mode().await,
            SourceMode::BravePreferTavilyFallback
        );
        assert!(cache.research_enabled().await);
    }

    #[tokio::test(start_paused = true)]
    async fn cached_value_outlives_a_direct_store_write_until_ttl() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, store) = cache_with_store(dir.path()).await;

        store
            .put_setting(setting_keys::SOURCE_MODE, "combined")
            .await
            .unwrap();
        assert_eq!(cache.source_mode().await, SourceMode::Combined);

        // Out-of-band store change is not visible while the cache is fresh.
        store
            .put_setting(setting_keys::SOURCE_MODE, "brave_only")
            .await
            .unwrap();
        assert_eq!(cache.source_mode().await, SourceMode::Combined);

        // After the TTL it is.
        tokio::time::sleep(Duration::from_millis(5_100)).await;
        assert_eq!(cache.source_mode().await, SourceMode::BraveOnly);
    }

    #[tokio::test(start_paused = true)]
    async fn writes_are_visible_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, store) = cache_with_store(dir.path()).await;

        // Warm the cache with the default.
        assert_eq!(
            cache.selection_strategy().await,
            SelectionStrategy::RoundRobin
        );

        cache
            .set_selection_strategy(SelectionStrategy::Random)
            .await
            .unwrap();
        assert_eq!(cache.selection_strategy().await, SelectionStrategy::Random);
        // And the store agrees.
        assert_eq!(
            store
                .get_setting(setting_keys::SELECTION_STRATEGY)
                .await
                .unwrap()
                .as_deref(),
            Some("random")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unparsable_stored_value_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, store) = cache_with_store(dir.path()).await;

        store
            .put_setting(setting_keys::SOURCE_MODE, "carrier_pigeon")
            .await
            .unwrap();
        assert_eq!(
            cache.source_mode().await,
            SourceMode::BravePreferTavilyFallback
        );
    }
}
