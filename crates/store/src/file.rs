//! JSON-file-backed [`Store`] implementation.
//!
//! Entities live in per-table JSON snapshots (`tavily_keys.json`,
//! `brave_keys.json`, `tokens.json`, `settings.json`) that are rewritten
//! on every mutation. Usage and audit logs are append-only JSONL files,
//! one line per row.

use std::collections::HashMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;

use sg_domain::error::{Error, Result};
use sg_domain::model::{AuditRow, BraveKey, ClientToken, Provider, TavilyKey, UsageRow};

use crate::traits::Store;

/// File-backed store rooted at a data directory.
pub struct FileStore {
    dir: PathBuf,
    tavily: RwLock<HashMap<String, TavilyKey>>,
    brave: RwLock<HashMap<String, BraveKey>>,
    tokens: RwLock<HashMap<String, ClientToken>>,
    settings: RwLock<HashMap<String, String>>,
}

impl FileStore {
    /// Load or create the store under `dir`.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(Error::Io)?;

        let store = Self {
            dir: dir.to_path_buf(),
            tavily: RwLock::new(load_map(&dir.join("tavily_keys.json"))),
            brave: RwLock::new(load_map(&dir.join("brave_keys.json"))),
            tokens: RwLock::new(load_map(&dir.join("tokens.json"))),
            settings: RwLock::new(load_map(&dir.join("settings.json"))),
        };

        tracing::info!(
            path = %dir.display(),
            tavily_keys = store.tavily.read().len(),
            brave_keys = store.brave.read().len(),
            tokens = store.tokens.read().len(),
            "file store loaded"
        );
        Ok(store)
    }

    fn save_tavily(&self, map: &HashMap<String, TavilyKey>) -> Result<()> {
        save_map(&self.dir.join("tavily_keys.json"), map)
    }

    fn save_brave(&self, map: &HashMap<String, BraveKey>) -> Result<()> {
        save_map(&self.dir.join("brave_keys.json"), map)
    }

    fn save_tokens(&self, map: &HashMap<String, ClientToken>) -> Result<()> {
        save_map(&self.dir.join("tokens.json"), map)
    }

    fn save_settings(&self, map: &HashMap<String, String>) -> Result<()> {
        save_map(&self.dir.join("settings.json"), map)
    }

    fn usage_path(&self, provider: Provider) -> PathBuf {
        self.dir.join(format!("usage_{}.jsonl", provider.as_str()))
    }
}

// ── file helpers ────────────────────────────────────────────────────

fn load_map<T: DeserializeOwned>(path: &Path) -> HashMap<String, T> {
    if !path.exists() {
        return HashMap::new();
    }
    match std::fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str(&raw).unwrap_or_default(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to read table, starting empty");
            HashMap::new()
        }
    }
}

fn save_map<T: Serialize>(path: &Path, map: &HashMap<String, T>) -> Result<()> {
    let json = serde_json::to_string_pretty(map)?;
    std::fs::write(path, json).map_err(Error::Io)?;
    Ok(())
}

fn append_jsonl<T: Serialize>(path: &Path, row: &T) -> Result<()> {
    let mut line = serde_json::to_string(row)?;
    line.push('\n');
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(Error::Io)?;
    file.write_all(line.as_bytes()).map_err(Error::Io)?;
    Ok(())
}

fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = std::fs::read_to_string(path).map_err(Error::Io)?;
    let mut rows = Vec::new();
    for line in raw.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(line) {
            Ok(row) => rows.push(row),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping malformed log line");
            }
        }
    }
    Ok(rows)
}

// ── Store impl ──────────────────────────────────────────────────────

#[async_trait]
impl Store for FileStore {
    async fn list_tavily_keys(&self) -> Result<Vec<TavilyKey>> {
        Ok(self.tavily.read().values().cloned().collect())
    }

    async fn get_tavily_key(&self, id: &str) -> Result<Option<TavilyKey>> {
        Ok(self.tavily.read().get(id).cloned())
    }

    async fn insert_tavily_key(&self, key: TavilyKey) -> Result<()> {
        let mut map = self.tavily.write();
        if map.values().any(|k| k.label == key.label) {
            return Err(Error::Conflict(format!(
                "tavily key label \"{}\" already exists",
                key.label
            )));
        }
        map.insert(key.id.clone(), key);
        self.save_tavily(&map)
    }

    async fn update_tavily_key(&self, key: TavilyKey) -> Result<()> {
        let mut map = self.tavily.write();
        if !map.contains_key(&key.id) {
            return Err(Error::NotFound(format!("tavily key {}", key.id)));
        }
        if map
            .values()
            .any(|k| k.id != key.id && k.label == key.label)
        {
            return Err(Error::Conflict(format!(
                "tavily key label \"{}\" already exists",
                key.label
            )));
        }
        map.insert(key.id.clone(), key);
        self.save_tavily(&map)
    }

    async fn delete_tavily_key(&self, id: &str) -> Result<bool> {
        let mut map = self.tavily.write();
        let removed = map.remove(id).is_some();
        if removed {
            self.save_tavily(&map)?;
        }
        Ok(removed)
    }

    async fn try_acquire_refresh_lock(
        &self,
        id: &str,
        holder: &str,
        until: DateTime<Utc>,
    ) -> Result<bool> {
        let now = Utc::now();
        let mut map = self.tavily.write();
        let key = map
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("tavily key {id}")))?;

        let lease_free = match key.refresh_lock_until {
            None => true,
            Some(lock_until) => lock_until <= now,
        };
        if !lease_free {
            return Ok(false);
        }

        key.refresh_lock_until = Some(until);
        key.refresh_lock_id = Some(holder.to_string());
        key.updated_at = now;
        self.save_tavily(&map)?;
        Ok(true)
    }

    async fn release_refresh_lock(&self, id: &str, holder: &str) -> Result<()> {
        let mut map = self.tavily.write();
        let Some(key) = map.get_mut(id) else {
            // Key deleted while the lease was held; nothing to release.
            return Ok(());
        };
        if key.refresh_lock_id.as_deref() == Some(holder) {
            key.refresh_lock_until = None;
            key.refresh_lock_id = None;
            key.updated_at = Utc::now();
            self.save_tavily(&map)?;
        }
        Ok(())
    }

    async fn list_brave_keys(&self) -> Result<Vec<BraveKey>> {
        Ok(self.brave.read().values().cloned().collect())
    }

    async fn get_brave_key(&self, id: &str) -> Result<Option<BraveKey>> {
        Ok(self.brave.read().get(id).cloned())
    }

    async fn insert_brave_key(&self, key: BraveKey) -> Result<()> {
        let mut map = self.brave.write();
        if map.values().any(|k| k.label == key.label) {
            return Err(Error::Conflict(format!(
                "brave key label \"{}\" already exists",
                key.label
            )));
        }
        map.insert(key.id.clone(), key);
        self.save_brave(&map)
    }

    async fn update_brave_key(&self, key: BraveKey) -> Result<()> {
        let mut map = self.brave.write();
        if !map.contains_key(&key.id) {
            return Err(Error::NotFound(format!("brave key {}", key.id)));
        }
        if map
            .values()
            .any(|k| k.id != key.id && k.label == key.label)
        {
            return Err(Error::Conflict(format!(
                "brave key label \"{}\" already exists",
                key.label
            )));
        }
        map.insert(key.id.clone(), key);
        self.save_brave(&map)
    }

    async fn delete_brave_key(&self, id: &str) -> Result<bool> {
        let mut map = self.brave.write();
        let removed = map.remove(id).is_some();
        if removed {
            self.save_brave(&map)?;
        }
        Ok(removed)
    }

    async fn list_tokens(&self) -> Result<Vec<ClientToken>> {
        Ok(self.tokens.read().values().cloned().collect())
    }

    async fn get_token(&self, id: &str) -> Result<Option<ClientToken>> {
        Ok(self.tokens.read().get(id).cloned())
    }

    async fn find_token_by_prefix(&self, prefix: &str) -> Result<Option<ClientToken>> {
        Ok(self
            .tokens
            .read()
            .values()
            .find(|t| t.prefix == prefix)
            .cloned())
    }

    async fn insert_token(&self, token: ClientToken) -> Result<()> {
        let mut map = self.tokens.write();
        if map.values().any(|t| t.prefix == token.prefix) {
            return Err(Error::Conflict(format!(
                "token prefix \"{}\" already exists",
                token.prefix
            )));
        }
        map.insert(token.id.clone(), token);
        self.save_tokens(&map)
    }

    async fn revoke_token(&self, id: &str) -> Result<bool> {
        let mut map = self.tokens.write();
        let Some(token) = map.get_mut(id) else {
            return Ok(false);
        };
        // revoked_at is monotonic: a second revoke is a no-op.
        if token.revoked_at.is_none() {
            token.revoked_at = Some(Utc::now());
            self.save_tokens(&map)?;
        }
        Ok(true)
    }

    async fn delete_token(&self, id: &str) -> Result<bool> {
        let mut map = self.tokens.write();
        let removed = map.remove(id).is_some();
        if removed {
            self.save_tokens(&map)?;
        }
        Ok(removed)
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        Ok(self.settings.read().get(key).cloned())
    }

    async fn put_setting(&self, key: &str, value: &str) -> Result<()> {
        let mut map = self.settings.write();
        map.insert(key.to_string(), value.to_string());
        self.save_settings(&map)
    }

    async fn append_usage(&self, provider: Provider, row: UsageRow) -> Result<()> {
        append_jsonl(&self.usage_path(provider), &row)
    }

    async fn recent_usage(&self, provider: Provider, limit: usize) -> Result<Vec<UsageRow>> {
        let mut rows: Vec<UsageRow> = read_jsonl(&self.usage_path(provider))?;
        if rows.len() > limit {
            rows.drain(..rows.len() - limit);
        }
        Ok(rows)
    }

    async fn append_audit(&self, row: AuditRow) -> Result<()> {
        append_jsonl(&self.dir.join("audit.jsonl"), &row)
    }

    async fn flush(&self) -> Result<()> {
        self.save_tavily(&self.tavily.read())?;
        self.save_brave(&self.brave.read())?;
        self.save_tokens(&self.tokens.read())?;
        self.save_settings(&self.settings.read())?;
        Ok(())
    }
}
