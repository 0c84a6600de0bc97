//! MCP session registry.
//!
//! A session is minted by the `initialize` handshake and addressed by
//! the `mcp-session-id` header from then on. Requests within one session
//! are serialised; idle sessions are garbage-collected periodically.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Sentinel returned when a request carries no `mcp-session-id`.
pub const MISSING_SESSION: &str = "No valid session ID provided";
/// Sentinel returned when the presented session id is unknown or expired.
pub const UNKNOWN_SESSION: &str = "Invalid or missing session ID";

/// One live MCP session.
#[derive(Debug, Clone)]
pub struct SessionEntry {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub protocol_version: Option<String>,
    pub client_name: Option<String>,
}

/// In-memory registry of MCP sessions plus their per-session run locks.
pub struct SessionRegistry {
    idle: Duration,
    sessions: RwLock<HashMap<String, SessionEntry>>,
    /// Per-session `Semaphore(1)`: one in-flight request per session.
    locks: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl SessionRegistry {
    pub fn new(idle_ms: u64) -> Self {
        Self {
            idle: Duration::milliseconds(idle_ms as i64),
            sessions: RwLock::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Mint a new session for an `initialize` handshake.
    pub fn create(
        &self,
        protocol_version: Option<String>,
        client_name: Option<String>,
    ) -> SessionEntry {
        let now = Utc::now();
        let entry = SessionEntry {
            session_id: uuid::Uuid::new_v4().to_string(),
            created_at: now,
            last_used_at: now,
            protocol_version,
            client_name,
        };
        self.sessions
            .write()
            .insert(entry.session_id.clone(), entry.clone());
        tracing::debug!(session_id = %entry.session_id, "mcp session created");
        entry
    }

    /// Look up and touch a session. Returns `false` for unknown ids.
    pub fn touch(&self, session_id: &str) -> bool {
        let mut sessions = self.sessions.write();
        match sessions.get_mut(session_id) {
            Some(entry) => {
                entry.last_used_at = Utc::now();
                true
            }
            None => false,
        }
    }

    pub fn get(&self, session_id: &str) -> Option<SessionEntry> {
        self.sessions.read().get(session_id).cloned()
    }

    pub fn count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Acquire the per-session run lock; requests for one session are
    /// processed one at a time.
    pub async fn acquire(&self, session_id: &str) -> OwnedSemaphorePermit {
        let sem = {
            let mut locks = self.locks.lock();
            locks
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(Semaphore::new(1)))
                .clone()
        };
        // The semaphore is never closed, so acquisition cannot fail.
        match sem.acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => unreachable!("session semaphore closed"),
        }
    }

    /// Drop sessions idle past the configured window, and the lock entries
    /// of sessions that no longer exist. Returns how many were removed.
    pub fn prune_idle(&self) -> usize {
        let cutoff = Utc::now() - self.idle;
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, entry| entry.last_used_at > cutoff);
        let removed = before - sessions.len();

        let mut locks = self.locks.lock();
        locks.retain(|id, sem| sessions.contains_key(id) || sem.available_permits() == 0);

        if removed > 0 {
            tracing::info!(removed, "pruned idle mcp sessions");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_touch_and_get() {
        let registry = SessionRegistry::new(60_000);
        let entry = registry.create(Some("2024-11-05".into()), Some("inspector".into()));

        assert!(registry.touch(&entry.session_id));
        assert!(!registry.touch("unknown-id"));

        let fetched = registry.get(&entry.session_id).unwrap();
        assert_eq!(fetched.client_name.as_deref(), Some("inspector"));
    }

    #[test]
    fn prune_removes_only_idle_sessions() {
        let registry = SessionRegistry::new(1_000);
        let stale = registry.create(None, None);
        let live = registry.create(None, None);

        // Age the stale session past the idle window.
        registry
            .sessions
            .write()
            .get_mut(&stale.session_id)
            .unwrap()
            .last_used_at = Utc::now() - Duration::seconds(5);

        assert_eq!(registry.prune_idle(), 1);
        assert!(registry.get(&stale.session_id).is_none());
        assert!(registry.get(&live.session_id).is_some());
    }

    #[tokio::test]
    async fn session_requests_serialise() {
        let registry = Arc::new(SessionRegistry::new(60_000));
        let entry = registry.create(None, None);
        let id = entry.session_id.clone();

        let first = registry.acquire(&id).await;

        let registry2 = registry.clone();
        let id2 = id.clone();
        let waiter = tokio::spawn(async move {
            let _permit = registry2.acquire(&id2).await;
            7
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!waiter.is_finished(), "second request must wait");

        drop(first);
        assert_eq!(waiter.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn different_sessions_run_concurrently() {
        let registry = SessionRegistry::new(60_000);
        let a = registry.create(None, None);
        let b = registry.create(None, None);

        let _pa = registry.acquire(&a.session_id).await;
        let _pb = registry.acquire(&b.session_id).await;
        assert_eq!(registry.count(), 2);
    }
}
