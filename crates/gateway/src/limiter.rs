//! Per-identity fixed-window request limiting.
//!
//! [`FixedWindowLimiter`] is an in-memory, lock-protected map from an
//! opaque identity string to its current window. One instance serves the
//! global limiter (identity `"global"`), another the per-token limiter
//! (identity = token id, window size overridable per token).

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Window {
    start_ms: u64,
    count: u32,
}

/// Result of a limiter check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitDecision {
    Ok,
    Limited { retry_after_ms: u64 },
}

impl LimitDecision {
    pub fn is_ok(&self) -> bool {
        matches!(self, LimitDecision::Ok)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// FixedWindowLimiter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// In-memory fixed-window limiter.
///
/// All updates for a given identity happen under one write lock, so the
/// read-modify-write is atomic per identity.
pub struct FixedWindowLimiter {
    max_per_window: u32,
    window_ms: u64,
    windows: RwLock<HashMap<String, Window>>,
}

impl FixedWindowLimiter {
    pub fn new(max_per_window: u32, window_ms: u64) -> Self {
        Self {
            max_per_window,
            window_ms,
            windows: RwLock::new(HashMap::new()),
        }
    }

    /// Check and count a request for `identity` against the default limit.
    pub fn check(&self, identity: &str) -> LimitDecision {
        self.check_with_limit(identity, self.max_per_window)
    }

    /// Check and count a request with a caller-supplied limit (per-token
    /// overrides). A limit of 0 rejects everything.
    pub fn check_with_limit(&self, identity: &str, max: u32) -> LimitDecision {
        self.check_at(identity, max, now_ms())
    }

    fn check_at(&self, identity: &str, max: u32, now_ms: u64) -> LimitDecision {
        let mut windows = self.windows.write();
        let window = windows.entry(identity.to_string()).or_insert(Window {
            start_ms: now_ms,
            count: 0,
        });

        // Stale window: restart it at now. This is also the opportunistic
        // prune for this entry.
        if now_ms >= window.start_ms + self.window_ms {
            window.start_ms = now_ms;
            window.count = 0;
        }

        if window.count < max {
            window.count += 1;
            LimitDecision::Ok
        } else {
            LimitDecision::Limited {
                retry_after_ms: (window.start_ms + self.window_ms).saturating_sub(now_ms),
            }
        }
    }

    /// Drop windows that have fully lapsed. Called from the periodic GC
    /// tick to keep the map from accumulating one entry per past client.
    pub fn prune(&self) {
        let now = now_ms();
        self.windows
            .write()
            .retain(|_, w| now < w.start_ms + self.window_ms);
    }

    /// Number of tracked identities (for monitoring).
    pub fn identity_count(&self) -> usize {
        self.windows.read().len()
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_limit_then_rejects() {
        let limiter = FixedWindowLimiter::new(3, 60_000);
        let t0 = 1_000_000;

        for _ in 0..3 {
            assert_eq!(limiter.check_at("a", 3, t0), LimitDecision::Ok);
        }
        match limiter.check_at("a", 3, t0 + 100) {
            LimitDecision::Limited { retry_after_ms } => {
                assert_eq!(retry_after_ms, 60_000 - 100);
            }
            LimitDecision::Ok => panic!("expected rejection"),
        }
    }

    #[test]
    fn window_resets_after_expiry() {
        let limiter = FixedWindowLimiter::new(1, 1_000);
        let t0 = 5_000;

        assert_eq!(limiter.check_at("a", 1, t0), LimitDecision::Ok);
        assert!(matches!(
            limiter.check_at("a", 1, t0 + 999),
            LimitDecision::Limited { .. }
        ));
        assert_eq!(limiter.check_at("a", 1, t0 + 1_000), LimitDecision::Ok);
    }

    #[test]
    fn identities_are_independent() {
        let limiter = FixedWindowLimiter::new(1, 60_000);
        let t0 = 0;
        assert_eq!(limiter.check_at("a", 1, t0), LimitDecision::Ok);
        assert_eq!(limiter.check_at("b", 1, t0), LimitDecision::Ok);
        assert!(matches!(
            limiter.check_at("a", 1, t0 + 1),
            LimitDecision::Limited { .. }
        ));
    }

    #[test]
    fn zero_limit_rejects_everything() {
        let limiter = FixedWindowLimiter::new(0, 1_000);
        assert!(matches!(
            limiter.check_at("a", 0, 10),
            LimitDecision::Limited { .. }
        ));
        // Even after the window turns over.
        assert!(matches!(
            limiter.check_at("a", 0, 5_000),
            LimitDecision::Limited { .. }
        ));
    }

    #[test]
    fn per_identity_override() {
        let limiter = FixedWindowLimiter::new(1, 60_000);
        let t0 = 0;
        // Identity "vip" runs with a raised limit on the same limiter.
        assert_eq!(limiter.check_at("vip", 3, t0), LimitDecision::Ok);
        assert_eq!(limiter.check_at("vip", 3, t0), LimitDecision::Ok);
        assert_eq!(limiter.check_at("vip", 3, t0), LimitDecision::Ok);
        assert!(matches!(
            limiter.check_at("vip", 3, t0),
            LimitDecision::Limited { .. }
        ));
    }

    #[test]
    fn prune_drops_lapsed_windows() {
        let limiter = FixedWindowLimiter::new(5, 1);
        limiter.check("a");
        limiter.check("b");
        assert_eq!(limiter.identity_count(), 2);

        std::thread::sleep(std::time::Duration::from_millis(5));
        limiter.prune();
        assert_eq!(limiter.identity_count(), 0);
    }
}
