//! Per-user fixed-window rate limiting.
//!
//! A window opens on the first request after the previous one expired and
//! lasts `window`. Up to `limit` requests are admitted per window. Because
//! windows are fixed rather than sliding, a user can burst up to twice the
//! limit across a window boundary.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

use super::store::{DashMapStore, KeyedStore};

/// Default window length.
pub const DEFAULT_WINDOW_SECONDS: i64 = 60;

/// Counter state for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitState {
    pub count: u32,
    pub window_reset_at: DateTime<Utc>,
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Admission {
    pub allowed: bool,
    /// Whole seconds until the window resets. Zero when allowed.
    pub retry_after_seconds: u64,
}

impl Admission {
    fn allowed() -> Self {
        Self {
            allowed: true,
            retry_after_seconds: 0,
        }
    }

    fn denied(retry_after_seconds: u64) -> Self {
        Self {
            allowed: false,
            retry_after_seconds,
        }
    }
}

/// Fixed-window rate limiter keyed by user.
///
/// The limiter has no exemption list. Callers skip [`admit`](Self::admit)
/// for privileged identities.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn KeyedStore<RateLimitState>>,
    window: TimeDelta,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn KeyedStore<RateLimitState>>, window: TimeDelta) -> Self {
        Self { store, window }
    }

    /// A limiter over an in-memory DashMap with the given window length.
    pub fn in_memory(window_seconds: i64) -> Self {
        Self::new(
            Arc::new(DashMapStore::new()),
            TimeDelta::seconds(window_seconds.max(1)),
        )
    }

    /// Check and, if admitted, count one request for `key`.
    pub fn admit(&self, key: &str, now: DateTime<Utc>, limit: u32) -> Admission {
        let window = self.window;
        let fresh = || RateLimitState {
            count: 0,
            window_reset_at: now + window,
        };

        let mut admission = Admission::allowed();
        self.store.update(key, &fresh, &mut |state| {
            if now >= state.window_reset_at {
                *state = fresh();
            }
            if state.count >= limit {
                admission = Admission::denied(ceil_seconds(state.window_reset_at - now));
            } else {
                state.count += 1;
            }
        });
        admission
    }

    #[cfg(test)]
    fn state(&self, key: &str) -> Option<RateLimitState> {
        self.store.get(key)
    }

    /// Forget the counter for `key`. Returns whether one existed.
    pub fn reset(&self, key: &str) -> bool {
        self.store.remove(key).is_some()
    }

    /// Drop windows that have already expired. Returns how many were removed.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut removed = 0;
        self.store.retain(&mut |_, state| {
            let keep = now < state.window_reset_at;
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }
}

fn ceil_seconds(remaining: TimeDelta) -> u64 {
    if remaining <= TimeDelta::zero() {
        return 0;
    }
    let whole = remaining.num_seconds();
    let seconds = if remaining > TimeDelta::seconds(whole) {
        whole + 1
    } else {
        whole
    };
    seconds as u64
}
