//! Single-use nonce memory.
//!
//! Reservation happens after signature verification succeeds (unauthenticated
//! traffic must not grow the store) and before the request reaches any
//! downstream stage. A second reservation of the same `(appId, nonce)` inside
//! the TTL is a replay.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

/// Outcome of a nonce reservation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    Ok,
    Replay,
}

/// At-most-once acceptance of `(appId, nonce)` within a TTL.
pub trait NonceStore: Send + Sync {
    fn reserve(&self, app_id: &str, nonce: &str, ttl_secs: u64) -> Reservation;
}

/// In-memory nonce store.
///
/// Expired entries are swept opportunistically on insert, so memory stays
/// bounded by the request rate times the TTL without a background task.
pub struct MemoryNonceStore {
    entries: Mutex<HashMap<(String, String), DateTime<Utc>>>,
}

impl MemoryNonceStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// As [`NonceStore::reserve`] but with an injectable clock for tests.
    pub fn reserve_at(
        &self,
        app_id: &str,
        nonce: &str,
        ttl_secs: u64,
        now: DateTime<Utc>,
    ) -> Reservation {
        let mut entries = self.entries.lock();
        entries.retain(|_, expires_at| *expires_at > now);

        let key = (app_id.to_string(), nonce.to_string());
        if entries.contains_key(&key) {
            return Reservation::Replay;
        }
        entries.insert(key, now + Duration::seconds(ttl_secs as i64));
        Reservation::Ok
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

impl Default for MemoryNonceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl NonceStore for MemoryNonceStore {
    fn reserve(&self, app_id: &str, nonce: &str, ttl_secs: u64) -> Reservation {
        self.reserve_at(app_id, nonce, ttl_secs, Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_reservation_ok_second_replay() {
        let store = MemoryNonceStore::new();
        assert_eq!(store.reserve("app", "nonce-1", 600), Reservation::Ok);
        assert_eq!(store.reserve("app", "nonce-1", 600), Reservation::Replay);
    }

    #[test]
    fn nonces_are_scoped_per_app() {
        let store = MemoryNonceStore::new();
        assert_eq!(store.reserve("app-a", "nonce-1", 600), Reservation::Ok);
        assert_eq!(store.reserve("app-b", "nonce-1", 600), Reservation::Ok);
    }

    #[test]
    fn expired_nonce_can_be_reused() {
        let store = MemoryNonceStore::new();
        let t0 = Utc::now();
        assert_eq!(store.reserve_at("app", "n-0123456789abcdef", 600, t0), Reservation::Ok);
        let later = t0 + Duration::seconds(601);
        assert_eq!(
            store.reserve_at("app", "n-0123456789abcdef", 600, later),
            Reservation::Ok
        );
    }

    #[test]
    fn sweep_keeps_store_bounded() {
        let store = MemoryNonceStore::new();
        let t0 = Utc::now();
        for i in 0..100 {
            store.reserve_at("app", &format!("nonce-{i:04}"), 10, t0);
        }
        assert_eq!(store.len(), 100);
        // All previous entries expired; the insert sweep drops them.
        store.reserve_at("app", "nonce-after-expiry", 10, t0 + Duration::seconds(11));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn still_replay_just_before_expiry() {
        let store = MemoryNonceStore::new();
        let t0 = Utc::now();
        store.reserve_at("app", "nonce-x", 600, t0);
        assert_eq!(
            store.reserve_at("app", "nonce-x", 600, t0 + Duration::seconds(599)),
            Reservation::Replay
        );
    }
}
