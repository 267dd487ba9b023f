//! TTL'd concurrent cache mapping a truck token to the vehicle/event it
//! currently resolves to, so a busy ingest endpoint doesn't hit the
//! database on every request.

use dashmap::DashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct TokenEntry {
    pub vehicle_id: String,
    pub event_id: String,
}

struct CachedEntry {
    value: TokenEntry,
    expires_at: Instant,
}

/// Caches `truck_token -> (vehicle_id, event_id)` for `ttl`, resolved
/// from the vehicle's most recent `in_progress` event registration.
pub struct TokenCache {
    entries: DashMap<String, CachedEntry>,
    ttl: Duration,
}

impl TokenCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn with_default_ttl() -> Self {
        Self::new(Duration::from_secs(24 * 60 * 60))
    }

    pub fn get(&self, token: &str) -> Option<TokenEntry> {
        let entry = self.entries.get(token)?;
        if entry.expires_at > Instant::now() {
            Some(entry.value.clone())
        } else {
            None
        }
    }

    pub fn insert(&self, token: String, value: TokenEntry) {
        self.entries.insert(
            token,
            CachedEntry {
                value,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    pub fn invalidate(&self, token: &str) {
        self.entries.remove(token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cached_entry_is_returned_before_expiry() {
        let cache = TokenCache::new(Duration::from_secs(60));
        cache.insert(
            "tok".to_string(),
            TokenEntry {
                vehicle_id: "v1".to_string(),
                event_id: "e1".to_string(),
            },
        );
        let got = cache.get("tok").expect("entry present");
        assert_eq!(got.vehicle_id, "v1");
    }

    #[test]
    fn expired_entry_is_not_returned() {
        let cache = TokenCache::new(Duration::from_millis(1));
        cache.insert(
            "tok".to_string(),
            TokenEntry {
                vehicle_id: "v1".to_string(),
                event_id: "e1".to_string(),
            },
        );
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("tok").is_none());
    }

    #[test]
    fn invalidate_removes_entry() {
        let cache = TokenCache::new(Duration::from_secs(60));
        cache.insert(
            "tok".to_string(),
            TokenEntry {
                vehicle_id: "v1".to_string(),
                event_id: "e1".to_string(),
            },
        );
        cache.invalidate("tok");
        assert!(cache.get("tok").is_none());
    }
}
