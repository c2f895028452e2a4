// src/rate_limit.rs
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::model::RateLimitEntry;
use crate::storage::RateLimitStore;

/// Per-key request gate backed by persisted last-request timestamps.
/// - First request for a key is always allowed.
/// - Afterwards, allowed once `min_interval_secs` have elapsed.
/// - `can_request*` never mutates; call `record_request*` after fetching.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    min_interval_secs: u64,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>, min_interval_secs: u64) -> Self {
        Self {
            store,
            min_interval_secs,
        }
    }

    pub fn can_request(&self, key: &str) -> Result<bool> {
        self.can_request_at(key, Utc::now())
    }

    pub fn can_request_at(&self, key: &str, now: DateTime<Utc>) -> Result<bool> {
        Ok(match self.store.rate_limit(key)? {
            None => true,
            Some(entry) => {
                let elapsed = now.signed_duration_since(entry.last_request);
                let window_ms = (entry.min_interval_secs as i64).saturating_mul(1000);
                elapsed.num_milliseconds() >= window_ms
            }
        })
    }

    pub fn record_request(&self, key: &str) -> Result<()> {
        self.record_request_at(key, Utc::now())
    }

    pub fn record_request_at(&self, key: &str, now: DateTime<Utc>) -> Result<()> {
        self.store.upsert_rate_limit(RateLimitEntry {
            key: key.to_string(),
            last_request: now,
            min_interval_secs: self.min_interval_secs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::JsonStore;
    use chrono::{Duration, TimeZone};

    #[test]
    fn gate_opens_after_interval() {
        let rl = RateLimiter::new(Arc::new(JsonStore::in_memory()), 300);
        let t0 = Utc.with_ymd_and_hms(2025, 7, 1, 9, 0, 0).unwrap();

        assert!(rl.can_request_at("teams", t0).unwrap());
        rl.record_request_at("teams", t0).unwrap();
        assert!(!rl.can_request_at("teams", t0 + Duration::seconds(299)).unwrap());
        assert!(rl.can_request_at("teams", t0 + Duration::seconds(300)).unwrap());
    }

    #[test]
    fn keys_are_independent() {
        let rl = RateLimiter::new(Arc::new(JsonStore::in_memory()), 60);
        let t0 = Utc.with_ymd_and_hms(2025, 7, 1, 9, 0, 0).unwrap();
        rl.record_request_at("attacks_alice", t0).unwrap();
        assert!(!rl.can_request_at("attacks_alice", t0).unwrap());
        assert!(rl.can_request_at("defenses_alice", t0).unwrap());
    }
}
