// src/cache.rs
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::model::CacheEntry;
use crate::storage::CacheStore;

/// Persisted key → opaque value store with per-entry ttl.
/// Expiry is lazy: an expired entry is removed by the read that finds it.
#[derive(Clone)]
pub struct TtlCache {
    store: Arc<dyn CacheStore>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
}

impl TtlCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        self.get_at(key, Utc::now())
    }

    pub fn get_at(&self, key: &str, now: DateTime<Utc>) -> Result<Option<String>> {
        let Some(entry) = self.store.cache_entry(key)? else {
            return Ok(None);
        };
        if entry.is_expired(now) {
            self.store.delete_cache(key)?;
            tracing::trace!(key, "cache entry expired on read");
            return Ok(None);
        }
        Ok(Some(entry.value))
    }

    pub fn set(&self, key: &str, value: impl Into<String>, ttl_secs: u64) -> Result<()> {
        self.set_at(key, value, ttl_secs, Utc::now())
    }

    pub fn set_at(
        &self,
        key: &str,
        value: impl Into<String>,
        ttl_secs: u64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.store.upsert_cache(CacheEntry {
            key: key.to_string(),
            value: value.into(),
            created: now,
            ttl_secs,
        })
    }

    /// Typed read; a value that no longer deserializes counts as a miss.
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(raw) = self.get(key)? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(v) => Ok(Some(v)),
            Err(e) => {
                tracing::warn!(key, "dropping undecodable cache entry: {e}");
                self.store.delete_cache(key)?;
                Ok(None)
            }
        }
    }

    pub fn set_json<T>(&self, key: &str, value: &T, ttl_secs: u64) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let raw = serde_json::to_string(value)
            .with_context(|| format!("serializing cache value {key}"))?;
        self.set(key, raw, ttl_secs)
    }

    pub fn delete(&self, key: &str) -> Result<bool> {
        self.store.delete_cache(key)
    }

    pub fn cleanup_expired(&self) -> Result<usize> {
        self.cleanup_expired_at(Utc::now())
    }

    /// Remove every entry whose age exceeds its ttl. Returns how many went.
    pub fn cleanup_expired_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let expired: Vec<String> = self
            .store
            .cache_entries()?
            .into_iter()
            .filter(|e| e.is_expired(now))
            .map(|e| e.key)
            .collect();
        self.store.delete_cache_many(&expired)
    }

    pub fn stats(&self) -> Result<CacheStats> {
        Ok(CacheStats {
            total_entries: self.store.cache_entries()?.len(),
        })
    }
}

/// Periodic expired-entry sweep. Runs until `token` is cancelled.
pub fn spawn_cache_sweeper(
    cache: TtlCache,
    period: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match cache.cleanup_expired() {
                Ok(0) => {}
                Ok(n) => tracing::debug!(removed = n, "cache sweep"),
                Err(e) => tracing::warn!("cache sweep failed: {e:#}"),
            }
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(period) => {}
            }
        }
    })
}
