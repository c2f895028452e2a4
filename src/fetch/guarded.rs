// src/fetch/guarded.rs
use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use serde::{de::DeserializeOwned, Serialize};

use super::Fetcher;
use crate::cache::TtlCache;
use crate::model::{ItemKind, NewsPost, ObservedItem, TeamStanding};
use crate::rate_limit::RateLimiter;
use crate::storage::Store;

/// Protects the upstream source: every domain fetch goes through the rate
/// limiter. Refused requests are served from the TTL cache, then from
/// storage. Fallback data is already-known state, so it never yields new
/// events downstream.
pub struct GuardedFetcher {
    inner: Arc<dyn Fetcher>,
    limiter: RateLimiter,
    cache: TtlCache,
    store: Arc<dyn Store>,
    cache_ttl_secs: u64,
}

pub const TEAMS_KEY: &str = "teams";
pub const NEWS_KEY: &str = "news";

pub fn item_key(kind: ItemKind, user: &str) -> String {
    format!("{}_{}", kind.as_str(), user)
}

impl GuardedFetcher {
    pub fn new(
        inner: Arc<dyn Fetcher>,
        limiter: RateLimiter,
        cache: TtlCache,
        store: Arc<dyn Store>,
        cache_ttl_secs: u64,
    ) -> Self {
        Self {
            inner,
            limiter,
            cache,
            store,
            cache_ttl_secs,
        }
    }

    async fn guarded<T, F, Fut>(
        &self,
        key: &str,
        fetch: F,
        fallback: impl FnOnce() -> Result<Vec<T>>,
    ) -> Result<Vec<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<T>>>,
    {
        let allowed = match self.limiter.can_request(key) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(key, "rate limiter unavailable, not fetching: {e:#}");
                false
            }
        };

        if allowed {
            let fresh = fetch().await?;
            if let Err(e) = self.limiter.record_request(key) {
                tracing::warn!(key, "recording request failed: {e:#}");
            }
            if let Err(e) = self.cache.set_json(key, &fresh, self.cache_ttl_secs) {
                tracing::warn!(key, "caching response failed: {e:#}");
            }
            return Ok(fresh);
        }

        match self.cache.get_json::<Vec<T>>(key) {
            Ok(Some(cached)) => {
                tracing::debug!(key, "rate limited, serving cached response");
                return Ok(cached);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(key, "cache read failed: {e:#}"),
        }

        tracing::info!(key, "rate limited, returning stored data");
        fallback()
    }
}

#[async_trait::async_trait]
impl Fetcher for GuardedFetcher {
    async fn fetch_attacks(&self, user: &str) -> Result<Vec<ObservedItem>> {
        self.guarded(
            &item_key(ItemKind::Attack, user),
            || self.inner.fetch_attacks(user),
            || self.store.items_for_user(ItemKind::Attack, user),
        )
        .await
    }

    async fn fetch_defenses(&self, user: &str) -> Result<Vec<ObservedItem>> {
        self.guarded(
            &item_key(ItemKind::Defense, user),
            || self.inner.fetch_defenses(user),
            || self.store.items_for_user(ItemKind::Defense, user),
        )
        .await
    }

    async fn fetch_team_standings(&self) -> Result<Vec<TeamStanding>> {
        self.guarded(
            TEAMS_KEY,
            || self.inner.fetch_team_standings(),
            || Ok(self.store.latest_team_standing()?.into_iter().collect()),
        )
        .await
    }

    async fn fetch_news_posts(&self) -> Result<Vec<NewsPost>> {
        self.guarded(
            NEWS_KEY,
            || self.inner.fetch_news_posts(),
            || self.store.news(),
        )
        .await
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::FixtureFetcher;
    use crate::storage::JsonStore;

    fn guarded(dir: &std::path::Path, store: Arc<JsonStore>) -> GuardedFetcher {
        GuardedFetcher::new(
            Arc::new(FixtureFetcher::new(dir)),
            RateLimiter::new(store.clone(), 3600),
            TtlCache::new(store.clone()),
            store,
            3600,
        )
    }

    const TEAMS: &str = r#"[{"team1_percentage":48.5,"fetched_at":"2025-07-01T12:00:00Z"}]"#;

    #[tokio::test]
    async fn second_call_is_served_from_cache() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("teams.json"), TEAMS).unwrap();
        let store = Arc::new(JsonStore::in_memory());
        let f = guarded(dir.path(), store.clone());

        assert_eq!(f.fetch_team_standings().await.unwrap().len(), 1);
        // upstream changes, but the limiter keeps us on the cached copy
        std::fs::write(dir.path().join("teams.json"), "[]").unwrap();
        let again = f.fetch_team_standings().await.unwrap();
        assert_eq!(again.len(), 1);
        assert!((again[0].team1_percentage - 48.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn falls_back_to_storage_without_cache() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonStore::in_memory());
        let f = guarded(dir.path(), store.clone());

        f.fetch_team_standings().await.unwrap();
        f.cache.delete(TEAMS_KEY).unwrap();
        store
            .save_team_standing(&TeamStanding::new(60.0, chrono::Utc::now()))
            .unwrap();

        let out = f.fetch_team_standings().await.unwrap();
        assert_eq!(out.len(), 1);
        assert!((out[0].team1_percentage - 60.0).abs() < f64::EPSILON);
    }
}
