//! # Storage contracts
//! Read/write contracts the engine needs from persistence. Operations are
//! short and independent; nothing holds a lock across an `.await`.

pub mod json;

use std::collections::HashSet;

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::detect::{reconcile_news, NewsOutcome};
use crate::model::{
    CacheEntry, ItemKind, NewsPost, NewsRevision, ObservedItem, RateLimitEntry, TeamStanding,
};

pub use json::JsonStore;

/// Domain records: attacks, defenses, news (+ revisions) and team standings.
pub trait Store: Send + Sync {
    /// Ids already stored for `user` on the given side.
    fn existing_item_ids(&self, kind: ItemKind, user: &str) -> Result<HashSet<String>>;

    fn items_for_user(&self, kind: ItemKind, user: &str) -> Result<Vec<ObservedItem>>;

    /// Upsert by id.
    fn save_items(&self, kind: ItemKind, items: &[ObservedItem]) -> Result<()>;

    fn existing_attack_ids(&self, user: &str) -> Result<HashSet<String>> {
        self.existing_item_ids(ItemKind::Attack, user)
    }

    fn existing_defense_ids(&self, user: &str) -> Result<HashSet<String>> {
        self.existing_item_ids(ItemKind::Defense, user)
    }

    fn save_attacks(&self, items: &[ObservedItem]) -> Result<()> {
        self.save_items(ItemKind::Attack, items)
    }

    fn save_defenses(&self, items: &[ObservedItem]) -> Result<()> {
        self.save_items(ItemKind::Defense, items)
    }

    fn existing_news_ids(&self) -> Result<HashSet<u64>>;

    fn news_by_id(&self, id: u64) -> Result<Option<NewsPost>>;

    /// All stored posts, highest id first.
    fn news(&self) -> Result<Vec<NewsPost>>;

    /// Insert or replace the stored post with the same id.
    fn upsert_news(&self, post: &NewsPost) -> Result<()>;

    /// Refresh only the fetch timestamp of a stored post.
    fn touch_news(&self, id: u64, fetched_at: DateTime<Utc>) -> Result<()>;

    fn next_revision_number(&self, news_id: u64) -> Result<u32>;

    /// Append a revision. Rejects numbers that would leave a gap or repeat.
    fn save_news_revision(&self, revision: &NewsRevision) -> Result<()>;

    /// Revisions of one post, oldest first.
    fn news_revisions(&self, news_id: u64) -> Result<Vec<NewsRevision>>;

    /// Reconcile observed posts against storage and persist them.
    /// Returns `(current, prior_if_revised)` in input order.
    fn save_news(&self, posts: &[NewsPost]) -> Result<Vec<(NewsPost, Option<NewsPost>)>> {
        let outcomes = reconcile_news(self, posts, Utc::now())?;
        Ok(outcomes
            .into_iter()
            .map(|o| match o {
                NewsOutcome::New(post) | NewsOutcome::Unchanged(post) => (post, None),
                NewsOutcome::Revised { prior, current, .. } => (current, Some(prior)),
            })
            .collect())
    }

    /// Most recent standing by observation time.
    fn latest_team_standing(&self) -> Result<Option<TeamStanding>>;

    /// Append-only.
    fn save_team_standing(&self, standing: &TeamStanding) -> Result<()>;

    fn save_team_standings(&self, standings: &[TeamStanding]) -> Result<()> {
        for s in standings {
            self.save_team_standing(s)?;
        }
        Ok(())
    }

    /// Full standing history, oldest first.
    fn team_standings_history(&self) -> Result<Vec<TeamStanding>>;
}

/// Backing for the rate limiter.
pub trait RateLimitStore: Send + Sync {
    fn rate_limit(&self, key: &str) -> Result<Option<RateLimitEntry>>;
    fn upsert_rate_limit(&self, entry: RateLimitEntry) -> Result<()>;
}

/// Backing for the TTL cache.
pub trait CacheStore: Send + Sync {
    fn cache_entry(&self, key: &str) -> Result<Option<CacheEntry>>;
    fn upsert_cache(&self, entry: CacheEntry) -> Result<()>;
    /// Returns whether an entry was removed.
    fn delete_cache(&self, key: &str) -> Result<bool>;
    /// Removes every listed key in one write. Returns how many existed.
    fn delete_cache_many(&self, keys: &[String]) -> Result<usize>;
    fn cache_entries(&self) -> Result<Vec<CacheEntry>>;
}
