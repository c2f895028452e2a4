// src/fetch/mod.rs
//! Fetch collaborators. Parsing the upstream site lives elsewhere; the engine
//! only needs typed observations (or an error) per domain.

pub mod fixture;
pub mod guarded;

use anyhow::Result;

use crate::model::{ItemKind, NewsPost, ObservedItem, TeamStanding};

pub use fixture::FixtureFetcher;
pub use guarded::GuardedFetcher;

#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch_attacks(&self, user: &str) -> Result<Vec<ObservedItem>>;
    async fn fetch_defenses(&self, user: &str) -> Result<Vec<ObservedItem>>;
    /// An empty list means "no standing observed".
    async fn fetch_team_standings(&self) -> Result<Vec<TeamStanding>>;
    /// Posts in the order they should be evaluated and emitted.
    async fn fetch_news_posts(&self) -> Result<Vec<NewsPost>>;

    async fn fetch_items(&self, kind: ItemKind, user: &str) -> Result<Vec<ObservedItem>> {
        match kind {
            ItemKind::Attack => self.fetch_attacks(user).await,
            ItemKind::Defense => self.fetch_defenses(user).await,
        }
    }

    /// Release owned resources (connections, sessions).
    async fn close(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str;
}
