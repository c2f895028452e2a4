// src/fetch/fixture.rs
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use tokio::fs;

use super::Fetcher;
use crate::model::{NewsPost, ObservedItem, TeamStanding};

/// Serves observations from JSON snapshots in a directory:
///
/// ```text
/// <dir>/teams.json             [TeamStanding]
/// <dir>/news.json              [NewsPost]
/// <dir>/attacks/<user>.json    [ObservedItem]
/// <dir>/defenses/<user>.json   [ObservedItem]
/// ```
///
/// A missing file means nothing was observed. Files are re-read on every
/// call, so editing them while the monitor runs simulates upstream changes.
#[derive(Debug, Clone)]
pub struct FixtureFetcher {
    dir: PathBuf,
}

impl FixtureFetcher {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    async fn load<T: DeserializeOwned>(&self, rel: impl AsRef<Path>) -> Result<Vec<T>> {
        let path = self.dir.join(rel);
        let raw = match fs::read_to_string(&path).await {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("reading fixture {}", path.display())),
        };
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed == "null" {
            return Ok(Vec::new());
        }
        serde_json::from_str(trimmed).with_context(|| format!("parsing fixture {}", path.display()))
    }
}

#[async_trait::async_trait]
impl Fetcher for FixtureFetcher {
    async fn fetch_attacks(&self, user: &str) -> Result<Vec<ObservedItem>> {
        self.load(Path::new("attacks").join(format!("{user}.json"))).await
    }

    async fn fetch_defenses(&self, user: &str) -> Result<Vec<ObservedItem>> {
        self.load(Path::new("defenses").join(format!("{user}.json"))).await
    }

    async fn fetch_team_standings(&self) -> Result<Vec<TeamStanding>> {
        self.load("teams.json").await
    }

    async fn fetch_news_posts(&self) -> Result<Vec<NewsPost>> {
        self.load("news.json").await
    }

    fn name(&self) -> &'static str {
        "fixture"
    }
}
