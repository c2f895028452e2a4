// src/storage/json.rs
//! Snapshot store: all state lives in memory and, when opened with a path,
//! is rewritten as one JSON document after every mutation.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::{CacheStore, RateLimitStore, Store};
use crate::model::{
    CacheEntry, ItemKind, NewsPost, NewsRevision, ObservedItem, RateLimitEntry, TeamStanding,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    attacks: BTreeMap<String, ObservedItem>,
    #[serde(default)]
    defenses: BTreeMap<String, ObservedItem>,
    #[serde(default)]
    news: BTreeMap<u64, NewsPost>,
    #[serde(default)]
    news_revisions: Vec<NewsRevision>,
    #[serde(default)]
    team_standings: Vec<TeamStanding>,
    #[serde(default)]
    rate_limits: BTreeMap<String, RateLimitEntry>,
    #[serde(default)]
    cache: BTreeMap<String, CacheEntry>,
}

impl Snapshot {
    fn items(&self, kind: ItemKind) -> &BTreeMap<String, ObservedItem> {
        match kind {
            ItemKind::Attack => &self.attacks,
            ItemKind::Defense => &self.defenses,
        }
    }

    fn items_mut(&mut self, kind: ItemKind) -> &mut BTreeMap<String, ObservedItem> {
        match kind {
            ItemKind::Attack => &mut self.attacks,
            ItemKind::Defense => &mut self.defenses,
        }
    }

    fn next_revision(&self, news_id: u64) -> u32 {
        self.news_revisions
            .iter()
            .filter(|r| r.news_id == news_id)
            .map(|r| r.revision_number)
            .max()
            .unwrap_or(0)
            + 1
    }
}

#[derive(Debug)]
pub struct JsonStore {
    state: Mutex<Snapshot>,
    path: Option<PathBuf>,
    // Cache and rate-limit changes not yet on disk.
    dirty: AtomicBool,
}

impl JsonStore {
    /// Volatile store, nothing touches the disk.
    pub fn in_memory() -> Self {
        Self {
            state: Mutex::new(Snapshot::default()),
            path: None,
            dirty: AtomicBool::new(false),
        }
    }

    /// Load the snapshot at `path` (or start empty if it does not exist yet).
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let snapshot = if path.exists() {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("reading store snapshot {}", path.display()))?;
            if raw.trim().is_empty() {
                Snapshot::default()
            } else {
                serde_json::from_str(&raw)
                    .with_context(|| format!("parsing store snapshot {}", path.display()))?
            }
        } else {
            Snapshot::default()
        };
        tracing::debug!(path = %path.display(), "store opened");
        Ok(Self {
            state: Mutex::new(snapshot),
            path: Some(path),
            dirty: AtomicBool::new(false),
        })
    }

    fn read<T>(&self, f: impl FnOnce(&Snapshot) -> T) -> T {
        let guard = self.state.lock();
        f(&guard)
    }

    /// Apply a mutation to a copy, persist the copy, then publish it. A failed
    /// write leaves the in-memory state untouched. The lock is held
    /// throughout so snapshots hit the disk in mutation order.
    fn write<T>(&self, f: impl FnOnce(&mut Snapshot) -> Result<T>) -> Result<T> {
        let mut guard = self.state.lock();
        let Some(path) = &self.path else {
            return f(&mut guard);
        };
        let mut next = guard.clone();
        let out = f(&mut next)?;
        persist(path, &next)?;
        *guard = next;
        self.dirty.store(false, Ordering::Release);
        Ok(out)
    }

    /// Memory-only mutation for cache and rate-limit bookkeeping. It reaches
    /// the disk with the next domain write or an explicit [`flush`](Self::flush).
    fn write_volatile<T>(&self, f: impl FnOnce(&mut Snapshot) -> T) -> T {
        let mut guard = self.state.lock();
        let out = f(&mut guard);
        if self.path.is_some() {
            self.dirty.store(true, Ordering::Release);
        }
        out
    }

    /// Persist pending cache and rate-limit changes. No-op when nothing is
    /// pending or the store is in-memory.
    pub fn flush(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let guard = self.state.lock();
        if !self.dirty.load(Ordering::Acquire) {
            return Ok(());
        }
        persist(path, &guard)?;
        self.dirty.store(false, Ordering::Release);
        Ok(())
    }
}

fn persist(path: &Path, snapshot: &Snapshot) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    let body = serde_json::to_vec_pretty(snapshot).context("serializing store snapshot")?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, body).with_context(|| format!("writing {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}

impl Store for JsonStore {
    fn existing_item_ids(&self, kind: ItemKind, user: &str) -> Result<HashSet<String>> {
        Ok(self.read(|s| {
            s.items(kind)
                .values()
                .filter(|i| i.owner(kind) == user)
                .map(|i| i.id.clone())
                .collect()
        }))
    }

    fn items_for_user(&self, kind: ItemKind, user: &str) -> Result<Vec<ObservedItem>> {
        let mut items: Vec<ObservedItem> = self.read(|s| {
            s.items(kind)
                .values()
                .filter(|i| i.owner(kind) == user)
                .cloned()
                .collect()
        });
        items.sort_by(|a, b| b.fetched_at.cmp(&a.fetched_at));
        Ok(items)
    }

    fn save_items(&self, kind: ItemKind, items: &[ObservedItem]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        self.write(|s| {
            let map = s.items_mut(kind);
            for item in items {
                map.insert(item.id.clone(), item.clone());
            }
            Ok(())
        })
    }

    fn existing_news_ids(&self) -> Result<HashSet<u64>> {
        Ok(self.read(|s| s.news.keys().copied().collect()))
    }

    fn news_by_id(&self, id: u64) -> Result<Option<NewsPost>> {
        Ok(self.read(|s| s.news.get(&id).cloned()))
    }

    fn news(&self) -> Result<Vec<NewsPost>> {
        Ok(self.read(|s| s.news.values().rev().cloned().collect()))
    }

    fn upsert_news(&self, post: &NewsPost) -> Result<()> {
        self.write(|s| {
            s.news.insert(post.id, post.clone());
            Ok(())
        })
    }

    fn touch_news(&self, id: u64, fetched_at: DateTime<Utc>) -> Result<()> {
        self.write(|s| match s.news.get_mut(&id) {
            Some(post) => {
                post.fetched_at = fetched_at;
                Ok(())
            }
            None => bail!("news post {id} is not stored"),
        })
    }

    fn next_revision_number(&self, news_id: u64) -> Result<u32> {
        Ok(self.read(|s| s.next_revision(news_id)))
    }

    fn save_news_revision(&self, revision: &NewsRevision) -> Result<()> {
        self.write(|s| {
            let expected = s.next_revision(revision.news_id);
            if revision.revision_number != expected {
                bail!(
                    "revision {} for news {} out of sequence (expected {expected})",
                    revision.revision_number,
                    revision.news_id
                );
            }
            s.news_revisions.push(revision.clone());
            Ok(())
        })
    }

    fn news_revisions(&self, news_id: u64) -> Result<Vec<NewsRevision>> {
        let mut revs: Vec<NewsRevision> = self.read(|s| {
            s.news_revisions
                .iter()
                .filter(|r| r.news_id == news_id)
                .cloned()
                .collect()
        });
        revs.sort_by_key(|r| r.revision_number);
        Ok(revs)
    }

    fn latest_team_standing(&self) -> Result<Option<TeamStanding>> {
        Ok(self.read(|s| {
            s.team_standings
                .iter()
                .max_by_key(|t| t.fetched_at)
                .cloned()
        }))
    }

    fn save_team_standing(&self, standing: &TeamStanding) -> Result<()> {
        self.write(|s| {
            s.team_standings.push(standing.clone());
            Ok(())
        })
    }

    fn team_standings_history(&self) -> Result<Vec<TeamStanding>> {
        let mut all = self.read(|s| s.team_standings.clone());
        all.sort_by_key(|t| t.fetched_at);
        Ok(all)
    }
}

impl RateLimitStore for JsonStore {
    fn rate_limit(&self, key: &str) -> Result<Option<RateLimitEntry>> {
        Ok(self.read(|s| s.rate_limits.get(key).cloned()))
    }

    fn upsert_rate_limit(&self, entry: RateLimitEntry) -> Result<()> {
        self.write_volatile(|s| {
            s.rate_limits.insert(entry.key.clone(), entry);
        });
        Ok(())
    }
}

impl CacheStore for JsonStore {
    fn cache_entry(&self, key: &str) -> Result<Option<CacheEntry>> {
        Ok(self.read(|s| s.cache.get(key).cloned()))
    }

    fn upsert_cache(&self, entry: CacheEntry) -> Result<()> {
        self.write_volatile(|s| {
            s.cache.insert(entry.key.clone(), entry);
        });
        Ok(())
    }

    fn delete_cache(&self, key: &str) -> Result<bool> {
        Ok(self.write_volatile(|s| s.cache.remove(key).is_some()))
    }

    fn delete_cache_many(&self, keys: &[String]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        let removed = self.write_volatile(|s| {
            keys.iter()
                .filter(|k| s.cache.remove(k.as_str()).is_some())
                .count()
        });
        Ok(removed)
    }

    fn cache_entries(&self) -> Result<Vec<CacheEntry>> {
        Ok(self.read(|s| s.cache.values().cloned().collect()))
    }
}
