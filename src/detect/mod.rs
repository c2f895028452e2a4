//! # Change Detector
//! Decides what is new or changed between known (stored) and observed
//! (freshly fetched) state. The comparison helpers are pure; the `record_*`
//! and `reconcile_*` functions also persist what they observed.

pub mod normalize;

use std::collections::HashSet;

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::model::{ItemKind, NewsPost, NewsRevision, ObservedItem, TeamStanding, LEADER_THRESHOLD};
use crate::storage::Store;

pub use normalize::{html_to_text, normalized_content};

/// Items whose id is not in `known`, in observed order, each id at most once.
pub fn new_items<'a>(
    known: &HashSet<String>,
    observed: &'a [ObservedItem],
) -> Vec<&'a ObservedItem> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut out = Vec::new();
    for item in observed {
        if !known.contains(&item.id) && seen.insert(item.id.as_str()) {
            out.push(item);
        }
    }
    out
}

/// Fetch-side of one user's attacks or defenses: report the delta, persist
/// the full observed list so metadata of known items stays fresh.
pub fn record_items<S: Store + ?Sized>(
    store: &S,
    kind: ItemKind,
    user: &str,
    observed: &[ObservedItem],
) -> Result<Vec<ObservedItem>> {
    let known = store.existing_item_ids(kind, user)?;
    let fresh: Vec<ObservedItem> = new_items(&known, observed).into_iter().cloned().collect();
    store.save_items(kind, observed)?;
    if !fresh.is_empty() {
        tracing::info!(
            target: "monitor",
            user,
            kind = kind.as_str(),
            count = fresh.len(),
            "new items detected"
        );
    }
    Ok(fresh)
}

/// Field-level comparison between a stored and a re-observed news post.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NewsChange {
    pub title: bool,
    pub content: bool,
    pub editor: bool,
    pub edit_date: bool,
}

impl NewsChange {
    pub fn any(&self) -> bool {
        self.title || self.content || self.editor || self.edit_date
    }
}

pub fn diff_news(stored: &NewsPost, observed: &NewsPost) -> NewsChange {
    NewsChange {
        title: stored.title != observed.title,
        content: normalized_content(stored.content.as_deref())
            != normalized_content(observed.content.as_deref()),
        editor: stored.edited_by != observed.edited_by,
        edit_date: stored.edited_at != observed.edited_at,
    }
}

/// Result of reconciling one observed post.
#[derive(Debug, Clone, PartialEq)]
pub enum NewsOutcome {
    /// Id was not stored before.
    New(NewsPost),
    /// Stored post differed; `prior` was snapshotted as `revision_number`.
    Revised {
        prior: NewsPost,
        current: NewsPost,
        revision_number: u32,
        change: NewsChange,
    },
    /// Nothing relevant changed; only the fetch timestamp moved.
    Unchanged(NewsPost),
}

/// Reconcile observed posts with storage, in the order given. Revisions are
/// written before the stored post is replaced, so a failure between the two
/// leaves the old post in place and the next pass retries the comparison.
pub fn reconcile_news<S: Store + ?Sized>(
    store: &S,
    observed: &[NewsPost],
    now: DateTime<Utc>,
) -> Result<Vec<NewsOutcome>> {
    let mut out = Vec::with_capacity(observed.len());
    for post in observed {
        match store.news_by_id(post.id)? {
            None => {
                store.upsert_news(post)?;
                out.push(NewsOutcome::New(post.clone()));
            }
            Some(prior) => {
                let change = diff_news(&prior, post);
                if change.any() {
                    let revision_number = store.next_revision_number(post.id)?;
                    let revision = NewsRevision::snapshot(&prior, revision_number, now);
                    store.save_news_revision(&revision)?;
                    store.upsert_news(post)?;
                    tracing::debug!(
                        target: "monitor",
                        news_id = post.id,
                        revision_number,
                        ?change,
                        "news post revised"
                    );
                    out.push(NewsOutcome::Revised {
                        prior,
                        current: post.clone(),
                        revision_number,
                        change,
                    });
                } else {
                    store.touch_news(post.id, post.fetched_at)?;
                    out.push(NewsOutcome::Unchanged(post.clone()));
                }
            }
        }
    }
    Ok(out)
}

/// Majority flipped between two consecutive observations.
pub fn leader_change(previous: Option<f64>, current: f64) -> bool {
    match previous {
        None => false,
        Some(prev) => (prev > LEADER_THRESHOLD) != (current > LEADER_THRESHOLD),
    }
}

/// Compare against the latest stored standing, set `leader_change`, append.
///
/// A standing not newer than the latest stored one is a replay of known data
/// (cache or storage fallback) and yields `None` without writing anything.
pub fn record_standing<S: Store + ?Sized>(
    store: &S,
    observed: &TeamStanding,
) -> Result<Option<TeamStanding>> {
    let previous = store.latest_team_standing()?;
    if let Some(prev) = &previous {
        if observed.fetched_at <= prev.fetched_at {
            tracing::debug!(
                target: "monitor",
                fetched_at = %observed.fetched_at,
                "standing already recorded, skipping"
            );
            return Ok(None);
        }
    }
    let mut standing = observed.clone();
    standing.leader_change =
        leader_change(previous.map(|p| p.team1_percentage), standing.team1_percentage);
    store.save_team_standing(&standing)?;
    if standing.leader_change {
        tracing::info!(
            target: "monitor",
            team1 = standing.team1_percentage,
            "leader change detected"
        );
    }
    Ok(Some(standing))
}
