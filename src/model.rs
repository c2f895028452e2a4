//! # Data model
//! Plain records exchanged between the fetch collaborator, the change
//! detector, storage and event handlers. No I/O lives here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which side of a fight an observed item was collected from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Attack,
    Defense,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Attack => "attacks",
            ItemKind::Defense => "defenses",
        }
    }
}

/// An attack or defense post as seen on a user's page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedItem {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    pub attacker: String,
    pub defender: String,
    pub fetched_at: DateTime<Utc>,
    pub url: String,
}

impl ObservedItem {
    /// The participant whose page lists this item for the given kind.
    pub fn owner(&self, kind: ItemKind) -> &str {
        match kind {
            ItemKind::Attack => &self.attacker,
            ItemKind::Defense => &self.defender,
        }
    }
}

/// A news post. The same `id` may be re-observed with edited fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsPost {
    pub id: u64,
    pub title: String,
    /// Rich text (HTML) body.
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub posted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub edited_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub edited_by: Option<String>,
    pub url: String,
    pub fetched_at: DateTime<Utc>,
}

/// Immutable snapshot of a news post before a detected change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsRevision {
    pub news_id: u64,
    /// Starts at 1 and grows by one per news post.
    pub revision_number: u32,
    pub title: String,
    pub content: Option<String>,
    pub author: Option<String>,
    pub posted_at: Option<DateTime<Utc>>,
    pub edited_at: Option<DateTime<Utc>>,
    pub edited_by: Option<String>,
    pub url: String,
    pub fetched_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl NewsRevision {
    pub fn snapshot(prior: &NewsPost, revision_number: u32, now: DateTime<Utc>) -> Self {
        Self {
            news_id: prior.id,
            revision_number,
            title: prior.title.clone(),
            content: prior.content.clone(),
            author: prior.author.clone(),
            posted_at: prior.posted_at,
            edited_at: prior.edited_at,
            edited_by: prior.edited_by.clone(),
            url: prior.url.clone(),
            fetched_at: prior.fetched_at,
            created_at: now,
        }
    }
}

/// Optional per-team numbers shown on the event page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TeamMetrics {
    #[serde(default)]
    pub users: Option<u64>,
    #[serde(default)]
    pub attacks: Option<u64>,
    #[serde(default)]
    pub friendly_fire: Option<u64>,
    #[serde(default)]
    pub battle_ratio: Option<f64>,
    #[serde(default)]
    pub avg_points: Option<f64>,
    #[serde(default)]
    pub avg_attacks: Option<f64>,
}

/// Percentage split between the two teams at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamStanding {
    /// Team one's share, 0.0..=100.0. Team two holds the remainder.
    pub team1_percentage: f64,
    pub fetched_at: DateTime<Utc>,
    #[serde(default)]
    pub leader_change: bool,
    #[serde(default)]
    pub team1: TeamMetrics,
    #[serde(default)]
    pub team2: TeamMetrics,
}

/// Strictly above this share, team one leads.
pub const LEADER_THRESHOLD: f64 = 50.0;

impl TeamStanding {
    pub fn new(team1_percentage: f64, fetched_at: DateTime<Utc>) -> Self {
        Self {
            team1_percentage,
            fetched_at,
            leader_change: false,
            team1: TeamMetrics::default(),
            team2: TeamMetrics::default(),
        }
    }

    pub fn team2_percentage(&self) -> f64 {
        100.0 - self.team1_percentage
    }

    pub fn team1_leads(&self) -> bool {
        self.team1_percentage > LEADER_THRESHOLD
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitEntry {
    pub key: String,
    pub last_request: DateTime<Utc>,
    pub min_interval_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    /// Opaque serialized value.
    pub value: String,
    pub created: DateTime<Utc>,
    pub ttl_secs: u64,
}

impl CacheEntry {
    /// Expired once its age is strictly greater than the ttl.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.created);
        age.num_milliseconds() > (self.ttl_secs as i64).saturating_mul(1000)
    }
}
