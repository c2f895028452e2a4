// tests/common/mod.rs
// Scripted fetch collaborator and small builders shared by integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;

use artfight_monitor::dispatch::{from_fn, EventHandler, MonitorEvent};
use artfight_monitor::model::{NewsPost, ObservedItem, TeamStanding};
use artfight_monitor::Fetcher;

/// One scripted response: data or an error message.
pub type Step<T> = std::result::Result<Vec<T>, String>;

/// Plays back queued responses per domain. Once a queue is drained the last
/// response repeats (an untouched queue yields empty observations).
struct Script<T: Clone> {
    queue: VecDeque<Step<T>>,
    last: Step<T>,
    calls: usize,
}

impl<T: Clone> Default for Script<T> {
    fn default() -> Self {
        Self {
            queue: VecDeque::new(),
            last: Ok(Vec::new()),
            calls: 0,
        }
    }
}

impl<T: Clone> Script<T> {
    fn next(&mut self) -> Result<Vec<T>> {
        self.calls += 1;
        if let Some(step) = self.queue.pop_front() {
            self.last = step;
        }
        self.last.clone().map_err(|e| anyhow!(e))
    }
}

#[derive(Default)]
pub struct ScriptedFetcher {
    teams: Mutex<Script<TeamStanding>>,
    news: Mutex<Script<NewsPost>>,
    attacks: Mutex<Script<ObservedItem>>,
    defenses: Mutex<Script<ObservedItem>>,
    pub closed: AtomicUsize,
}

impl ScriptedFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_teams(&self, step: Step<TeamStanding>) {
        self.teams.lock().queue.push_back(step);
    }

    pub fn push_news(&self, step: Step<NewsPost>) {
        self.news.lock().queue.push_back(step);
    }

    pub fn push_attacks(&self, step: Step<ObservedItem>) {
        self.attacks.lock().queue.push_back(step);
    }

    pub fn push_defenses(&self, step: Step<ObservedItem>) {
        self.defenses.lock().queue.push_back(step);
    }

    pub fn team_calls(&self) -> usize {
        self.teams.lock().calls
    }

    pub fn news_calls(&self) -> usize {
        self.news.lock().calls
    }

    pub fn attack_calls(&self) -> usize {
        self.attacks.lock().calls
    }
}

#[async_trait::async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch_attacks(&self, _user: &str) -> Result<Vec<ObservedItem>> {
        self.attacks.lock().next()
    }

    async fn fetch_defenses(&self, _user: &str) -> Result<Vec<ObservedItem>> {
        self.defenses.lock().next()
    }

    async fn fetch_team_standings(&self) -> Result<Vec<TeamStanding>> {
        self.teams.lock().next()
    }

    async fn fetch_news_posts(&self) -> Result<Vec<NewsPost>> {
        self.news.lock().next()
    }

    async fn close(&self) -> Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Handler that keeps every event it sees.
pub fn recorder() -> (Arc<dyn EventHandler>, Arc<Mutex<Vec<MonitorEvent>>>) {
    let seen: Arc<Mutex<Vec<MonitorEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let handler = from_fn("recorder", move |ev: &MonitorEvent| {
        sink.lock().push(ev.clone());
        Ok(())
    });
    (handler, seen)
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 7, 10, 12, 0, 0).unwrap()
}

pub fn at(minutes: i64) -> DateTime<Utc> {
    t0() + Duration::minutes(minutes)
}

pub fn item(id: &str, attacker: &str, defender: &str) -> ObservedItem {
    ObservedItem {
        id: id.to_string(),
        title: format!("piece {id}"),
        description: None,
        image_url: None,
        attacker: attacker.to_string(),
        defender: defender.to_string(),
        fetched_at: t0(),
        url: format!("https://artfight.net/attack/{id}"),
    }
}

pub fn post(id: u64, title: &str, content: Option<&str>, fetched_at: DateTime<Utc>) -> NewsPost {
    NewsPost {
        id,
        title: title.to_string(),
        content: content.map(str::to_string),
        author: Some("admin".to_string()),
        posted_at: Some(t0()),
        edited_at: None,
        edited_by: None,
        url: format!("https://artfight.net/news/{id}"),
        fetched_at,
    }
}

pub fn standing(team1: f64, fetched_at: DateTime<Utc>) -> TeamStanding {
    TeamStanding::new(team1, fetched_at)
}
