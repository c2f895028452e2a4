//! # Monitor
//! Owns the polling loops and runs fetch → detect → persist → dispatch.
//!
//! Two independently controllable loop groups:
//! - *event monitoring*: the team-standing loop plus (when users are
//!   configured) the per-user attack/defense loop, sharing one cancellation
//!   token and one liveness flag;
//! - *news monitoring*: the news loop, with its own token and flag.
//!
//! Loops never exit on a failed pass; they log, back off for the configured
//! cooldown and try again. Cancellation is observed before each pass and
//! during every sleep.

pub mod battle_over;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use metrics::{counter, gauge};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cache::{CacheStats, TtlCache};
use crate::config::MonitorConfig;
use crate::detect::{self, NewsOutcome};
use crate::dispatch::{Dispatcher, EventHandler, EventKind, MonitorEvent, PostRevision};
use crate::fetch::Fetcher;
use crate::model::{ItemKind, ObservedItem, TeamStanding};
use crate::storage::Store;
use crate::telemetry;

pub use battle_over::{BattleOver, BattleOverStatus, BATTLE_OVER_THRESHOLD};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopKind {
    Team,
    Users,
    News,
}

impl LoopKind {
    fn as_str(&self) -> &'static str {
        match self {
            LoopKind::Team => "team",
            LoopKind::Users => "users",
            LoopKind::News => "news",
        }
    }
}

/// Liveness snapshot for observability.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorStats {
    /// Any loop group running.
    pub running: bool,
    pub event_monitoring_running: bool,
    pub news_running: bool,
    pub battle_over: BattleOverStatus,
    pub cache: Option<CacheStats>,
}

struct Inner {
    config: MonitorConfig,
    users: Vec<String>,
    fetcher: Arc<dyn Fetcher>,
    store: Arc<dyn Store>,
    dispatcher: Dispatcher,
    event_running: AtomicBool,
    news_running: AtomicBool,
    battle: BattleOver,
    // Current event-monitoring token; swapped on every start.
    event_token: parking_lot::Mutex<CancellationToken>,
}

#[derive(Default)]
struct Tasks {
    event: Vec<JoinHandle<()>>,
    news: Option<(CancellationToken, JoinHandle<()>)>,
}

pub struct Monitor {
    inner: Arc<Inner>,
    cache: Option<TtlCache>,
    tasks: tokio::sync::Mutex<Tasks>,
}

impl Monitor {
    pub fn new(config: MonitorConfig, fetcher: Arc<dyn Fetcher>, store: Arc<dyn Store>) -> Self {
        telemetry::describe_metrics();
        if config.battle_over_blind_spot() {
            tracing::warn!(
                target: "monitor",
                team_interval = config.team_check_interval_secs,
                rate_limit_interval = config.rate_limit_interval_secs,
                cache_ttl = config.cache_ttl_secs,
                "cache_ttl_secs should be at least rate_limit_interval_secs; \
                 stored-standing fallbacks will keep resetting battle-over detection"
            );
        }
        let users = config.monitored_users();
        let battle = BattleOver::new(config.battle_over_detection);
        let cancelled = CancellationToken::new();
        cancelled.cancel();
        Self {
            inner: Arc::new(Inner {
                config,
                users,
                fetcher,
                store,
                dispatcher: Dispatcher::new(),
                event_running: AtomicBool::new(false),
                news_running: AtomicBool::new(false),
                battle,
                event_token: parking_lot::Mutex::new(cancelled),
            }),
            cache: None,
            tasks: tokio::sync::Mutex::new(Tasks::default()),
        }
    }

    /// Report cache statistics in `stats()`.
    pub fn with_cache(mut self, cache: TtlCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    pub fn register(&self, kind: EventKind, handler: Arc<dyn EventHandler>) {
        self.inner.dispatcher.register(kind, handler);
    }

    /// String-keyed registration; unknown event types are logged and ignored.
    pub fn add_event_handler(&self, event_type: &str, handler: Arc<dyn EventHandler>) -> bool {
        self.inner.dispatcher.register_named(event_type, handler)
    }

    pub fn is_event_monitoring_running(&self) -> bool {
        self.inner.event_running.load(Ordering::Acquire)
    }

    pub fn is_news_running(&self) -> bool {
        self.inner.news_running.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.is_event_monitoring_running() || self.is_news_running()
    }

    /// Start event monitoring and, if enabled, news monitoring.
    pub async fn start(&self) {
        self.start_event_monitoring().await;
        if self.inner.config.monitor_news {
            self.start_news_monitoring().await;
        } else {
            tracing::info!(target: "monitor", "news monitor disabled");
        }
    }

    /// No-op when already running.
    pub async fn start_event_monitoring(&self) {
        let mut tasks = self.tasks.lock().await;
        if self.inner.event_running.load(Ordering::Acquire) {
            return;
        }
        // Loops halted by the battle-over heuristic have already exited.
        tasks.event.clear();

        let token = CancellationToken::new();
        *self.inner.event_token.lock() = token.clone();
        self.inner.event_running.store(true, Ordering::Release);

        tasks.event.push(spawn_loop(
            self.inner.clone(),
            LoopKind::Team,
            self.inner.config.team_interval(),
            token.clone(),
        ));
        if self.inner.users.is_empty() {
            tracing::info!(target: "monitor", "team monitor started (no users configured)");
        } else {
            tasks.event.push(spawn_loop(
                self.inner.clone(),
                LoopKind::Users,
                self.inner.config.user_interval(),
                token,
            ));
            tracing::info!(
                target: "monitor",
                users = self.inner.users.len(),
                "team and user monitor started"
            );
        }
    }

    /// No-op when already running.
    pub async fn start_news_monitoring(&self) {
        let mut tasks = self.tasks.lock().await;
        if self.inner.news_running.load(Ordering::Acquire) {
            return;
        }
        let token = CancellationToken::new();
        self.inner.news_running.store(true, Ordering::Release);
        let handle = spawn_loop(
            self.inner.clone(),
            LoopKind::News,
            self.inner.config.news_interval(),
            token.clone(),
        );
        tasks.news = Some((token, handle));
        tracing::info!(target: "monitor", "news monitor started");
    }

    /// Cancel the event loops and wait (bounded) for them to finish. The
    /// news loop is not touched.
    pub async fn stop_event_monitoring(&self) {
        let mut tasks = self.tasks.lock().await;
        let handles = std::mem::take(&mut tasks.event);
        if self.inner.event_running.load(Ordering::Acquire) {
            tracing::info!(target: "monitor", "stopping event monitoring");
        }
        self.inner.event_token.lock().cancel();
        for handle in handles {
            join_bounded("event", handle, self.inner.config.shutdown_timeout()).await;
        }
        self.inner.event_running.store(false, Ordering::Release);
    }

    /// Cancel the news loop and wait (bounded) for it. Event loops keep going.
    pub async fn stop_news_monitoring(&self) {
        let mut tasks = self.tasks.lock().await;
        if let Some((token, handle)) = tasks.news.take() {
            tracing::info!(target: "monitor", "stopping news monitoring");
            token.cancel();
            join_bounded("news", handle, self.inner.config.shutdown_timeout()).await;
        }
        self.inner.news_running.store(false, Ordering::Release);
    }

    /// Stop every loop, then close the fetch collaborator.
    pub async fn stop(&self) {
        self.stop_event_monitoring().await;
        self.stop_news_monitoring().await;
        let timeout = self.inner.config.shutdown_timeout();
        match tokio::time::timeout(timeout, self.inner.fetcher.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(target: "monitor", "closing fetcher failed: {e:#}"),
            Err(_) => tracing::warn!(target: "monitor", "fetcher did not close within timeout"),
        }
        tracing::info!(target: "monitor", "monitor stopped");
    }

    /// Zero the battle-over counter. If the heuristic had halted event
    /// monitoring, restart it. Returns whether a restart happened.
    pub async fn reset_battle_over(&self) -> bool {
        if !self.inner.battle.enabled() {
            tracing::info!(target: "monitor", "Battle over detection is not enabled");
            return false;
        }
        let was_halted = self.inner.battle.reset();
        if was_halted && !self.is_event_monitoring_running() {
            tracing::info!(target: "monitor", "Restarting team monitoring after manual reset");
            self.start_event_monitoring().await;
            return true;
        }
        false
    }

    pub fn stats(&self) -> MonitorStats {
        let cache = self.cache.as_ref().and_then(|c| match c.stats() {
            Ok(s) => Some(s),
            Err(e) => {
                tracing::warn!(target: "monitor", "cache stats unavailable: {e:#}");
                None
            }
        });
        MonitorStats {
            running: self.is_running(),
            event_monitoring_running: self.is_event_monitoring_running(),
            news_running: self.is_news_running(),
            battle_over: self.inner.battle.status(),
            cache,
        }
    }

    /// One team pass on demand; returns the standings it recorded.
    pub async fn check_teams_manual(&self) -> Result<Vec<TeamStanding>> {
        self.inner.run_team_pass().await
    }

    pub async fn run_team_pass(&self) -> Result<Vec<TeamStanding>> {
        self.inner.run_team_pass().await
    }

    pub async fn run_user_pass(&self) -> Result<()> {
        self.inner.run_user_pass().await
    }

    pub async fn run_items_pass(&self, kind: ItemKind, user: &str) -> Result<Vec<ObservedItem>> {
        self.inner.run_items_pass(kind, user).await
    }

    pub async fn run_news_pass(&self) -> Result<Vec<NewsOutcome>> {
        self.inner.run_news_pass().await
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.inner.event_token.lock().cancel();
        if let Some((token, _)) = &self.tasks.get_mut().news {
            token.cancel();
        }
    }
}

fn spawn_loop(
    inner: Arc<Inner>,
    kind: LoopKind,
    interval: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move { inner.run_loop(kind, interval, token).await })
}

async fn join_bounded(name: &str, mut handle: JoinHandle<()>, timeout: Duration) {
    match tokio::time::timeout(timeout, &mut handle).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) if e.is_cancelled() => {}
        Ok(Err(e)) => tracing::error!(target: "monitor", "{name} task failed: {e}"),
        Err(_) => {
            tracing::warn!(target: "monitor", "{name} task did not stop within timeout, aborting");
            handle.abort();
        }
    }
}

impl Inner {
    fn loop_running(&self, kind: LoopKind) -> bool {
        match kind {
            LoopKind::Team | LoopKind::Users => self.event_running.load(Ordering::Acquire),
            LoopKind::News => self.news_running.load(Ordering::Acquire),
        }
    }

    async fn run_loop(&self, kind: LoopKind, interval: Duration, token: CancellationToken) {
        let name = kind.as_str();
        loop {
            if token.is_cancelled() || !self.loop_running(kind) {
                break;
            }
            if kind == LoopKind::Team && self.battle.should_stop() {
                tracing::info!(
                    target: "monitor",
                    "Team monitoring stopped due to no event detection"
                );
                self.halt_for_battle_over();
                break;
            }

            let pause = match self.run_pass(kind).await {
                Ok(()) => interval,
                Err(e) => {
                    counter!("monitor_pass_errors_total", "loop" => name).increment(1);
                    tracing::error!(target: "monitor", "Error in {name} monitor loop: {e:#}");
                    self.config.error_cooldown()
                }
            };

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }
        tracing::info!(target: "monitor", "{name} monitor loop exited");
    }

    async fn run_pass(&self, kind: LoopKind) -> Result<()> {
        let name = kind.as_str();
        counter!("monitor_passes_total", "loop" => name).increment(1);
        let out = match kind {
            LoopKind::Team => self.run_team_pass().await.map(|_| ()),
            LoopKind::Users => self.run_user_pass().await,
            LoopKind::News => self.run_news_pass().await.map(|_| ()),
        };
        gauge!("monitor_last_pass_ts", "loop" => name).set(Utc::now().timestamp() as f64);
        out
    }

    /// Clear the event flag and cancel the event loops. Only a loop that was
    /// actually running counts as halted by the heuristic.
    fn halt_for_battle_over(&self) {
        let was_running = self.event_running.swap(false, Ordering::AcqRel);
        self.event_token.lock().cancel();
        if was_running {
            self.battle.mark_halted();
            counter!("monitor_battle_over_total").increment(1);
            tracing::warn!(
                target: "monitor",
                count = self.battle.consecutive_empty(),
                "battle over: stopping event monitoring"
            );
        }
    }

    async fn emit(&self, event: MonitorEvent) {
        counter!("monitor_events_total", "kind" => event.kind().as_str()).increment(1);
        self.dispatcher.emit(&event).await;
    }

    async fn run_team_pass(&self) -> Result<Vec<TeamStanding>> {
        let observed = self.fetcher.fetch_team_standings().await?;
        if observed.is_empty() {
            if self.battle.record_empty() {
                self.halt_for_battle_over();
            }
            return Ok(Vec::new());
        }
        self.battle.record_observation();

        let mut recorded = Vec::with_capacity(observed.len());
        for standing in &observed {
            if let Some(stored) = detect::record_standing(self.store.as_ref(), standing)? {
                self.emit(MonitorEvent::TeamStandingUpdate(stored.clone())).await;
                recorded.push(stored);
            }
        }
        Ok(recorded)
    }

    /// Every configured user, attacks then defenses. A failure for one user
    /// does not skip the others; the first error is returned at the end.
    async fn run_user_pass(&self) -> Result<()> {
        let mut first_err: Option<anyhow::Error> = None;
        for user in &self.users {
            tracing::info!(target: "monitor", user = %user, "Fetching activity for user");
            for kind in [ItemKind::Attack, ItemKind::Defense] {
                if let Err(e) = self.run_items_pass(kind, user).await {
                    tracing::error!(
                        target: "monitor",
                        user = %user,
                        kind = kind.as_str(),
                        "Error fetching {} for {user}: {e:#}",
                        kind.as_str()
                    );
                    first_err.get_or_insert(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e.context("user activity pass had failures")),
            None => Ok(()),
        }
    }

    async fn run_items_pass(&self, kind: ItemKind, user: &str) -> Result<Vec<ObservedItem>> {
        let observed = self.fetcher.fetch_items(kind, user).await?;
        if observed.is_empty() {
            return Ok(Vec::new());
        }
        let fresh = detect::record_items(self.store.as_ref(), kind, user, &observed)?;
        for item in &fresh {
            let event = match kind {
                ItemKind::Attack => MonitorEvent::NewAttack(item.clone()),
                ItemKind::Defense => MonitorEvent::NewDefense(item.clone()),
            };
            self.emit(event).await;
        }
        Ok(fresh)
    }

    async fn run_news_pass(&self) -> Result<Vec<NewsOutcome>> {
        let posts = self.fetcher.fetch_news_posts().await?;
        if posts.is_empty() {
            tracing::warn!(target: "monitor", "No news posts found. Did the upstream page change?");
            return Ok(Vec::new());
        }

        let outcomes = detect::reconcile_news(self.store.as_ref(), &posts, Utc::now())?;
        let (mut new, mut revised) = (0usize, 0usize);
        for outcome in &outcomes {
            match outcome {
                NewsOutcome::New(post) => {
                    new += 1;
                    tracing::info!(target: "monitor", news_id = post.id, "New news post found");
                    self.emit(MonitorEvent::NewNews(post.clone())).await;
                }
                NewsOutcome::Revised {
                    prior,
                    current,
                    revision_number,
                    ..
                } => {
                    revised += 1;
                    tracing::info!(
                        target: "monitor",
                        news_id = current.id,
                        revision_number,
                        "News post was revised"
                    );
                    self.emit(MonitorEvent::PostRevised(PostRevision {
                        old_post: prior.clone(),
                        new_post: current.clone(),
                        revision_number: *revision_number,
                    }))
                    .await;
                }
                NewsOutcome::Unchanged(_) => {}
            }
        }
        tracing::debug!(target: "monitor", checked = posts.len(), new, revised, "news pass done");
        Ok(outcomes)
    }
}
