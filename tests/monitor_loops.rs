// tests/monitor_loops.rs
// Polling loops on a paused clock: lifecycle flags, error cooldown and the
// battle-over heuristic.
mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use artfight_monitor::config::UserConfig;
use artfight_monitor::model::{NewsPost, ObservedItem, TeamStanding};
use artfight_monitor::monitor::BATTLE_OVER_THRESHOLD;
use artfight_monitor::{Fetcher, JsonStore, Monitor, MonitorConfig};

use common::{at, post, recorder, standing, ScriptedFetcher};

fn config(battle_over: bool) -> MonitorConfig {
    MonitorConfig {
        users: vec![UserConfig {
            username: "alice".into(),
            enabled: true,
        }],
        team_check_interval_secs: 60,
        request_interval_secs: 60,
        news_check_interval_secs: 60,
        error_cooldown_secs: 10,
        battle_over_detection: battle_over,
        ..MonitorConfig::default()
    }
}

async fn advance(secs: u64) {
    tokio::time::sleep(Duration::from_secs(secs)).await;
}

#[tokio::test(start_paused = true)]
async fn event_and_news_groups_stop_independently() {
    let fetcher = ScriptedFetcher::new();
    let m = Monitor::new(config(false), fetcher.clone(), Arc::new(JsonStore::in_memory()));
    assert!(!m.is_running());

    m.start().await;
    assert!(m.is_event_monitoring_running());
    assert!(m.is_news_running());

    m.stop_event_monitoring().await;
    assert!(!m.is_event_monitoring_running());
    assert!(m.is_news_running());
    assert!(m.is_running());

    let news_before = fetcher.news_calls();
    advance(130).await;
    assert!(fetcher.news_calls() > news_before);

    m.stop_news_monitoring().await;
    let stats = m.stats();
    assert!(!stats.running);
    assert!(!stats.event_monitoring_running);
    assert!(!stats.news_running);

    // restart only news
    m.start_news_monitoring().await;
    assert!(m.is_news_running());
    assert!(!m.is_event_monitoring_running());

    m.stop().await;
    assert!(!m.is_running());
    assert_eq!(fetcher.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn starting_twice_is_a_noop() {
    let fetcher = ScriptedFetcher::new();
    let m = Monitor::new(config(false), fetcher.clone(), Arc::new(JsonStore::in_memory()));
    m.start_event_monitoring().await;
    m.start_event_monitoring().await;
    advance(30).await;
    // one team loop, one pass at t=0
    assert_eq!(fetcher.team_calls(), 1);
    m.stop().await;
}

#[tokio::test(start_paused = true)]
async fn failed_pass_backs_off_and_loop_survives() {
    let fetcher = ScriptedFetcher::new();
    fetcher.push_teams(Err("page layout changed".into()));
    fetcher.push_teams(Ok(vec![standing(60.0, at(0))]));

    let cfg = MonitorConfig {
        users: Vec::new(),
        team_check_interval_secs: 3600,
        error_cooldown_secs: 10,
        monitor_news: false,
        ..MonitorConfig::default()
    };
    let m = Monitor::new(cfg, fetcher.clone(), Arc::new(JsonStore::in_memory()));
    let (handler, seen) = recorder();
    m.dispatcher().register_all(handler);

    m.start().await;
    assert!(!m.is_news_running());
    advance(15).await;

    assert_eq!(fetcher.team_calls(), 2);
    assert!(m.is_event_monitoring_running());
    assert_eq!(seen.lock().len(), 1);
    m.stop().await;
}

#[tokio::test(start_paused = true)]
async fn battle_over_halts_event_loops_but_not_news() {
    let fetcher = ScriptedFetcher::new();
    for _ in 0..BATTLE_OVER_THRESHOLD {
        fetcher.push_teams(Ok(Vec::new()));
    }
    fetcher.push_teams(Ok(vec![standing(50.5, at(0))]));
    fetcher.push_news(Ok(vec![post(1, "Welcome", None, at(0))]));

    let m = Monitor::new(config(true), fetcher.clone(), Arc::new(JsonStore::in_memory()));
    m.start().await;

    // empty observations at t=0, 60 and 120
    advance(150).await;
    assert!(!m.is_event_monitoring_running());
    assert!(m.is_news_running());
    let stats = m.stats();
    assert!(stats.battle_over.stopped);
    assert_eq!(stats.battle_over.consecutive_count, BATTLE_OVER_THRESHOLD);
    assert_eq!(fetcher.team_calls(), BATTLE_OVER_THRESHOLD as usize);

    // the users loop shares the group and stays down too
    let attacks = fetcher.attack_calls();
    let news = fetcher.news_calls();
    advance(300).await;
    assert_eq!(fetcher.attack_calls(), attacks);
    assert_eq!(fetcher.team_calls(), BATTLE_OVER_THRESHOLD as usize);
    assert!(fetcher.news_calls() > news);

    assert!(m.reset_battle_over().await);
    assert!(m.is_event_monitoring_running());
    assert_eq!(m.stats().battle_over.consecutive_count, 0);

    advance(5).await;
    assert_eq!(fetcher.team_calls(), BATTLE_OVER_THRESHOLD as usize + 1);
    assert!(!m.stats().battle_over.stopped);
    m.stop().await;
}

#[tokio::test(start_paused = true)]
async fn battle_over_disabled_keeps_polling() {
    let fetcher = ScriptedFetcher::new();
    let m = Monitor::new(config(false), fetcher.clone(), Arc::new(JsonStore::in_memory()));
    m.start_event_monitoring().await;
    advance(60 * 5 + 30).await;

    assert!(m.is_event_monitoring_running());
    assert_eq!(fetcher.team_calls(), 6);
    assert_eq!(m.stats().battle_over.consecutive_count, 0);
    // nothing to restart
    assert!(!m.reset_battle_over().await);
    m.stop().await;
}

/// Upstream that accepts the request and never answers.
struct StalledFetcher;

#[async_trait::async_trait]
impl Fetcher for StalledFetcher {
    async fn fetch_attacks(&self, _user: &str) -> Result<Vec<ObservedItem>> {
        std::future::pending().await
    }

    async fn fetch_defenses(&self, _user: &str) -> Result<Vec<ObservedItem>> {
        std::future::pending().await
    }

    async fn fetch_team_standings(&self) -> Result<Vec<TeamStanding>> {
        std::future::pending().await
    }

    async fn fetch_news_posts(&self) -> Result<Vec<NewsPost>> {
        std::future::pending().await
    }

    fn name(&self) -> &'static str {
        "stalled"
    }
}

#[tokio::test(start_paused = true)]
async fn stuck_passes_are_aborted_after_shutdown_timeout() {
    let cfg = MonitorConfig {
        shutdown_timeout_secs: 5,
        ..MonitorConfig::default()
    };
    let m = Monitor::new(cfg, Arc::new(StalledFetcher), Arc::new(JsonStore::in_memory()));
    m.start().await;
    // let both loops enter their pass
    advance(1).await;
    assert!(m.is_event_monitoring_running());
    assert!(m.is_news_running());

    let began = tokio::time::Instant::now();
    m.stop().await;
    let waited = began.elapsed();

    // one bounded wait per loop group, then abort
    assert!(waited >= Duration::from_secs(10), "stopped after {waited:?}");
    assert!(waited < Duration::from_secs(11), "stopped after {waited:?}");
    let stats = m.stats();
    assert!(!stats.running);
    assert!(!stats.event_monitoring_running);
    assert!(!stats.news_running);
}
