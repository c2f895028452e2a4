//! Built-in event handlers.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::config::TeamNames;
use crate::detect::normalized_content;
use crate::dispatch::{EventHandler, MonitorEvent, PostRevision};
use crate::model::TeamStanding;
use crate::storage::Store;

/// Logs every event kind.
pub struct LoggingHandler {
    teams: Option<TeamNames>,
}

impl LoggingHandler {
    pub fn new(teams: Option<TeamNames>) -> Self {
        Self { teams }
    }

    fn leader_name(&self, standing: &TeamStanding) -> String {
        match (&self.teams, standing.team1_leads()) {
            (Some(t), true) => t.team1.clone(),
            (Some(t), false) => t.team2.clone(),
            (None, true) => "Team 1".to_string(),
            (None, false) => "Team 2".to_string(),
        }
    }

    fn log_revision(&self, rev: &PostRevision) {
        let (old, new) = (&rev.old_post, &rev.new_post);
        tracing::info!(
            target: "events",
            news_id = new.id,
            revision = rev.revision_number,
            "News post revised: {}",
            new.title
        );
        if old.title != new.title {
            tracing::info!(target: "events", "  Title changed: '{}' -> '{}'", old.title, new.title);
        }
        let before = normalized_content(old.content.as_deref());
        let after = normalized_content(new.content.as_deref());
        if before != after {
            tracing::info!(
                target: "events",
                "  Content changed: {} -> {} chars",
                before.chars().count(),
                after.chars().count()
            );
        }
        if old.edited_by != new.edited_by || old.edited_at != new.edited_at {
            tracing::info!(
                target: "events",
                "  Edit metadata changed: {:?} @ {:?} -> {:?} @ {:?}",
                old.edited_by,
                old.edited_at,
                new.edited_by,
                new.edited_at
            );
        }
    }
}

#[async_trait::async_trait]
impl EventHandler for LoggingHandler {
    async fn handle(&self, event: &MonitorEvent) -> Result<()> {
        match event {
            MonitorEvent::NewAttack(a) => tracing::info!(
                target: "events",
                id = %a.id,
                "New attack detected: {} by {}",
                a.title,
                a.attacker
            ),
            MonitorEvent::NewDefense(d) => tracing::info!(
                target: "events",
                id = %d.id,
                "New defense detected: {} by {}",
                d.title,
                d.attacker
            ),
            MonitorEvent::TeamStandingUpdate(s) if s.leader_change => tracing::info!(
                target: "events",
                "Leader change detected: {} is now leading at {:.2}%",
                self.leader_name(s),
                s.team1_percentage.max(s.team2_percentage())
            ),
            MonitorEvent::TeamStandingUpdate(s) => tracing::debug!(
                target: "events",
                "Team standing update: {:.2}% vs {:.2}%",
                s.team1_percentage,
                s.team2_percentage()
            ),
            MonitorEvent::NewNews(n) => tracing::info!(
                target: "events",
                news_id = n.id,
                "New news post detected: {}",
                n.title
            ),
            MonitorEvent::PostRevised(rev) => self.log_revision(rev),
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "logging"
    }
}

/// Forwards a standing update only when it is externally notable: a leader
/// change, or the first stored standing of its UTC calendar day. Every other
/// event kind passes straight through.
pub struct NotableStandingFilter {
    store: Arc<dyn Store>,
    inner: Arc<dyn EventHandler>,
}

impl NotableStandingFilter {
    pub fn new(store: Arc<dyn Store>, inner: Arc<dyn EventHandler>) -> Self {
        Self { store, inner }
    }

    pub fn is_notable(&self, standing: &TeamStanding) -> Result<bool> {
        if standing.leader_change {
            return Ok(true);
        }
        let history = self.store.team_standings_history()?;
        Ok(is_first_of_day(&history, standing.fetched_at))
    }
}

/// `at` is (within a second of) the earliest stored observation of its day.
pub fn is_first_of_day(history: &[TeamStanding], at: DateTime<Utc>) -> bool {
    let day = at.date_naive();
    history
        .iter()
        .filter(|s| s.fetched_at.date_naive() == day)
        .map(|s| s.fetched_at)
        .min()
        .is_some_and(|earliest| (at - earliest).num_milliseconds().abs() < 1000)
}

#[async_trait::async_trait]
impl EventHandler for NotableStandingFilter {
    async fn handle(&self, event: &MonitorEvent) -> Result<()> {
        if let MonitorEvent::TeamStandingUpdate(s) = event {
            if !self.is_notable(s)? {
                tracing::debug!(target: "events", "standing update not notable, skipped");
                return Ok(());
            }
        }
        self.inner.handle(event).await
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 2, h, m, 0).unwrap()
    }

    #[test]
    fn first_of_day_uses_utc_calendar_day() {
        let history = vec![
            TeamStanding::new(51.0, Utc.with_ymd_and_hms(2025, 7, 1, 23, 0, 0).unwrap()),
            TeamStanding::new(51.0, at(0, 30)),
            TeamStanding::new(51.0, at(9, 0)),
        ];
        assert!(is_first_of_day(&history, at(0, 30)));
        assert!(!is_first_of_day(&history, at(9, 0)));
        // nothing stored for that day yet
        assert!(!is_first_of_day(&[], at(9, 0)));
    }
}
