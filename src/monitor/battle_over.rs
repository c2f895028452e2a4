// src/monitor/battle_over.rs
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use serde::Serialize;

/// Consecutive empty team observations before the event is considered over.
pub const BATTLE_OVER_THRESHOLD: u32 = 3;

/// Concludes the event has ended after repeated empty team-standing fetches.
/// - Only the team pass writes the counter; stats and reset only read/zero it.
/// - Disabled instances never count and never trip.
/// - `halted` remembers that the event loop was stopped by this heuristic,
///   which is what allows a manual reset to restart it.
#[derive(Debug, Default)]
pub struct BattleOver {
    enabled: bool,
    consecutive_empty: AtomicU32,
    halted: AtomicBool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BattleOverStatus {
    pub enabled: bool,
    pub consecutive_count: u32,
    pub threshold: u32,
    pub stopped: bool,
}

impl BattleOver {
    pub fn new(enabled: bool) -> Self {
        if enabled {
            tracing::info!(
                target: "monitor",
                threshold = BATTLE_OVER_THRESHOLD,
                "Battle over detection enabled - team checks stop after {BATTLE_OVER_THRESHOLD} \
                 consecutive empty observations"
            );
        }
        Self {
            enabled,
            ..Self::default()
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn consecutive_empty(&self) -> u32 {
        self.consecutive_empty.load(Ordering::Acquire)
    }

    /// Threshold reached; team polling should not continue.
    pub fn should_stop(&self) -> bool {
        self.enabled && self.consecutive_empty() >= BATTLE_OVER_THRESHOLD
    }

    /// Count an empty observation. Returns `true` once the threshold is hit.
    pub fn record_empty(&self) -> bool {
        if !self.enabled {
            return false;
        }
        let n = self.consecutive_empty.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::info!(target: "monitor", "Battle over detection #{n}/{BATTLE_OVER_THRESHOLD}");
        n >= BATTLE_OVER_THRESHOLD
    }

    /// A non-empty observation resets the streak.
    pub fn record_observation(&self) {
        let prev = self.consecutive_empty.swap(0, Ordering::AcqRel);
        if prev > 0 {
            tracing::info!(
                target: "monitor",
                "Resetting battle over detection counter (was {prev})"
            );
        }
    }

    pub fn mark_halted(&self) {
        self.halted.store(true, Ordering::Release);
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    /// Zero the counter and clear the halted mark. Returns whether the loop
    /// had been halted by the heuristic.
    pub fn reset(&self) -> bool {
        let prev = self.consecutive_empty.swap(0, Ordering::AcqRel);
        if prev > 0 {
            tracing::info!(
                target: "monitor",
                "Manually resetting battle over detection counter from {prev}"
            );
        }
        self.halted.swap(false, Ordering::AcqRel)
    }

    pub fn status(&self) -> BattleOverStatus {
        BattleOverStatus {
            enabled: self.enabled,
            consecutive_count: self.consecutive_empty(),
            threshold: BATTLE_OVER_THRESHOLD,
            stopped: self.should_stop() || self.is_halted(),
        }
    }
}
