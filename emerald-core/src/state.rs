//! Session state shared by the control loop and the dispatch worker.

use crate::battle::{BattleOutcome, BattleSummary};
use crate::gate::SkippedEvents;
use crate::persist::{HistoryEntry, SessionHistory};
use crate::reward::RewardTracker;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Battles kept for the "Recent" line.
pub const BATTLE_HISTORY: usize = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionStats {
    pub battles_won: u32,
    pub pokemon_caught: u32,
    pub close_calls: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BattleRecord {
    pub enemy: String,
    pub outcome: String,
    pub hp_after: u32,
    pub close_call: bool,
}

/// Everything the prompt builder reads and the feedback loop writes.
#[derive(Debug)]
pub struct GmState {
    pub session_id: String,
    pub session_start: DateTime<Utc>,
    pub stats: SessionStats,
    pub battles: VecDeque<BattleRecord>,
    pub skipped: SkippedEvents,
    pub rewards: RewardTracker,
    /// Highest reported use count per move id.
    pub mastery: HashMap<u32, u32>,
    /// `None` unless persistence is enabled.
    pub history: Option<SessionHistory>,
}

pub type SharedState = Arc<Mutex<GmState>>;

impl GmState {
    pub fn new(session_id: impl Into<String>, session_start: DateTime<Utc>) -> Self {
        Self {
            session_id: session_id.into(),
            session_start,
            stats: SessionStats::default(),
            battles: VecDeque::with_capacity(BATTLE_HISTORY),
            skipped: SkippedEvents::default(),
            rewards: RewardTracker::default(),
            mastery: HashMap::new(),
            history: None,
        }
    }

    pub fn shared(self) -> SharedState {
        Arc::new(Mutex::new(self))
    }

    /// Fold a finished battle into the counters and recent history.
    pub fn record_battle(&mut self, summary: &BattleSummary) {
        let closing = &summary.closing;
        if closing.outcome == BattleOutcome::Won {
            self.stats.battles_won += 1;
            if closing.close_call {
                self.stats.close_calls += 1;
            }
        }
        if summary.caught.is_some() {
            self.stats.pokemon_caught += 1;
        }

        if self.battles.len() == BATTLE_HISTORY {
            self.battles.pop_front();
        }
        self.battles.push_back(BattleRecord {
            enemy: summary.opening.enemy.clone(),
            outcome: closing.outcome_name.clone(),
            hp_after: closing.hp_percent(),
            close_call: closing.close_call,
        });
    }

    pub fn record_catch(&mut self) {
        self.stats.pokemon_caught += 1;
    }

    /// Returns false when `count` is not above the last reported count.
    pub fn record_mastery(&mut self, move_id: u32, count: u32) -> bool {
        let seen = self.mastery.entry(move_id).or_insert(0);
        if count <= *seen {
            return false;
        }
        *seen = count;
        true
    }

    pub fn record_history(&mut self, entry: HistoryEntry) {
        if let Some(history) = self.history.as_mut() {
            history.push(entry);
        }
    }

    pub fn minutes_elapsed(&self, now: DateTime<Utc>) -> i64 {
        (now - self.session_start).num_minutes().max(0)
    }
}
