//! Battle lifecycle tracking.
//!
//! A battle is opened by `battle_start` and closed by the next `battle_end`.
//! While open, the tracker holds the pre-battle party baseline. On close it
//! emits a [`BattleSummary`] with the derived outcome, HP, damage and any
//! catch that happened along the way.

use crate::names::SpeciesNames;
use crate::telemetry::{BattleEnd, BattleLogEntry, BattleStart, PartyMember};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

/// Encounters with the same trainer (species, level) inside this window are rematches.
pub const REMATCH_WINDOW_MINUTES: i64 = 30;

/// Timestamps retained per trainer key.
pub const REMATCH_HISTORY: usize = 10;

/// Average party HP below this fraction on a won battle is a close call.
pub const CLOSE_CALL_HP: f64 = 0.25;

/// Source outcome codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BattleOutcome {
    Unknown,
    Won,
    Lost,
    Drew,
    Ran,
    Caught,
    Other(u8),
}

impl BattleOutcome {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => BattleOutcome::Unknown,
            1 => BattleOutcome::Won,
            2 => BattleOutcome::Lost,
            3 => BattleOutcome::Drew,
            4 => BattleOutcome::Ran,
            7 => BattleOutcome::Caught,
            other => BattleOutcome::Other(other),
        }
    }

    pub fn name(&self) -> String {
        match self {
            BattleOutcome::Unknown => "unknown".to_string(),
            BattleOutcome::Won => "won".to_string(),
            BattleOutcome::Lost => "lost".to_string(),
            BattleOutcome::Drew => "draw".to_string(),
            BattleOutcome::Ran => "ran".to_string(),
            BattleOutcome::Caught => "caught".to_string(),
            BattleOutcome::Other(code) => format!("outcome_{code}"),
        }
    }
}

/// Battle flags, rendered as `TRAINER (DOUBLE) (REMATCH)` etc.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BattleKind {
    pub trainer: bool,
    pub double: bool,
    pub safari: bool,
    pub rematch: bool,
}

impl fmt::Display for BattleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.trainer { "TRAINER" } else { "WILD" })?;
        if self.double {
            f.write_str(" (DOUBLE)")?;
        }
        if self.safari {
            f.write_str(" (SAFARI)")?;
        }
        if self.rematch {
            f.write_str(" (REMATCH)")?;
        }
        Ok(())
    }
}

/// START record.
#[derive(Debug, Clone, PartialEq)]
pub struct BattleOpening {
    pub kind: BattleKind,
    pub enemy_species: u32,
    pub enemy_level: u32,
    /// Display label, e.g. `Rattata L12`.
    pub enemy: String,
    pub enemy_party: Vec<String>,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DamageTaken {
    pub slot: usize,
    pub pokemon: String,
    pub amount: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelChange {
    pub slot: usize,
    pub pokemon: String,
    pub from: u32,
    pub to: u32,
}

/// END record.
#[derive(Debug, Clone, PartialEq)]
pub struct BattleClosing {
    /// Derived outcome. A level increase forces [`BattleOutcome::Won`].
    pub outcome: BattleOutcome,
    pub outcome_name: String,
    /// Outcome code as the emulator reported it.
    pub reported: BattleOutcome,
    pub duration_secs: i64,
    pub avg_hp: f64,
    pub close_call: bool,
    pub damage: Vec<DamageTaken>,
    pub level_changes: Vec<LevelChange>,
}

impl BattleClosing {
    /// Remaining party HP as a whole percentage.
    pub fn hp_percent(&self) -> u32 {
        (self.avg_hp * 100.0) as u32
    }
}

/// CAUGHT record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaughtRecord {
    pub species: u32,
    pub pokemon: String,
}

/// A finished battle, ready for the gate.
#[derive(Debug, Clone, PartialEq)]
pub struct BattleSummary {
    pub opening: BattleOpening,
    pub closing: BattleClosing,
    pub caught: Option<CaughtRecord>,
    pub dialogue: Vec<String>,
    pub log: Vec<BattleLogEntry>,
    pub party: Vec<PartyMember>,
}

/// Trainer encounter history keyed by lead (species, level).
#[derive(Debug, Default)]
pub struct TrainerLedger {
    seen: HashMap<(u32, u32), VecDeque<DateTime<Utc>>>,
}

impl TrainerLedger {
    /// Record an encounter and report whether it is a rematch.
    pub fn record(&mut self, species: u32, level: u32, now: DateTime<Utc>) -> bool {
        let window = Duration::minutes(REMATCH_WINDOW_MINUTES);
        let times = self.seen.entry((species, level)).or_default();
        let rematch = times.iter().any(|t| now - *t < window);
        times.push_back(now);
        while times.len() > REMATCH_HISTORY {
            times.pop_front();
        }
        rematch
    }

    pub fn encounters(&self, species: u32, level: u32) -> usize {
        self.seen.get(&(species, level)).map_or(0, VecDeque::len)
    }
}

#[derive(Debug)]
struct OpenBattle {
    opening: BattleOpening,
    baseline: Vec<PartyMember>,
    caught: Option<CaughtRecord>,
}

#[derive(Debug, Default)]
enum BattleState {
    #[default]
    Idle,
    InBattle(Box<OpenBattle>),
}

/// Tracks at most one open battle.
#[derive(Debug)]
pub struct BattleTracker {
    state: BattleState,
    ledger: TrainerLedger,
    names: Arc<SpeciesNames>,
}

fn average_hp(party: &[PartyMember]) -> f64 {
    if party.is_empty() {
        return 1.0;
    }
    party.iter().map(PartyMember::hp_fraction).sum::<f64>() / party.len() as f64
}

impl BattleTracker {
    pub fn new(names: Arc<SpeciesNames>) -> Self {
        Self {
            state: BattleState::Idle,
            ledger: TrainerLedger::default(),
            names,
        }
    }

    pub fn in_battle(&self) -> bool {
        matches!(self.state, BattleState::InBattle(_))
    }

    pub fn ledger(&self) -> &TrainerLedger {
        &self.ledger
    }

    fn label(&self, species: u32, level: u32) -> String {
        format!("{} L{}", self.names.name(species), level)
    }

    /// Open a battle. An already open battle is replaced.
    pub fn start(&mut self, payload: &BattleStart, now: DateTime<Utc>) -> BattleOpening {
        let enemy = payload.enemy.clone().unwrap_or_default();
        let info = &payload.battle_info;
        let rematch = info.is_trainer && self.ledger.record(enemy.species, enemy.level, now);

        let opening = BattleOpening {
            kind: BattleKind {
                trainer: info.is_trainer,
                double: info.is_double,
                safari: info.is_safari,
                rematch,
            },
            enemy_species: enemy.species,
            enemy_level: enemy.level,
            enemy: self.label(enemy.species, enemy.level),
            enemy_party: payload
                .enemy_party
                .iter()
                .map(|e| self.label(e.species, e.level))
                .collect(),
            started_at: now,
        };

        if let BattleState::InBattle(stale) = &self.state {
            tracing::warn!(enemy = %stale.opening.enemy, "battle_start while in battle, replacing");
        }
        tracing::debug!(kind = %opening.kind, enemy = %opening.enemy, "battle opened");

        self.state = BattleState::InBattle(Box::new(OpenBattle {
            opening: opening.clone(),
            baseline: payload.party.clone(),
            caught: None,
        }));
        opening
    }

    /// Fold a catch into the open battle. Returns false when no battle is open.
    pub fn record_catch(&mut self, species: u32) -> bool {
        let BattleState::InBattle(open) = &mut self.state else {
            return false;
        };
        open.caught = Some(CaughtRecord {
            species,
            pokemon: self.names.name(species),
        });
        true
    }

    /// Close the open battle. A stray end with no open battle yields `None`.
    pub fn end(&mut self, payload: &BattleEnd, now: DateTime<Utc>) -> Option<BattleSummary> {
        let BattleState::InBattle(open) = std::mem::take(&mut self.state) else {
            tracing::debug!("battle_end with no open battle, ignoring");
            return None;
        };
        let OpenBattle {
            opening,
            baseline,
            mut caught,
        } = *open;
        let party = &payload.party;

        let reported = BattleOutcome::from_code(payload.outcome);
        if reported == BattleOutcome::Caught && caught.is_none() {
            // The new catch joins the party in the last slot.
            let species = party
                .last()
                .filter(|_| party.len() > baseline.len())
                .map_or(opening.enemy_species, |m| m.species);
            caught = Some(CaughtRecord {
                species,
                pokemon: self.names.name(species),
            });
        }

        let level_changes: Vec<LevelChange> = party
            .iter()
            .enumerate()
            .filter_map(|(slot, member)| {
                let before = baseline.get(slot)?;
                (member.level > before.level).then(|| LevelChange {
                    slot,
                    pokemon: self.names.name(member.species),
                    from: before.level,
                    to: member.level,
                })
            })
            .collect();

        let damage = party
            .iter()
            .enumerate()
            .filter_map(|(slot, member)| {
                let start = baseline.get(slot).map_or(member.max_hp, |b| b.current_hp);
                (start > member.current_hp).then(|| DamageTaken {
                    slot,
                    pokemon: self.names.name(member.species),
                    amount: start - member.current_hp,
                })
            })
            .collect();

        let (outcome, outcome_name) = if level_changes.is_empty() {
            let name = payload
                .outcome_name
                .clone()
                .unwrap_or_else(|| reported.name());
            (reported, name)
        } else {
            (BattleOutcome::Won, BattleOutcome::Won.name())
        };

        let avg_hp = average_hp(party);
        let closing = BattleClosing {
            outcome,
            outcome_name,
            reported,
            duration_secs: (now - opening.started_at).num_seconds().max(0),
            avg_hp,
            close_call: avg_hp < CLOSE_CALL_HP,
            damage,
            level_changes,
        };

        Some(BattleSummary {
            opening,
            closing,
            caught,
            dialogue: payload.battle_dialogue.clone(),
            log: payload.battle_log.clone(),
            party: party.clone(),
        })
    }
}
