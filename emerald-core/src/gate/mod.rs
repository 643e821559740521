//! Significance scoring and admission.
//!
//! Every candidate event gets a score in `[0, 1]`. Events scoring at or above
//! the configured threshold are admitted for dispatch; the rest are parked in
//! [`SkippedEvents`] and summarised in the next prompt.

mod skipped;

pub use skipped::{SkippedEvent, SkippedEvents, SKIPPED_CAPACITY};

use crate::battle::BattleSummary;
use crate::telemetry::{ExplorationSummary, StateSnapshot};
use chrono::{DateTime, Utc};

/// Keywords that make an exploration summary interesting.
pub const EXPLORATION_KEYWORDS: &[&str] = &["rare", "caught"];

/// A dispatchable game event.
#[derive(Debug, Clone, PartialEq)]
pub enum GmEvent {
    Battle(Box<BattleSummary>),
    Exploration {
        summary: String,
        detail: ExplorationSummary,
    },
    BadgeObtained {
        badge_count: Option<u32>,
    },
    PokemonCaught {
        species: u32,
        pokemon: String,
    },
    MoveMastery {
        move_id: u32,
        move_name: String,
        count: u32,
    },
    Other {
        kind: String,
    },
}

impl GmEvent {
    pub fn event_type(&self) -> &str {
        match self {
            GmEvent::Battle(_) => "BATTLE_SUMMARY",
            GmEvent::Exploration { .. } => "EXPLORATION_SUMMARY",
            GmEvent::BadgeObtained { .. } => "BADGE_OBTAINED",
            GmEvent::PokemonCaught { .. } => "POKEMON_CAUGHT",
            GmEvent::MoveMastery { .. } => "MOVE_MASTERY",
            GmEvent::Other { kind } => kind,
        }
    }

    /// One-line description for the skipped-events digest.
    pub fn summary(&self) -> String {
        match self {
            GmEvent::Battle(battle) => {
                let kind = if battle.opening.kind.trainer {
                    "Trainer"
                } else {
                    "Wild"
                };
                format!("{kind} battle vs {}", battle.opening.enemy)
            }
            GmEvent::Exploration { summary, .. } => summary.chars().take(100).collect(),
            GmEvent::BadgeObtained { badge_count } => match badge_count {
                Some(count) => format!("Badge obtained ({count} total)"),
                None => "Badge obtained".to_string(),
            },
            GmEvent::PokemonCaught { pokemon, .. } => format!("Caught {pokemon}"),
            GmEvent::MoveMastery {
                move_name, count, ..
            } => format!("{move_name} used {count} times"),
            GmEvent::Other { kind } => kind.clone(),
        }
    }
}

/// Deterministic significance score in `[0, 1]`.
pub fn score(event: &GmEvent) -> f64 {
    match event {
        GmEvent::BadgeObtained { .. } => 1.0,
        GmEvent::Battle(battle) => {
            let kind = battle.opening.kind;
            let close = battle.closing.close_call;
            match (kind.rematch, kind.trainer, close) {
                (true, _, _) => 1.0,
                (false, true, true) => 0.9,
                (false, true, false) => 0.7,
                (false, false, true) => 0.5,
                (false, false, false) => 0.2,
            }
        }
        GmEvent::Exploration { summary, .. } => {
            let lower = summary.to_lowercase();
            if EXPLORATION_KEYWORDS.iter().any(|k| lower.contains(k)) {
                0.8
            } else {
                0.3
            }
        }
        _ => 0.5,
    }
}

/// An admitted event with the state it was observed in.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchRequest {
    pub event: GmEvent,
    pub snapshot: StateSnapshot,
    pub score: f64,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Admission {
    Admitted(f64),
    Suppressed(f64),
}

impl Admission {
    pub fn score(&self) -> f64 {
        match self {
            Admission::Admitted(score) | Admission::Suppressed(score) => *score,
        }
    }

    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted(_))
    }
}

/// Threshold gate.
#[derive(Debug, Clone, Copy)]
pub struct Gate {
    threshold: f64,
}

impl Gate {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn admit(&self, event: &GmEvent) -> Admission {
        let score = score(event);
        if score >= self.threshold {
            Admission::Admitted(score)
        } else {
            Admission::Suppressed(score)
        }
    }
}
