//! Typed telemetry records.
//!
//! Every line from the emulator is a JSON object with a `type` (or legacy
//! `event_type`) discriminator. Known types get a typed payload; anything
//! else is kept as a snapshot so periodic state still refreshes the party.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Why a telemetry line was dropped.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("line is not valid UTF-8")]
    InvalidUtf8,

    #[error("line exceeds {limit} bytes")]
    LineTooLong { limit: usize },

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("record is not a JSON object")]
    NotAnObject,

    #[error("record has no type discriminator")]
    MissingType,

    #[error("invalid {kind} payload: {source}")]
    Payload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

/// One party slot as reported by the emulator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartyMember {
    pub species: u32,
    pub level: u32,
    pub current_hp: u32,
    pub max_hp: u32,
}

impl PartyMember {
    pub fn hp_fraction(&self) -> f64 {
        f64::from(self.current_hp) / f64::from(self.max_hp.max(1))
    }
}

/// State carried by every record, used as prompt context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateSnapshot {
    pub party: Vec<PartyMember>,
    pub badge_count: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnemyInfo {
    pub species: u32,
    pub level: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BattleInfo {
    pub is_trainer: bool,
    pub is_double: bool,
    pub is_safari: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BattleStart {
    pub enemy: Option<EnemyInfo>,
    #[serde(rename = "battleInfo")]
    pub battle_info: BattleInfo,
    #[serde(rename = "enemyParty")]
    pub enemy_party: Vec<EnemyInfo>,
    pub party: Vec<PartyMember>,
}

/// One entry of the emulator's per-battle damage log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BattleLogEntry {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "moveId")]
    pub move_id: Option<u32>,
    pub damage: Option<i64>,
    #[serde(rename = "enemyHP")]
    pub enemy_hp: Option<i64>,
    #[serde(rename = "enemyMaxHP")]
    pub enemy_max_hp: Option<i64>,
    pub hp: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BattleEnd {
    pub outcome: u8,
    #[serde(rename = "outcomeName")]
    pub outcome_name: Option<String>,
    pub party: Vec<PartyMember>,
    #[serde(rename = "battleDialogue")]
    pub battle_dialogue: Vec<String>,
    #[serde(rename = "battleLog")]
    pub battle_log: Vec<BattleLogEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LevelUp {
    pub species: u32,
    #[serde(rename = "oldLevel")]
    pub old_level: u32,
    #[serde(rename = "newLevel")]
    pub new_level: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplorationSummary {
    #[serde(rename = "itemsGained")]
    pub items_gained: i64,
    #[serde(rename = "moneyChange")]
    pub money_change: i64,
    #[serde(rename = "dialogueCount")]
    pub dialogue_count: u32,
    #[serde(rename = "dialogueTexts")]
    pub dialogue_texts: Vec<String>,
    #[serde(rename = "levelUps")]
    pub level_ups: Vec<LevelUp>,
    pub trigger: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BadgeObtained {
    pub badge_count: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PokemonCaught {
    pub species: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MoveMastery {
    #[serde(rename = "moveId")]
    pub move_id: u32,
    pub count: u32,
}

/// A decoded telemetry event.
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryEvent {
    Connected,
    BattleStart(BattleStart),
    BattleEnd(BattleEnd),
    ExplorationSummary(ExplorationSummary),
    BadgeObtained(BadgeObtained),
    PartyChanged,
    PokemonCaught(PokemonCaught),
    MoveMastery(MoveMastery),
    /// Periodic state or any type this daemon does not act on.
    Snapshot { kind: String },
}

impl TelemetryEvent {
    pub fn kind(&self) -> &str {
        match self {
            TelemetryEvent::Connected => "connected",
            TelemetryEvent::BattleStart(_) => "battle_start",
            TelemetryEvent::BattleEnd(_) => "battle_end",
            TelemetryEvent::ExplorationSummary(_) => "exploration_summary",
            TelemetryEvent::BadgeObtained(_) => "badge_obtained",
            TelemetryEvent::PartyChanged => "party_changed",
            TelemetryEvent::PokemonCaught(_) => "pokemon_caught",
            TelemetryEvent::MoveMastery(_) => "move_mastery",
            TelemetryEvent::Snapshot { kind } => kind,
        }
    }
}

/// A decoded line: the typed event plus the state it carried.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryRecord {
    pub event: TelemetryEvent,
    pub snapshot: StateSnapshot,
}

fn payload<'a, T: Deserialize<'a>>(kind: &str, value: &'a Value) -> Result<T, DecodeError> {
    T::deserialize(value).map_err(|source| DecodeError::Payload {
        kind: kind.to_string(),
        source,
    })
}

/// Decode one telemetry line.
pub fn decode_line(line: &str) -> Result<TelemetryRecord, DecodeError> {
    let value: Value = serde_json::from_str(line)?;
    let object = value.as_object().ok_or(DecodeError::NotAnObject)?;
    let kind = object
        .get("type")
        .or_else(|| object.get("event_type"))
        .and_then(Value::as_str)
        .ok_or(DecodeError::MissingType)?;

    let event = match kind {
        "connected" => TelemetryEvent::Connected,
        "battle_start" => TelemetryEvent::BattleStart(payload(kind, &value)?),
        "battle_end" => TelemetryEvent::BattleEnd(payload(kind, &value)?),
        "exploration_summary" => TelemetryEvent::ExplorationSummary(payload(kind, &value)?),
        "badge_obtained" => TelemetryEvent::BadgeObtained(payload(kind, &value)?),
        "party_changed" => TelemetryEvent::PartyChanged,
        "pokemon_caught" => TelemetryEvent::PokemonCaught(payload(kind, &value)?),
        "move_mastery" => TelemetryEvent::MoveMastery(payload(kind, &value)?),
        other => TelemetryEvent::Snapshot {
            kind: other.to_string(),
        },
    };
    let snapshot = payload(kind, &value)?;

    Ok(TelemetryRecord { event, snapshot })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_battle_start() {
        let record = decode_line(
            r#"{"type":"battle_start","enemy":{"species":19,"level":12},
                "battleInfo":{"is_trainer":false},
                "party":[{"species":255,"level":14,"current_hp":40,"max_hp":42}]}"#,
        )
        .unwrap();

        let TelemetryEvent::BattleStart(start) = &record.event else {
            panic!("expected battle_start, got {:?}", record.event);
        };
        assert_eq!(start.enemy, Some(EnemyInfo { species: 19, level: 12 }));
        assert!(!start.battle_info.is_trainer);
        assert_eq!(record.snapshot.party.len(), 1);
        assert_eq!(record.snapshot.party[0].current_hp, 40);
    }

    #[test]
    fn test_legacy_event_type_field() {
        let record = decode_line(r#"{"event_type":"badge_obtained","badge_count":3}"#).unwrap();
        assert_eq!(
            record.event,
            TelemetryEvent::BadgeObtained(BadgeObtained { badge_count: Some(3) })
        );
        assert_eq!(record.snapshot.badge_count, Some(3));
    }

    #[test]
    fn test_unknown_type_is_snapshot() {
        let record = decode_line(r#"{"type":"state","party":[]}"#).unwrap();
        assert_eq!(record.event.kind(), "state");
    }

    #[test]
    fn test_malformed_lines() {
        assert!(matches!(decode_line("{not json"), Err(DecodeError::Json(_))));
        assert!(matches!(decode_line("[1,2]"), Err(DecodeError::NotAnObject)));
        assert!(matches!(decode_line(r#"{"party":[]}"#), Err(DecodeError::MissingType)));
        assert!(matches!(
            decode_line(r#"{"type":"battle_end","outcome":"won"}"#),
            Err(DecodeError::Payload { .. })
        ));
    }

    #[test]
    fn test_hp_fraction_guards_zero_max() {
        let member = PartyMember {
            species: 1,
            level: 5,
            current_hp: 0,
            max_hp: 0,
        };
        assert_eq!(member.hp_fraction(), 0.0);
    }
}
