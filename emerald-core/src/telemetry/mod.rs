//! Emulator telemetry: record types and stream framing.

mod codec;
mod event;

pub use codec::TelemetryCodec;
pub use event::{
    decode_line, BadgeObtained, BattleEnd, BattleInfo, BattleLogEntry, BattleStart, DecodeError,
    EnemyInfo, ExplorationSummary, LevelUp, MoveMastery, PartyMember, PokemonCaught, StateSnapshot,
    TelemetryEvent, TelemetryRecord,
};
