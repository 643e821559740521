//! Control-loop side of the pipeline.
//!
//! [`Gateway::handle`] takes one decoded record, updates battle tracking,
//! and either parks the resulting event as skipped or hands it to the
//! dispatch queue. It never blocks on the agent.

use crate::battle::BattleTracker;
use crate::dispatch::{DispatchClosed, DispatchQueue};
use crate::gate::{Admission, DispatchRequest, Gate, GmEvent, SkippedEvent};
use crate::names::{move_name, SpeciesNames};
use crate::prompt::format_party;
use crate::state::SharedState;
use crate::telemetry::{ExplorationSummary, StateSnapshot, TelemetryEvent, TelemetryRecord};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Minimum spacing between party log lines.
pub const PARTY_LOG_INTERVAL_SECS: i64 = 30;

/// What happened to a record.
#[derive(Debug, Clone, PartialEq)]
pub enum Handled {
    /// Tracked or logged only.
    Ignored,
    Suppressed { event_type: String, score: f64 },
    /// Admitted; `ahead` requests were queued or in flight before it.
    Queued { event_type: String, score: f64, ahead: usize },
    /// Admitted, but the dispatch worker is gone.
    Dropped { event_type: String },
}

/// `+2 items │ $-300 │ 3 NPCs │ Torchic L15→L16`; empty when nothing happened.
pub fn exploration_summary(detail: &ExplorationSummary, names: &SpeciesNames) -> String {
    let mut parts = Vec::new();
    if detail.items_gained > 0 {
        parts.push(format!("+{} items", detail.items_gained));
    }
    if detail.money_change != 0 {
        let sign = if detail.money_change > 0 { "+" } else { "" };
        parts.push(format!("${sign}{}", detail.money_change));
    }
    if detail.dialogue_count > 0 {
        parts.push(format!("{} NPCs", detail.dialogue_count));
    }
    for level in &detail.level_ups {
        parts.push(format!(
            "{} L{}→L{}",
            names.name(level.species),
            level.old_level,
            level.new_level
        ));
    }
    parts.join(" │ ")
}

pub struct Gateway {
    tracker: BattleTracker,
    gate: Gate,
    state: SharedState,
    queue: DispatchQueue,
    names: Arc<SpeciesNames>,
    last_party_log: Option<DateTime<Utc>>,
}

impl Gateway {
    pub fn new(
        gate: Gate,
        state: SharedState,
        queue: DispatchQueue,
        names: Arc<SpeciesNames>,
    ) -> Self {
        Self {
            tracker: BattleTracker::new(names.clone()),
            gate,
            state,
            queue,
            names,
            last_party_log: None,
        }
    }

    pub fn in_battle(&self) -> bool {
        self.tracker.in_battle()
    }

    pub fn handle(&mut self, record: TelemetryRecord, now: DateTime<Utc>) -> Handled {
        let TelemetryRecord { event, snapshot } = record;
        match event {
            TelemetryEvent::Connected => {
                info!("Game connected");
                Handled::Ignored
            }
            TelemetryEvent::BattleStart(start) => {
                let opening = self.tracker.start(&start, now);
                info!(kind = %opening.kind, enemy = %opening.enemy, "BATTLE");
                Handled::Ignored
            }
            TelemetryEvent::BattleEnd(end) => {
                let Some(summary) = self.tracker.end(&end, now) else {
                    return Handled::Ignored;
                };
                self.state.lock().record_battle(&summary);
                info!(
                    enemy = %summary.opening.enemy,
                    outcome = %summary.closing.outcome_name,
                    hp = summary.closing.hp_percent(),
                    close_call = summary.closing.close_call,
                    "BATTLE END"
                );
                self.offer(GmEvent::Battle(Box::new(summary)), snapshot, now)
            }
            TelemetryEvent::PokemonCaught(caught) => {
                if self.tracker.record_catch(caught.species) {
                    debug!(species = caught.species, "catch folded into open battle");
                    return Handled::Ignored;
                }
                self.state.lock().record_catch();
                let pokemon = self.names.name(caught.species);
                info!(%pokemon, "CAUGHT");
                self.offer(
                    GmEvent::PokemonCaught {
                        species: caught.species,
                        pokemon,
                    },
                    snapshot,
                    now,
                )
            }
            TelemetryEvent::MoveMastery(mastery) => {
                if !self.state.lock().record_mastery(mastery.move_id, mastery.count) {
                    debug!(
                        move_id = mastery.move_id,
                        count = mastery.count,
                        "repeated mastery report"
                    );
                    return Handled::Ignored;
                }
                let name = move_name(mastery.move_id);
                info!(move_name = %name, count = mastery.count, "MASTERY");
                self.offer(
                    GmEvent::MoveMastery {
                        move_id: mastery.move_id,
                        move_name: name,
                        count: mastery.count,
                    },
                    snapshot,
                    now,
                )
            }
            TelemetryEvent::ExplorationSummary(detail) => {
                let summary = exploration_summary(&detail, &self.names);
                if summary.is_empty() {
                    return Handled::Ignored;
                }
                info!(%summary, "EXPLORE");
                self.offer(GmEvent::Exploration { summary, detail }, snapshot, now)
            }
            TelemetryEvent::BadgeObtained(badge) => {
                let badge_count = badge.badge_count.or(snapshot.badge_count);
                info!(?badge_count, "BADGE OBTAINED");
                self.offer(GmEvent::BadgeObtained { badge_count }, snapshot, now)
            }
            TelemetryEvent::PartyChanged => {
                let due = self
                    .last_party_log
                    .map_or(true, |t| now - t >= Duration::seconds(PARTY_LOG_INTERVAL_SECS));
                if due {
                    self.last_party_log = Some(now);
                    info!(party = %format_party(&snapshot.party, &self.names), "PARTY");
                }
                Handled::Ignored
            }
            TelemetryEvent::Snapshot { .. } => Handled::Ignored,
        }
    }

    fn offer(&mut self, event: GmEvent, snapshot: StateSnapshot, now: DateTime<Utc>) -> Handled {
        let event_type = event.event_type().to_string();
        match self.gate.admit(&event) {
            Admission::Suppressed(score) => {
                debug!(event = %event_type, score, "below threshold, skipped");
                self.state.lock().skipped.push(SkippedEvent {
                    event_type: event_type.clone(),
                    at: now,
                    summary: event.summary(),
                });
                Handled::Suppressed { event_type, score }
            }
            Admission::Admitted(score) => {
                let request = DispatchRequest {
                    event,
                    snapshot,
                    score,
                    observed_at: now,
                };
                match self.queue.submit(request) {
                    Ok(ahead) => {
                        if ahead > 0 {
                            info!(event = %event_type, ahead, "agent busy, queued");
                        }
                        Handled::Queued {
                            event_type,
                            score,
                            ahead,
                        }
                    }
                    Err(DispatchClosed) => {
                        warn!(event = %event_type, "dispatch worker stopped, dropping event");
                        Handled::Dropped { event_type }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::GmState;
    use crate::telemetry::{decode_line, LevelUp};

    fn gateway(threshold: f64) -> (Gateway, crate::dispatch::DispatchReceiver, SharedState) {
        let (queue, rx) = DispatchQueue::channel();
        let state = GmState::new("gm-test", Utc::now()).shared();
        let gateway = Gateway::new(
            Gate::new(threshold),
            state.clone(),
            queue,
            Arc::new(SpeciesNames::new()),
        );
        (gateway, rx, state)
    }

    fn feed(gateway: &mut Gateway, line: &str, now: DateTime<Utc>) -> Handled {
        gateway.handle(decode_line(line).unwrap(), now)
    }

    #[test]
    fn test_exploration_summary_format() {
        let mut names = SpeciesNames::new();
        names.insert(255, "Torchic");
        let detail = ExplorationSummary {
            items_gained: 2,
            money_change: 500,
            dialogue_count: 3,
            level_ups: vec![LevelUp {
                species: 255,
                old_level: 15,
                new_level: 16,
            }],
            ..Default::default()
        };
        assert_eq!(
            exploration_summary(&detail, &names),
            "+2 items │ $+500 │ 3 NPCs │ Torchic L15→L16"
        );
        assert_eq!(exploration_summary(&ExplorationSummary::default(), &names), "");
    }

    #[test]
    fn test_wild_battle_is_skipped_at_default_threshold() {
        let (mut gateway, _rx, state) = gateway(0.25);
        let now = Utc::now();
        feed(
            &mut gateway,
            r#"{"type":"battle_start","enemy":{"species":19,"level":3},"party":[{"species":255,"level":5,"current_hp":20,"max_hp":20}]}"#,
            now,
        );
        assert!(gateway.in_battle());
        let handled = feed(
            &mut gateway,
            r#"{"type":"battle_end","outcome":1,"party":[{"species":255,"level":5,"current_hp":18,"max_hp":20}]}"#,
            now,
        );
        assert!(matches!(handled, Handled::Suppressed { score, .. } if score == 0.2));

        let state = state.lock();
        assert_eq!(state.stats.battles_won, 1);
        assert_eq!(state.skipped.len(), 1);
    }

    #[test]
    fn test_catch_outside_battle_dispatches() {
        let (mut gateway, _rx, state) = gateway(0.15);
        let handled = feed(&mut gateway, r#"{"type":"pokemon_caught","species":25}"#, Utc::now());
        assert_eq!(
            handled,
            Handled::Queued {
                event_type: "POKEMON_CAUGHT".to_string(),
                score: 0.5,
                ahead: 0
            }
        );
        assert_eq!(state.lock().stats.pokemon_caught, 1);
    }

    #[test]
    fn test_catch_in_battle_is_folded() {
        let (mut gateway, _rx, state) = gateway(0.15);
        let now = Utc::now();
        feed(&mut gateway, r#"{"type":"battle_start","enemy":{"species":25,"level":4}}"#, now);
        assert_eq!(
            feed(&mut gateway, r#"{"type":"pokemon_caught","species":25}"#, now),
            Handled::Ignored
        );
        let handled = feed(&mut gateway, r#"{"type":"battle_end","outcome":7}"#, now);
        assert!(matches!(handled, Handled::Queued { .. }));
        assert_eq!(state.lock().stats.pokemon_caught, 1);
    }

    #[test]
    fn test_repeated_mastery_is_ignored() {
        let (mut gateway, _rx, state) = gateway(0.15);
        let now = Utc::now();
        let line = r#"{"type":"move_mastery","moveId":33,"count":50}"#;
        assert!(matches!(feed(&mut gateway, line, now), Handled::Queued { .. }));
        assert_eq!(feed(&mut gateway, line, now), Handled::Ignored);
        let next = r#"{"type":"move_mastery","moveId":33,"count":100}"#;
        assert!(matches!(feed(&mut gateway, next, now), Handled::Queued { .. }));
        assert_eq!(state.lock().mastery.get(&33), Some(&100));
    }

    #[test]
    fn test_party_changed_never_dispatches() {
        let (mut gateway, _rx, _state) = gateway(0.0);
        let now = Utc::now();
        for i in 0..3 {
            let handled = feed(
                &mut gateway,
                r#"{"type":"party_changed","party":[]}"#,
                now + Duration::seconds(i * 40),
            );
            assert_eq!(handled, Handled::Ignored);
        }
    }

    #[test]
    fn test_dropped_when_worker_gone() {
        let (mut gateway, rx, _state) = gateway(0.15);
        drop(rx);
        let handled = feed(
            &mut gateway,
            r#"{"type":"badge_obtained","badge_count":1}"#,
            Utc::now(),
        );
        assert_eq!(
            handled,
            Handled::Dropped {
                event_type: "BADGE_OBTAINED".to_string()
            }
        );
    }
}
