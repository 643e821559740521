//! Prompt assembly.
//!
//! Section order is fixed: header, recent battles, the event section, the
//! skipped-events digest, session history, pending payoffs, the drought
//! directive and the session note. Building a prompt drains the skipped
//! buffer.

use crate::gate::{DispatchRequest, GmEvent};
use crate::names::{move_name, SpeciesNames};
use crate::state::GmState;
use crate::telemetry::{ExplorationSummary, PartyMember};
use chrono::{DateTime, Utc};
use std::sync::Arc;

const RECENT_BATTLES: usize = 3;
const BATTLE_DIALOGUE_LINES: usize = 30;
const DAMAGE_LOG_LINES: usize = 20;
const NPC_LINES: usize = 5;
const NPC_LINE_CHARS: usize = 100;
const HISTORY_RESPONSE_CHARS: usize = 200;
const SESSION_NOTE_MIN_REWARDS: usize = 5;

pub fn party_names(party: &[PartyMember], names: &SpeciesNames) -> Vec<String> {
    party.iter().map(|p| names.name(p.species)).collect()
}

/// `Torchic L14 (40/42), Wingull L9 (28/28)`, or `Empty`.
pub fn format_party(party: &[PartyMember], names: &SpeciesNames) -> String {
    if party.is_empty() {
        return "Empty".to_string();
    }
    party
        .iter()
        .map(|p| {
            format!(
                "{} L{} ({}/{})",
                names.name(p.species),
                p.level,
                p.current_hp,
                p.max_hp
            )
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Mean HP percentage, 100 for an empty party.
pub fn average_hp_percent(party: &[PartyMember]) -> u32 {
    if party.is_empty() {
        return 100;
    }
    let total: f64 = party.iter().map(|p| p.hp_fraction() * 100.0).sum();
    (total / party.len() as f64) as u32
}

fn truncate(text: &str, max: usize) -> (&str, bool) {
    match text.char_indices().nth(max) {
        Some((idx, _)) => (&text[..idx], true),
        None => (text, false),
    }
}

#[derive(Debug, Clone)]
pub struct PromptBuilder {
    names: Arc<SpeciesNames>,
    history_in_prompt: usize,
}

impl PromptBuilder {
    pub fn new(names: Arc<SpeciesNames>, history_in_prompt: usize) -> Self {
        Self {
            names,
            history_in_prompt,
        }
    }

    pub fn build(
        &self,
        request: &DispatchRequest,
        state: &mut GmState,
        payoffs: &[String],
        now: DateTime<Utc>,
    ) -> String {
        let party = &request.snapshot.party;
        let stats = state.stats;
        let mut p = String::new();

        p.push_str(&format!("EVENT: {}\n", request.event.event_type()));
        p.push_str(&format!("Party: {}\n", format_party(party, &self.names)));
        p.push_str(&format!("Party HP: {}% avg\n", average_hp_percent(party)));
        p.push_str(&format!(
            "Session: {} mins | Badges: {}\n",
            state.minutes_elapsed(now),
            request.snapshot.badge_count.unwrap_or(0)
        ));
        p.push_str(&format!(
            "Stats: {} wins, {} caught, {} close calls\n",
            stats.battles_won, stats.pokemon_caught, stats.close_calls
        ));
        p.push_str(&format!(
            "Rewards: {} visible this session | drought={}\n",
            state.rewards.visible_total(),
            state.rewards.drought()
        ));

        if !state.battles.is_empty() {
            let skip = state.battles.len().saturating_sub(RECENT_BATTLES);
            let recent = state
                .battles
                .iter()
                .skip(skip)
                .map(|b| {
                    let tag = if b.close_call { "close" } else { "clean" };
                    format!("{}({tag})", b.enemy)
                })
                .collect::<Vec<_>>()
                .join(", ");
            p.push_str(&format!("Recent: {recent}\n"));
        }

        self.event_section(&mut p, &request.event);

        let skipped = state.skipped.drain();
        if !skipped.is_empty() {
            p.push_str(&format!(
                "\n=== SINCE LAST UPDATE ({} routine events) ===\n",
                skipped.len()
            ));
            for event in &skipped {
                p.push_str(&format!("• {}\n", event.summary));
            }
            p.push('\n');
        }

        if let Some(history) = state.history.as_ref().filter(|h| !h.is_empty()) {
            p.push_str(&format!(
                "\n=== SESSION HISTORY ({} previous events) ===\n",
                history.total()
            ));
            let entries: Vec<_> = history.recent().collect();
            let skip = entries.len().saturating_sub(self.history_in_prompt);
            for entry in entries.into_iter().skip(skip) {
                let (response, _) = truncate(&entry.response, HISTORY_RESPONSE_CHARS);
                p.push_str(&format!("• [{}] {}\n", entry.event_type, response));
            }
            p.push_str(
                "\nYou've seen these events before. Build on this context, don't repeat yourself.\n",
            );
        }

        if !payoffs.is_empty() {
            p.push_str("\n=== PENDING ARC PAYOFFS (you promised these in your playthrough notes) ===\n");
            for payoff in payoffs {
                p.push_str(&format!("• {payoff}\n"));
            }
            p.push_str(
                "\nIf this event creates an opportunity to deliver a payoff, DO IT. Don't defer again.\n",
            );
        }

        if state.rewards.needs_visible_reward() {
            let drought = state.rewards.drought();
            p.push_str(&format!(
                "\n⚠️  IMPACT WARNING: {drought} consecutive invisible rewards (EVs/none).\n"
            ));
            p.push_str(&format!(
                "The player hasn't noticed the GM in {drought} events.\n"
            ));
            p.push_str(
                "If this event scores 4+ on the checklist, use a VISIBLE reward: teachMove, giveItem, or setShiny.\n",
            );
            p.push_str("EVs alone are not enough here. The game needs to feel alive.\n");
        }

        if state.rewards.visible_total() == 0 && state.rewards.recorded() >= SESSION_NOTE_MIN_REWARDS {
            p.push_str(
                "\n📊 SESSION NOTE: No visible rewards given yet this session. The player hasn't felt the GM.\n",
            );
        }

        p
    }

    fn event_section(&self, p: &mut String, event: &GmEvent) {
        match event {
            GmEvent::Battle(battle) => {
                let opening = &battle.opening;
                let closing = &battle.closing;
                p.push_str("=== BATTLE COMPLETE ===\n");
                p.push_str("Read the battle text below to determine what happened.\n");
                p.push_str(&format!(
                    "Started: {} battle vs {}\n",
                    opening.kind, opening.enemy
                ));
                if !opening.enemy_party.is_empty() {
                    p.push_str(&format!(
                        "  Trainer's team: {}\n",
                        opening.enemy_party.join(", ")
                    ));
                }
                p.push_str(&format!(
                    "Outcome: {} | Duration: {}s, Party HP: {}%\n",
                    closing.outcome_name,
                    closing.duration_secs,
                    closing.hp_percent()
                ));
                if closing.close_call {
                    p.push_str("⚠️ CLOSE CALL!\n");
                }
                if !closing.damage.is_empty() {
                    let damage = closing
                        .damage
                        .iter()
                        .map(|d| format!("{}: -{}HP", d.pokemon, d.amount))
                        .collect::<Vec<_>>()
                        .join(", ");
                    p.push_str(&format!("Damage taken: {damage}\n"));
                }
                for change in &closing.level_changes {
                    p.push_str(&format!(
                        "Level up: {} L{} → L{}\n",
                        change.pokemon, change.from, change.to
                    ));
                }
                if let Some(caught) = &battle.caught {
                    p.push_str(&format!("🎉 Caught: {}\n", caught.pokemon));
                }

                if !battle.dialogue.is_empty() {
                    p.push_str("\n=== BATTLE TEXT (what the game showed) ===\n");
                    let skip = battle.dialogue.len().saturating_sub(BATTLE_DIALOGUE_LINES);
                    for line in battle.dialogue.iter().skip(skip) {
                        p.push_str(&format!("• {line}\n"));
                    }
                }

                if !battle.log.is_empty() {
                    p.push_str("\n=== DAMAGE LOG ===\n");
                    let skip = battle.log.len().saturating_sub(DAMAGE_LOG_LINES);
                    for entry in battle.log.iter().skip(skip) {
                        let or_unknown =
                            |v: Option<i64>| v.map_or_else(|| "?".to_string(), |v| v.to_string());
                        match entry.kind.as_str() {
                            "attack" => p.push_str(&format!(
                                "• {} dealt {} damage (enemy: {}/{})\n",
                                move_name(entry.move_id.unwrap_or(0)),
                                entry.damage.unwrap_or(0),
                                or_unknown(entry.enemy_hp),
                                or_unknown(entry.enemy_max_hp)
                            )),
                            "damage_taken" => p.push_str(&format!(
                                "• Took {} damage (HP now: {})\n",
                                entry.damage.unwrap_or(0),
                                or_unknown(entry.hp)
                            )),
                            _ => {}
                        }
                    }
                }
            }
            GmEvent::Exploration { summary, detail } => {
                p.push_str(&format!("=== EXPLORATION ===\n{summary}\n"));
                self.exploration_details(p, detail);
            }
            GmEvent::BadgeObtained { badge_count } => {
                p.push_str("=== BADGE OBTAINED ===\n");
                if let Some(count) = badge_count {
                    p.push_str(&format!("Total badges: {count}\n"));
                }
            }
            GmEvent::PokemonCaught { pokemon, .. } => {
                p.push_str(&format!("=== POKEMON CAUGHT ===\n🎉 Caught: {pokemon}\n"));
            }
            GmEvent::MoveMastery {
                move_name, count, ..
            } => {
                p.push_str(&format!(
                    "=== MOVE MASTERY ===\n{move_name} has been used {count} times\n"
                ));
            }
            GmEvent::Other { .. } => {}
        }
    }

    fn exploration_details(&self, p: &mut String, detail: &ExplorationSummary) {
        if detail.items_gained > 0 {
            p.push_str(&format!("📦 Items gained: {}\n", detail.items_gained));
        }
        match detail.money_change {
            0 => {}
            gained if gained > 0 => p.push_str(&format!("💰 Money gained: ${gained}\n")),
            spent => p.push_str(&format!("💸 Money spent: ${}\n", spent.unsigned_abs())),
        }
        if detail.dialogue_count > 0 {
            p.push_str(&format!("💬 NPCs talked to: {}\n", detail.dialogue_count));
            for (i, text) in detail.dialogue_texts.iter().take(NPC_LINES).enumerate() {
                let (shown, cut) = truncate(text, NPC_LINE_CHARS);
                let ellipsis = if cut { "..." } else { "" };
                p.push_str(&format!("  NPC {}: \"{shown}{ellipsis}\"\n", i + 1));
            }
        }
        for level in &detail.level_ups {
            p.push_str(&format!(
                "⬆ {} L{} → L{}\n",
                self.names.name(level.species),
                level.old_level,
                level.new_level
            ));
        }
    }
}
