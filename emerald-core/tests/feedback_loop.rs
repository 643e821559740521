//! Reward feedback: the agent's own choices shape its next prompt.
//!
//! Run with: `cargo test -p emerald-core --test feedback_loop`

use chrono::Utc;
use emerald_core::gate::{DispatchRequest, SkippedEvent};
use emerald_core::names::SpeciesNames;
use emerald_core::prompt::PromptBuilder;
use emerald_core::relay::CommandRelay;
use emerald_core::telemetry::StateSnapshot;
use emerald_core::testing::{Reply, ScriptedBackend};
use emerald_core::{Dispatcher, GmEvent, GmState, RewardClass, SharedState};
use std::sync::Arc;
use std::time::Duration;

const EV_REPLY: &str = "OBSERVATION: steady grinding\nACTION: GM.addEVs(0, \"atk\", 8)";
const SHINY_REPLY: &str = "OBSERVATION: the player needs a moment\nACTION: GM.setShiny(0)";

fn badge() -> DispatchRequest {
    DispatchRequest {
        event: GmEvent::BadgeObtained {
            badge_count: Some(2),
        },
        snapshot: StateSnapshot::default(),
        score: 1.0,
        observed_at: Utc::now(),
    }
}

fn setup(replies: Vec<Reply>) -> (Dispatcher, Arc<ScriptedBackend>, SharedState, tempfile::TempDir) {
    let dir = tempfile::TempDir::new().expect("Failed to create temp dir");
    let backend = Arc::new(ScriptedBackend::new(replies));
    let state = GmState::new("gm-feedback", Utc::now()).shared();
    let names = Arc::new(SpeciesNames::new());
    let dispatcher = Dispatcher::new(
        backend.clone(),
        state.clone(),
        PromptBuilder::new(names.clone(), 10),
        CommandRelay::new("127.0.0.1", 1, Duration::from_secs(1)).dry_run(true),
        names,
        Duration::from_secs(5),
        dir.path().join("PLAYTHROUGH.md"),
    );
    (dispatcher, backend, state, dir)
}

#[tokio::test]
async fn test_drought_escalates_then_resets() {
    let (dispatcher, backend, state, _dir) = setup(vec![
        Reply::text(EV_REPLY),
        Reply::text(EV_REPLY),
        Reply::text(EV_REPLY),
        Reply::text(SHINY_REPLY),
        Reply::text("ACTION: none"),
    ]);

    for _ in 0..5 {
        dispatcher.dispatch(badge()).await;
    }

    let prompts = backend.prompts();
    for prompt in &prompts[..3] {
        assert!(!prompt.contains("IMPACT WARNING"));
    }
    assert!(prompts[3].contains("IMPACT WARNING: 3 consecutive invisible rewards"));
    assert!(prompts[3].contains("Rewards: 0 visible this session | drought=3\n"));

    assert!(!prompts[4].contains("IMPACT WARNING"));
    assert!(prompts[4].contains("Rewards: 1 visible this session | drought=0\n"));

    let state = state.lock();
    let history: Vec<_> = state.rewards.history().collect();
    assert_eq!(
        history,
        vec![
            RewardClass::Ev,
            RewardClass::Ev,
            RewardClass::Ev,
            RewardClass::Visible,
            RewardClass::None
        ]
    );
    assert_eq!(state.rewards.drought(), 1);
}

#[tokio::test]
async fn test_session_note_after_five_invisible_rewards() {
    let (dispatcher, backend, _state, _dir) = setup(vec![Reply::text(EV_REPLY); 6]);

    for _ in 0..6 {
        dispatcher.dispatch(badge()).await;
    }

    let prompts = backend.prompts();
    assert!(!prompts[4].contains("SESSION NOTE"));
    assert!(prompts[5].contains("SESSION NOTE: No visible rewards given yet this session"));
}

#[tokio::test]
async fn test_skipped_digest_drained_once() {
    let (dispatcher, backend, state, _dir) = setup(Vec::new());
    {
        let mut state = state.lock();
        for i in 0..2 {
            state.skipped.push(SkippedEvent {
                event_type: "BATTLE_SUMMARY".to_string(),
                at: Utc::now(),
                summary: format!("Wild battle vs Zigzagoon L{}", 3 + i),
            });
        }
    }

    dispatcher.dispatch(badge()).await;
    dispatcher.dispatch(badge()).await;

    let prompts = backend.prompts();
    assert!(prompts[0].contains("=== SINCE LAST UPDATE (2 routine events) ===\n"));
    assert!(prompts[0].contains("• Wild battle vs Zigzagoon L4\n"));
    assert!(!prompts[1].contains("SINCE LAST UPDATE"));
    assert!(state.lock().skipped.is_empty());
}
