//! Dispatch worker tests against a scripted agent and a local command
//! listener.
//!
//! Run with: `cargo test -p emerald-core --test dispatch_pipeline`

use chrono::Utc;
use emerald_core::dispatch::DispatchQueue;
use emerald_core::gate::DispatchRequest;
use emerald_core::names::SpeciesNames;
use emerald_core::persist::HistoryStore;
use emerald_core::prompt::PromptBuilder;
use emerald_core::relay::CommandRelay;
use emerald_core::testing::{Reply, ScriptedBackend};
use emerald_core::telemetry::{PartyMember, StateSnapshot};
use emerald_core::{Dispatcher, GmEvent, GmState, RewardClass, SharedState};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;

fn names() -> Arc<SpeciesNames> {
    let mut names = SpeciesNames::new();
    names.insert(255, "Torchic");
    names.insert(278, "Wingull");
    Arc::new(names)
}

fn mastery(count: u32) -> DispatchRequest {
    DispatchRequest {
        event: GmEvent::MoveMastery {
            move_id: 52,
            move_name: "Ember".to_string(),
            count,
        },
        snapshot: StateSnapshot {
            party: vec![
                PartyMember {
                    species: 255,
                    level: 16,
                    current_hp: 40,
                    max_hp: 48,
                },
                PartyMember {
                    species: 278,
                    level: 11,
                    current_hp: 30,
                    max_hp: 30,
                },
            ],
            badge_count: Some(1),
        },
        score: 0.5,
        observed_at: Utc::now(),
    }
}

fn dispatcher(
    backend: Arc<ScriptedBackend>,
    state: SharedState,
    relay: CommandRelay,
    call_timeout: Duration,
    note_dir: &Path,
) -> Dispatcher {
    Dispatcher::new(
        backend,
        state,
        PromptBuilder::new(names(), 10),
        relay,
        names(),
        call_timeout,
        note_dir.join("PLAYTHROUGH.md"),
    )
}

fn offline_relay() -> CommandRelay {
    CommandRelay::new("127.0.0.1", 1, Duration::from_secs(1)).dry_run(true)
}

async fn wait_idle(queue: &DispatchQueue) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while queue.outstanding() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("Failed to drain the dispatch queue in time");
}

// ===== TEST 1: One call in flight, requests answered in order =====

#[tokio::test]
async fn test_single_flight_fifo() {
    let dir = tempfile::TempDir::new().expect("Failed to create temp dir");
    let backend =
        Arc::new(ScriptedBackend::new(Vec::new()).with_delay(Duration::from_millis(40)));
    let state = GmState::new("gm-fifo", Utc::now()).shared();
    let worker = dispatcher(
        backend.clone(),
        state.clone(),
        offline_relay(),
        Duration::from_secs(5),
        dir.path(),
    );

    let (queue, rx) = DispatchQueue::channel();
    let handle = tokio::spawn(worker.run(rx));

    let mut ahead = Vec::new();
    for count in 1..=3 {
        ahead.push(queue.submit(mastery(count)).expect("Failed to submit request"));
    }
    assert_eq!(ahead[0], 0);
    assert!(ahead[2] >= 1, "later requests should see work ahead of them");

    wait_idle(&queue).await;
    drop(queue);
    handle.await.expect("Failed to join dispatch worker");

    assert_eq!(backend.max_in_flight(), 1);
    let prompts = backend.prompts();
    assert_eq!(prompts.len(), 3);
    for (i, prompt) in prompts.iter().enumerate() {
        assert!(prompt.starts_with("EVENT: MOVE_MASTERY\n"));
        assert!(prompt.contains(&format!("Ember has been used {} times", i + 1)));
    }
    assert_eq!(state.lock().rewards.recorded(), 3);
}

// ===== TEST 2: Commands on any line are relayed, in order =====

#[tokio::test]
async fn test_commands_relayed_in_order() {
    let dir = tempfile::TempDir::new().expect("Failed to create temp dir");
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind command listener");
    let port = listener.local_addr().expect("Failed to read local addr").port();

    let server = tokio::spawn(async move {
        let mut lines = Vec::new();
        for _ in 0..2 {
            let (mut socket, _) = listener.accept().await.expect("Failed to accept");
            let mut line = String::new();
            socket
                .read_to_string(&mut line)
                .await
                .expect("Failed to read command");
            lines.push(line);
        }
        lines
    });

    let backend = Arc::new(ScriptedBackend::new([Reply::text(
        "OBSERVATION: Torchic barely held on\n\
         MEMORY: patched Torchic up with GM.heal(0) after Roxanne\n\
         ACTION: GM.setShiny(1)",
    )]));
    let state = GmState::new("gm-relay", Utc::now()).shared();
    let relay = CommandRelay::new("127.0.0.1", port, Duration::from_secs(2));
    let worker = dispatcher(backend, state.clone(), relay, Duration::from_secs(5), dir.path());

    let outcome = worker.dispatch(mastery(10)).await;
    assert_eq!(outcome.actions.len(), 2);
    assert!(outcome.relayed.iter().all(|r| r.is_sent()));
    assert_eq!(outcome.reward, RewardClass::Visible);

    let lines = server.await.expect("Failed to join command listener");
    assert_eq!(lines, vec!["GM.heal(0)\n", "GM.setShiny(1)\n"]);
    assert_eq!(state.lock().rewards.visible_total(), 1);
}

// ===== TEST 3: A failed call records no reward and the worker keeps going =====

#[tokio::test]
async fn test_failed_call_is_survivable() {
    let dir = tempfile::TempDir::new().expect("Failed to create temp dir");
    let backend = Arc::new(ScriptedBackend::new([
        Reply::Fail("agent exited".to_string()),
        Reply::text("ACTION: GM.addEVs(0, \"spa\", 12)"),
    ]));
    let state = GmState::new("gm-fail", Utc::now()).shared();
    let worker = dispatcher(
        backend.clone(),
        state.clone(),
        offline_relay(),
        Duration::from_secs(5),
        dir.path(),
    );

    let (queue, rx) = DispatchQueue::channel();
    let handle = tokio::spawn(worker.run(rx));
    queue.submit(mastery(1)).expect("Failed to submit request");
    queue.submit(mastery(2)).expect("Failed to submit request");
    wait_idle(&queue).await;
    drop(queue);
    handle.await.expect("Failed to join dispatch worker");

    assert_eq!(backend.calls(), 2);
    let state = state.lock();
    let history: Vec<_> = state.rewards.history().collect();
    assert_eq!(history, vec![RewardClass::None, RewardClass::Ev]);
    assert_eq!(state.rewards.drought(), 2);
}

// ===== TEST 4: A hung agent is cut off by the call timeout =====

#[tokio::test]
async fn test_hung_call_times_out() {
    let dir = tempfile::TempDir::new().expect("Failed to create temp dir");
    let backend = Arc::new(ScriptedBackend::new([Reply::Hang]));
    let state = GmState::new("gm-hang", Utc::now()).shared();
    let worker = dispatcher(
        backend,
        state.clone(),
        offline_relay(),
        Duration::from_millis(50),
        dir.path(),
    );

    let outcome = tokio::time::timeout(Duration::from_secs(5), worker.dispatch(mastery(1)))
        .await
        .expect("Failed to return after the call timeout");
    assert!(outcome.response.is_none());
    assert!(outcome.actions.is_empty());
    assert_eq!(outcome.reward, RewardClass::None);
    assert_eq!(state.lock().rewards.recorded(), 1);
}

// ===== TEST 5: Completed dispatches are persisted =====

#[tokio::test]
async fn test_dispatch_appends_history() {
    let dir = tempfile::TempDir::new().expect("Failed to create temp dir");
    let store = HistoryStore::new(dir.path().join("state"));
    let backend = Arc::new(ScriptedBackend::new([
        Reply::text("MEMORY: Ember is Torchic's signature\nACTION: GM.setFriendship(0, 255)"),
        Reply::text("ACTION: none"),
    ]));
    let mut state = GmState::new("gm-store", Utc::now());
    state.history = Some(emerald_core::persist::SessionHistory::new(10));
    let state = state.shared();
    let worker = dispatcher(
        backend.clone(),
        state.clone(),
        offline_relay(),
        Duration::from_secs(5),
        dir.path(),
    )
    .with_store(store.clone());

    worker.dispatch(mastery(5)).await;
    worker.dispatch(mastery(6)).await;

    let second_prompt = &backend.prompts()[1];
    assert!(second_prompt.contains("=== SESSION HISTORY (1 previous events) ==="));
    assert!(second_prompt.contains("• [MOVE_MASTERY] MEMORY: Ember is Torchic's signature"));

    let (history, stats) = store.load(10).await.expect("Failed to reload history");
    assert_eq!(history.total(), 2);
    let stats = stats.expect("Failed to find stored stats");
    assert_eq!(stats.session_id, "gm-store");
}

// ===== TEST 6: Pending payoffs from the memory note reach the prompt =====

#[tokio::test]
async fn test_payoffs_from_memory_note() {
    let dir = tempfile::TempDir::new().expect("Failed to create temp dir");
    tokio::fs::write(
        dir.path().join("PLAYTHROUGH.md"),
        "# Notes\n\
         - PENDING PAYOFF: reward Wingull once it lands a critical hit\n\
         - short\n",
    )
    .await
    .expect("Failed to write memory note");

    let backend = Arc::new(ScriptedBackend::new(Vec::new()));
    let state = GmState::new("gm-note", Utc::now()).shared();
    let worker = dispatcher(
        backend.clone(),
        state,
        offline_relay(),
        Duration::from_secs(5),
        dir.path(),
    );
    worker.dispatch(mastery(1)).await;

    let prompt = &backend.prompts()[0];
    assert!(prompt.contains("=== PENDING ARC PAYOFFS"));
    assert!(prompt.contains("• PENDING PAYOFF: reward Wingull once it lands a critical hit\n"));
}
