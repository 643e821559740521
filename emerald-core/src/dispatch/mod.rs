//! Single-flight agent dispatch.
//!
//! Admitted events go into an unbounded FIFO. One worker task drains it, so
//! at most one agent call is in flight and admitted events are handled in
//! order. The control loop never waits on the worker.

mod backend;
mod system_prompt;

pub use backend::{
    build_backend, ApiBackend, Backend, BackendError, FilePollBackend, SubprocessBackend,
    PROMPT_SEPARATOR,
};
pub use system_prompt::{load_system_prompt, WORKSPACE_FILES};

use crate::gate::DispatchRequest;
use crate::memory_note::read_payoffs;
use crate::names::SpeciesNames;
use crate::persist::{HistoryEntry, HistoryStore, StoredStats};
use crate::prompt::{party_names, PromptBuilder};
use crate::relay::{CommandRelay, RelayOutcome};
use crate::response::{Action, LineLabel, ResponseParser};
use crate::reward::{classify_actions, RewardClass};
use crate::state::SharedState;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
#[error("dispatch worker has stopped")]
pub struct DispatchClosed;

/// Producer side of the dispatch queue.
#[derive(Debug, Clone)]
pub struct DispatchQueue {
    tx: mpsc::UnboundedSender<DispatchRequest>,
    outstanding: Arc<AtomicUsize>,
}

/// Consumer side, owned by the worker.
#[derive(Debug)]
pub struct DispatchReceiver {
    rx: mpsc::UnboundedReceiver<DispatchRequest>,
    outstanding: Arc<AtomicUsize>,
}

impl DispatchQueue {
    pub fn channel() -> (DispatchQueue, DispatchReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let outstanding = Arc::new(AtomicUsize::new(0));
        (
            DispatchQueue {
                tx,
                outstanding: outstanding.clone(),
            },
            DispatchReceiver { rx, outstanding },
        )
    }

    /// Enqueue a request. Returns how many requests were already outstanding.
    pub fn submit(&self, request: DispatchRequest) -> Result<usize, DispatchClosed> {
        let ahead = self.outstanding.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(request).is_err() {
            self.outstanding.fetch_sub(1, Ordering::SeqCst);
            return Err(DispatchClosed);
        }
        Ok(ahead)
    }

    /// Requests queued or in flight.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }
}

impl DispatchReceiver {
    pub async fn recv(&mut self) -> Option<DispatchRequest> {
        self.rx.recv().await
    }

    /// Take a queued request without dispatching it.
    pub fn try_recv(&mut self) -> Option<DispatchRequest> {
        let request = self.rx.try_recv().ok()?;
        self.done();
        Some(request)
    }

    fn done(&self) {
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Result of one dispatch.
#[derive(Debug)]
pub struct DispatchOutcome {
    pub event_type: String,
    pub response: Option<String>,
    pub actions: Vec<Action>,
    pub relayed: Vec<RelayOutcome>,
    pub reward: RewardClass,
}

/// Calls the agent for each request and applies its response.
pub struct Dispatcher {
    backend: Arc<dyn Backend>,
    state: SharedState,
    prompts: PromptBuilder,
    parser: ResponseParser,
    relay: CommandRelay,
    names: Arc<SpeciesNames>,
    call_timeout: Duration,
    shell_fallback: bool,
    memory_note: PathBuf,
    store: Option<HistoryStore>,
}

impl Dispatcher {
    pub fn new(
        backend: Arc<dyn Backend>,
        state: SharedState,
        prompts: PromptBuilder,
        relay: CommandRelay,
        names: Arc<SpeciesNames>,
        call_timeout: Duration,
        memory_note: impl Into<PathBuf>,
    ) -> Self {
        Self {
            backend,
            state,
            prompts,
            parser: ResponseParser::default(),
            relay,
            names,
            call_timeout,
            shell_fallback: true,
            memory_note: memory_note.into(),
            store: None,
        }
    }

    pub fn with_parser(mut self, parser: ResponseParser) -> Self {
        self.parser = parser;
        self
    }

    pub fn with_shell_fallback(mut self, enabled: bool) -> Self {
        self.shell_fallback = enabled;
        self
    }

    /// Persist each completed dispatch to `store`.
    pub fn with_store(mut self, store: HistoryStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Drain the queue until every producer is dropped.
    pub async fn run(self, mut rx: DispatchReceiver) {
        while let Some(request) = rx.recv().await {
            self.dispatch(request).await;
            rx.done();
        }
        debug!("dispatch queue closed");
    }

    pub async fn dispatch(&self, request: DispatchRequest) -> DispatchOutcome {
        let event_type = request.event.event_type().to_string();
        let payoffs = read_payoffs(&self.memory_note).await;
        let prompt = {
            let mut state = self.state.lock();
            self.prompts.build(&request, &mut state, &payoffs, Utc::now())
        };

        info!(event = %event_type, score = request.score, "THINKING");
        let reply = match tokio::time::timeout(self.call_timeout, self.backend.call(&prompt)).await {
            Ok(reply) => reply,
            Err(_) => Err(BackendError::Timeout(self.call_timeout)),
        };

        let text = match reply {
            Ok(text) => text,
            Err(e) => {
                warn!(event = %event_type, backend = self.backend.name(), error = %e, "agent call failed");
                self.state.lock().rewards.record(RewardClass::None);
                return DispatchOutcome {
                    event_type,
                    response: None,
                    actions: Vec::new(),
                    relayed: Vec::new(),
                    reward: RewardClass::None,
                };
            }
        };

        let parsed = self.parser.parse(&text);
        for (label, line) in &parsed.labelled {
            if *label != LineLabel::Action {
                info!("{}: {}", label.tag(), line);
            }
        }

        let actions = parsed.actions(self.relay.host(), self.shell_fallback);
        let reward = classify_actions(&actions);
        let party = party_names(&request.snapshot.party, &self.names);

        let mut relayed = Vec::with_capacity(actions.len());
        if actions.is_empty() {
            info!("ACT: none");
        }
        for action in &actions {
            let description = match action {
                Action::Call(call) => call.describe(&party),
                Action::Shell(command) => format!("shell: {command}"),
            };
            let outcome = self.relay.send(action).await;
            match &outcome {
                RelayOutcome::Failed(e) => warn!(action = %description, error = %e, "relay failed"),
                RelayOutcome::TimedOut => info!("ACT: {description} (no ack)"),
                _ => info!("ACT: {description}"),
            }
            relayed.push(outcome);
        }

        let entry = HistoryEntry {
            timestamp: Utc::now(),
            event_type: event_type.clone(),
            prompt,
            response: text.clone(),
        };
        let stored = {
            let mut state = self.state.lock();
            state.rewards.record(reward);
            debug!(reward = %reward, drought = state.rewards.drought(), "reward recorded");
            let stored = StoredStats {
                session_id: state.session_id.clone(),
                started_at: state.session_start,
                updated_at: entry.timestamp,
                stats: state.stats,
            };
            state.record_history(entry.clone());
            stored
        };
        if let Some(store) = &self.store {
            if let Err(e) = store.append(&entry).await {
                warn!(error = %e, "failed to append session history");
            }
            if let Err(e) = store.save_stats(&stored).await {
                warn!(error = %e, "failed to save session stats");
            }
        }

        DispatchOutcome {
            event_type,
            response: Some(text),
            actions,
            relayed,
            reward,
        }
    }
}
