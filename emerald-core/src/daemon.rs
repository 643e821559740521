//! The long-running game master daemon.
//!
//! One control loop reads telemetry, one worker task talks to the agent.
//! The control loop polls with a short timeout so it stays responsive to
//! shutdown, and reconnects with back-off when the emulator goes away.

use crate::config::{EmulatorConfig, GmConfig};
use crate::dispatch::{
    build_backend, load_system_prompt, Backend, BackendError, DispatchQueue, Dispatcher,
};
use crate::gate::Gate;
use crate::gateway::Gateway;
use crate::names::SpeciesNames;
use crate::persist::{load_or_create_session_id, new_session_id, HistoryStore, PersistError};
use crate::prompt::PromptBuilder;
use crate::relay::CommandRelay;
use crate::state::{GmState, SharedState};
use crate::telemetry::TelemetryCodec;
use chrono::Utc;
use futures::StreamExt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tokio_util::codec::FramedRead;
use tracing::{debug, info, warn};

/// How long the worker may keep running after shutdown is requested.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("backend: {0}")]
    Backend(#[from] BackendError),

    #[error("session state: {0}")]
    Persist(#[from] PersistError),
}

pub struct Daemon {
    config: GmConfig,
    backend: Arc<dyn Backend>,
    names: Arc<SpeciesNames>,
    state: SharedState,
    store: Option<HistoryStore>,
}

impl Daemon {
    /// Build everything the configuration describes.
    pub async fn from_config(config: GmConfig) -> Result<Self, DaemonError> {
        let names = Arc::new(
            config
                .paths
                .species_file
                .as_deref()
                .map(SpeciesNames::load_or_empty)
                .unwrap_or_default(),
        );

        let session = &config.session;
        let session_id = if session.persistent {
            load_or_create_session_id(&session.session_id_file).await?
        } else {
            new_session_id()
        };

        let mut state = GmState::new(session_id.clone(), Utc::now());
        let store = if session.persistent {
            let store = HistoryStore::new(&session.state_dir);
            let (history, stats) = store.load(session.history_in_prompt).await?;
            info!(entries = history.total(), "restored session history");
            state.history = Some(history);
            if let Some(stored) = stats {
                state.stats = stored.stats;
            }
            Some(store)
        } else {
            None
        };

        let system_prompt =
            load_system_prompt(&config.agent.workspace, &config.paths.memory_note).await;
        let backend = build_backend(&config.agent, &system_prompt, &session_id)?;
        info!(%session_id, persistent = session.persistent, "session ready");

        Ok(Self {
            config,
            backend,
            names,
            state: state.shared(),
            store,
        })
    }

    /// Assemble a daemon around an existing backend and state.
    pub fn with_backend(
        config: GmConfig,
        backend: Arc<dyn Backend>,
        names: Arc<SpeciesNames>,
        state: SharedState,
    ) -> Self {
        Self {
            config,
            backend,
            names,
            state,
            store: None,
        }
    }

    pub fn state(&self) -> SharedState {
        self.state.clone()
    }

    /// Run until `shutdown` resolves.
    pub async fn run<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let Daemon {
            config,
            backend,
            names,
            state,
            store,
        } = self;

        let relay = CommandRelay::new(
            config.emulator.host.clone(),
            config.emulator.port,
            config.relay.send_timeout(),
        )
        .dry_run(config.relay.dry_run);
        let mut dispatcher = Dispatcher::new(
            backend,
            state.clone(),
            PromptBuilder::new(names.clone(), config.session.history_in_prompt),
            relay,
            names.clone(),
            config.agent.timeout(),
            config.paths.memory_note.clone(),
        )
        .with_shell_fallback(config.relay.shell_fallback);
        if let Some(store) = store {
            dispatcher = dispatcher.with_store(store);
        }

        let (queue, rx) = DispatchQueue::channel();
        let mut worker = tokio::spawn(dispatcher.run(rx));
        let mut gateway = Gateway::new(Gate::new(config.gate.threshold), state, queue, names);

        info!(
            addr = %config.emulator.address(),
            threshold = config.gate.threshold,
            "game master started"
        );
        control_loop(&config.emulator, &mut gateway, shutdown).await;

        drop(gateway);
        match timeout(SHUTDOWN_GRACE, &mut worker).await {
            Ok(Ok(())) => debug!("dispatch worker finished"),
            Ok(Err(e)) => warn!(error = %e, "dispatch worker failed"),
            Err(_) => {
                warn!("dispatch worker still busy, aborting");
                worker.abort();
            }
        }
        info!("game master stopped");
    }
}

async fn control_loop<F>(emulator: &EmulatorConfig, gateway: &mut Gateway, shutdown: F)
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let addr = emulator.address();

    loop {
        let connected = tokio::select! {
            _ = &mut shutdown => return,
            result = timeout(emulator.connect_timeout(), TcpStream::connect(&addr)) => result,
        };
        let stream = match connected {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                warn!(%addr, error = %e, "emulator unreachable, retrying");
                if pause(emulator.reconnect_delay(), &mut shutdown).await {
                    return;
                }
                continue;
            }
            Err(_) => {
                warn!(%addr, "connect timed out, retrying");
                if pause(emulator.reconnect_delay(), &mut shutdown).await {
                    return;
                }
                continue;
            }
        };
        info!(%addr, "connected to emulator");

        let mut frames = FramedRead::new(stream, TelemetryCodec::new(emulator.max_line_bytes));
        loop {
            let polled = tokio::select! {
                biased;
                _ = &mut shutdown => return,
                polled = timeout(emulator.poll_interval(), frames.next()) => polled,
            };
            match polled {
                Err(_) => continue,
                Ok(None) => {
                    warn!("emulator closed the connection");
                    break;
                }
                Ok(Some(Ok(Ok(record)))) => {
                    gateway.handle(record, Utc::now());
                }
                Ok(Some(Ok(Err(e)))) => debug!(error = %e, "dropping telemetry line"),
                Ok(Some(Err(e))) => {
                    warn!(error = %e, "telemetry connection reset");
                    break;
                }
            }
        }

        if pause(emulator.reset_delay(), &mut shutdown).await {
            return;
        }
    }
}

/// Sleep unless shutdown arrives first. Returns true on shutdown.
async fn pause<F>(delay: Duration, shutdown: &mut std::pin::Pin<&mut F>) -> bool
where
    F: Future<Output = ()>,
{
    tokio::select! {
        _ = shutdown => true,
        _ = sleep(delay) => false,
    }
}
