//! Event significance gateway and agent dispatch pipeline for an AI game
//! master.
//!
//! Telemetry from the emulator is decoded, folded into battle summaries and
//! scored. Significant events are handed one at a time to an agent backend;
//! the agent's commands are relayed back to the emulator and its reward
//! choices feed the next prompt.
//!
//! # Example
//!
//! ```no_run
//! use emerald_core::{Daemon, GmConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let mut config = GmConfig::load_or_default("emerald.toml")?;
//! config.apply_env();
//! let daemon = Daemon::from_config(config).await?;
//! daemon.run(async { let _ = tokio::signal::ctrl_c().await; }).await;
//! # Ok(())
//! # }
//! ```

pub mod battle;
pub mod config;
pub mod daemon;
pub mod dispatch;
pub mod gate;
pub mod gateway;
pub mod memory_note;
pub mod names;
pub mod persist;
pub mod prompt;
pub mod relay;
pub mod response;
pub mod reward;
pub mod state;
pub mod telemetry;
pub mod testing;

pub use battle::{BattleOutcome, BattleSummary, BattleTracker, TrainerLedger};
pub use config::{ConfigError, GmConfig};
pub use daemon::{Daemon, DaemonError};
pub use dispatch::{Backend, BackendError, DispatchQueue, Dispatcher};
pub use gate::{score, Gate, GmEvent};
pub use gateway::{Gateway, Handled};
pub use response::{Action, GmCall, ResponseParser};
pub use reward::{RewardClass, RewardTracker};
pub use state::{GmState, SharedState};
pub use telemetry::{TelemetryCodec, TelemetryEvent, TelemetryRecord};
