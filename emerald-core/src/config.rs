//! Daemon configuration.
//!
//! Loaded from a TOML file. Every section is optional and falls back to the
//! defaults below, so an empty file is a valid configuration. Relative paths
//! are resolved against the directory holding the config file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors from loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Top-level configuration for the game master daemon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GmConfig {
    pub emulator: EmulatorConfig,
    pub gate: GateConfig,
    pub agent: AgentConfig,
    pub session: SessionConfig,
    pub paths: PathsConfig,
    pub relay: RelayConfig,
}

/// Connection to the telemetry source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulatorConfig {
    pub host: String,
    pub port: u16,
    /// Readiness timeout of the control loop.
    pub poll_interval_ms: u64,
    pub connect_timeout_secs: u64,
    /// Back-off after a failed connect.
    pub reconnect_delay_secs: u64,
    /// Back-off after an established connection drops.
    pub reset_delay_secs: u64,
    /// Lines longer than this are dropped as malformed.
    pub max_line_bytes: usize,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8888,
            poll_interval_ms: 100,
            connect_timeout_secs: 5,
            reconnect_delay_secs: 5,
            reset_delay_secs: 2,
            max_line_bytes: 64 * 1024,
        }
    }
}

impl EmulatorConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn reset_delay(&self) -> Duration {
        Duration::from_secs(self.reset_delay_secs)
    }
}

/// Uncertainty gate settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Events scoring at or above this reach the backend.
    pub threshold: f64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self { threshold: 0.15 }
    }
}

/// Which backend variant answers prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    Subprocess,
    Api,
    FilePoll,
}

/// Backend selection plus per-variant settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub backend: BackendKind,
    /// Hard limit on one backend call.
    pub timeout_secs: u64,
    /// Directory holding AGENTS.md and friends.
    pub workspace: PathBuf,
    pub subprocess: SubprocessConfig,
    pub api: ApiConfig,
    pub file_poll: FilePollConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            timeout_secs: 120,
            workspace: PathBuf::from("./agent"),
            subprocess: SubprocessConfig::default(),
            api: ApiConfig::default(),
            file_poll: FilePollConfig::default(),
        }
    }
}

impl AgentConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// How the prompt reaches a child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptVia {
    /// Substituted into `{prompt}` placeholders in the arguments.
    #[default]
    Argument,
    /// Written to the child's stdin.
    Stdin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubprocessConfig {
    pub program: String,
    /// Arguments; `{prompt}` and `{session_id}` are substituted.
    pub args: Vec<String>,
    pub prompt_via: PromptVia,
    /// Prefix the system prompt to every request.
    pub include_system_prompt: bool,
}

impl Default for SubprocessConfig {
    fn default() -> Self {
        Self {
            program: "claude".to_string(),
            args: vec!["-p".to_string(), "{prompt}".to_string()],
            prompt_via: PromptVia::Argument,
            include_system_prompt: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub model: String,
    pub max_tokens: usize,
    /// Falls back to `ANTHROPIC_API_KEY`.
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    /// Rolling user/assistant history kept between calls.
    pub history_messages: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-20250514".to_string(),
            max_tokens: 1024,
            api_key: None,
            base_url: None,
            history_messages: 40,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilePollConfig {
    /// Command that hands the prompt to the agent.
    pub program: String,
    pub args: Vec<String>,
    /// Where the agent writes its answer.
    pub response_file: PathBuf,
    pub poll_interval_ms: u64,
    pub max_polls: u32,
}

impl Default for FilePollConfig {
    fn default() -> Self {
        Self {
            program: "clawdbot".to_string(),
            args: vec![
                "agent".to_string(),
                "--agent".to_string(),
                "pokemon-gm".to_string(),
                "--session-id".to_string(),
                "{session_id}".to_string(),
                "--message".to_string(),
                "{prompt}".to_string(),
            ],
            response_file: PathBuf::from("./agent/state/gm_response.txt"),
            poll_interval_ms: 1000,
            max_polls: 90,
        }
    }
}

impl FilePollConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Session continuity settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Persist history and counters across restarts.
    pub persistent: bool,
    pub state_dir: PathBuf,
    /// Previous interactions replayed into each prompt.
    pub history_in_prompt: usize,
    pub session_id_file: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            persistent: false,
            state_dir: PathBuf::from("./state"),
            history_in_prompt: 10,
            session_id_file: PathBuf::from("./state/session_id.txt"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Long-term memory note scanned for pending payoffs.
    pub memory_note: PathBuf,
    pub species_file: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            memory_note: PathBuf::from("./memory/PLAYTHROUGH.md"),
            species_file: None,
        }
    }
}

/// Outbound command delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub send_timeout_secs: u64,
    /// Execute a raw ACTION line when no call could be extracted.
    pub shell_fallback: bool,
    /// Log commands instead of sending them.
    pub dry_run: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            send_timeout_secs: 5,
            shell_fallback: true,
            dry_run: false,
        }
    }
}

impl RelayConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }
}

impl GmConfig {
    /// Parse configuration from TOML text without touching the filesystem.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file and resolve relative paths against its directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml(&text)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        config.resolve_paths(base);
        Ok(config)
    }

    /// Load `path` if it exists, otherwise return the defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        match Self::load(path.as_ref()) {
            Err(ConfigError::NotFound(_)) => {
                tracing::warn!(path = %path.as_ref().display(), "config not found, using defaults");
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// Fill the API key from the environment when the file has none.
    pub fn apply_env(&mut self) {
        if self.agent.api.api_key.is_none() {
            self.agent.api.api_key = std::env::var("ANTHROPIC_API_KEY").ok();
        }
    }

    /// Check value ranges. Called by the loaders; call again after overrides.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.gate.threshold) {
            return Err(ConfigError::Invalid {
                field: "gate.threshold",
                reason: format!("{} is outside [0, 1]", self.gate.threshold),
            });
        }
        if self.emulator.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "emulator.poll_interval_ms",
                reason: "must be positive".to_string(),
            });
        }
        if self.agent.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "agent.timeout_secs",
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.agent.workspace);
        resolve(&mut self.agent.file_poll.response_file);
        resolve(&mut self.session.state_dir);
        resolve(&mut self.session.session_id_file);
        resolve(&mut self.paths.memory_note);
        if let Some(species) = self.paths.species_file.as_mut() {
            resolve(species);
        }
    }
}
