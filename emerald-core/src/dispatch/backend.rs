use crate::config::{
    AgentConfig, ApiConfig, BackendKind, FilePollConfig, PromptVia, SubprocessConfig,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Separator between the system prompt and the event prompt for CLI agents.
pub const PROMPT_SEPARATOR: &str = "\n\n---\n\n";

const STDERR_EXCERPT: usize = 200;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} exited with {code:?}: {stderr}")]
    Exit {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("agent I/O: {0}")]
    Io(#[from] io::Error),

    #[error("API: {0}")]
    Api(#[from] claude::Error),

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("agent returned no text")]
    Empty,

    #[error("no response in {path} after {polls} polls")]
    NoResponse { path: PathBuf, polls: u32 },
}

/// An agent that turns a prompt into free text.
#[async_trait]
pub trait Backend: Send + Sync {
    fn name(&self) -> &str;

    async fn call(&self, prompt: &str) -> Result<String, BackendError>;
}

/// The prompt goes in last so placeholder text inside it is left alone.
fn substitute(args: &[String], prompt: &str, session_id: &str) -> Vec<String> {
    args.iter()
        .map(|a| a.replace("{session_id}", session_id).replace("{prompt}", prompt))
        .collect()
}

fn excerpt(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim()
        .chars()
        .take(STDERR_EXCERPT)
        .collect()
}

fn non_empty(text: &str) -> Result<String, BackendError> {
    let text = text.trim();
    if text.is_empty() {
        Err(BackendError::Empty)
    } else {
        Ok(text.to_string())
    }
}

/// Runs an agent CLI once per prompt.
#[derive(Debug)]
pub struct SubprocessBackend {
    config: SubprocessConfig,
    workspace: PathBuf,
    system_prompt: String,
    session_id: String,
}

impl SubprocessBackend {
    pub fn new(
        config: SubprocessConfig,
        workspace: impl Into<PathBuf>,
        system_prompt: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            config,
            workspace: workspace.into(),
            system_prompt: system_prompt.into(),
            session_id: session_id.into(),
        }
    }

    fn full_prompt(&self, prompt: &str) -> String {
        if self.config.include_system_prompt && !self.system_prompt.is_empty() {
            format!("{}{PROMPT_SEPARATOR}{prompt}", self.system_prompt)
        } else {
            prompt.to_string()
        }
    }
}

#[async_trait]
impl Backend for SubprocessBackend {
    fn name(&self) -> &str {
        "subprocess"
    }

    async fn call(&self, prompt: &str) -> Result<String, BackendError> {
        let full = self.full_prompt(prompt);
        let program = &self.config.program;
        let via_stdin = self.config.prompt_via == PromptVia::Stdin;
        let arg_prompt = if via_stdin { "" } else { full.as_str() };

        let mut command = Command::new(program);
        command
            .args(substitute(&self.config.args, arg_prompt, &self.session_id))
            .stdin(if via_stdin { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if self.workspace.is_dir() {
            command.current_dir(&self.workspace);
        }

        let mut child = command.spawn().map_err(|source| BackendError::Spawn {
            program: program.clone(),
            source,
        })?;

        let stdin = child.stdin.take();
        let feed = async {
            if let Some(mut stdin) = stdin {
                stdin.write_all(full.as_bytes()).await?;
                stdin.shutdown().await?;
            }
            Ok::<_, io::Error>(())
        };
        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output?;
        if let Err(e) = fed {
            tracing::debug!(error = %e, "agent closed stdin early");
        }

        if !output.status.success() {
            return Err(BackendError::Exit {
                program: program.clone(),
                code: output.status.code(),
                stderr: excerpt(&output.stderr),
            });
        }
        non_empty(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Calls the Messages API directly, keeping a rolling conversation.
pub struct ApiBackend {
    client: claude::Claude,
    config: ApiConfig,
    system_prompt: String,
    history: Mutex<Vec<claude::Message>>,
}

impl ApiBackend {
    pub fn new(config: ApiConfig, system_prompt: impl Into<String>) -> Result<Self, BackendError> {
        let key = config.api_key.clone().unwrap_or_default();
        let mut client = claude::Claude::new(key)?.with_model(config.model.clone());
        if let Some(base_url) = &config.base_url {
            client = client.with_base_url(base_url.clone());
        }
        Ok(Self {
            client,
            config,
            system_prompt: system_prompt.into(),
            history: Mutex::new(Vec::new()),
        })
    }

    pub fn history_len(&self) -> usize {
        self.history.lock().len()
    }

    fn trim(history: &mut Vec<claude::Message>, cap: usize) {
        if history.len() > cap {
            let excess = history.len() - cap;
            history.drain(..excess);
        }
        // The API requires the conversation to open with a user turn.
        while history.first().is_some_and(|m| m.role != claude::Role::User) {
            history.remove(0);
        }
    }
}

#[async_trait]
impl Backend for ApiBackend {
    fn name(&self) -> &str {
        "api"
    }

    async fn call(&self, prompt: &str) -> Result<String, BackendError> {
        // History is only touched once a reply arrives, so a dropped call
        // leaves no unanswered user turn behind.
        let user = claude::Message::user(prompt);
        let messages = {
            let mut messages = self.history.lock().clone();
            messages.push(user.clone());
            Self::trim(&mut messages, self.config.history_messages);
            messages
        };

        let mut request = claude::Request::new(messages).with_max_tokens(self.config.max_tokens);
        if !self.system_prompt.is_empty() {
            request = request.with_system(self.system_prompt.clone());
        }

        let response = self.client.complete(request).await?;
        tracing::debug!(
            id = %response.id,
            model = %response.model,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "API reply"
        );
        if response.stop_reason == claude::StopReason::MaxTokens {
            tracing::warn!(max_tokens = self.config.max_tokens, "API reply truncated");
        }
        let text = non_empty(&response.text())?;

        let mut history = self.history.lock();
        history.push(user);
        history.push(claude::Message::assistant(text.clone()));
        Self::trim(&mut history, self.config.history_messages);
        Ok(text)
    }
}

/// Triggers an external agent and polls a file for its reply.
#[derive(Debug)]
pub struct FilePollBackend {
    config: FilePollConfig,
    workspace: PathBuf,
    session_id: String,
}

impl FilePollBackend {
    pub fn new(
        config: FilePollConfig,
        workspace: impl Into<PathBuf>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            config,
            workspace: workspace.into(),
            session_id: session_id.into(),
        }
    }

    async fn clear_response(path: &Path) -> Result<(), BackendError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl Backend for FilePollBackend {
    fn name(&self) -> &str {
        "file_poll"
    }

    async fn call(&self, prompt: &str) -> Result<String, BackendError> {
        let path = &self.config.response_file;
        Self::clear_response(path).await?;

        let program = &self.config.program;
        let mut command = Command::new(program);
        command
            .args(substitute(&self.config.args, prompt, &self.session_id))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if self.workspace.is_dir() {
            command.current_dir(&self.workspace);
        }
        let output = command.output().await.map_err(|source| BackendError::Spawn {
            program: program.clone(),
            source,
        })?;
        if !output.status.success() {
            return Err(BackendError::Exit {
                program: program.clone(),
                code: output.status.code(),
                stderr: excerpt(&output.stderr),
            });
        }

        for _ in 0..self.config.max_polls {
            tokio::time::sleep(self.config.poll_interval()).await;
            if let Ok(text) = tokio::fs::read_to_string(path).await {
                if let Ok(text) = non_empty(&text) {
                    return Ok(text);
                }
            }
        }
        Err(BackendError::NoResponse {
            path: path.clone(),
            polls: self.config.max_polls,
        })
    }
}

/// Build the configured backend.
pub fn build_backend(
    config: &AgentConfig,
    system_prompt: &str,
    session_id: &str,
) -> Result<Arc<dyn Backend>, BackendError> {
    let backend: Arc<dyn Backend> = match config.backend {
        BackendKind::Subprocess => Arc::new(SubprocessBackend::new(
            config.subprocess.clone(),
            &config.workspace,
            system_prompt,
            session_id,
        )),
        BackendKind::Api => Arc::new(ApiBackend::new(config.api.clone(), system_prompt)?),
        BackendKind::FilePoll => Arc::new(FilePollBackend::new(
            config.file_poll.clone(),
            &config.workspace,
            session_id,
        )),
    };
    tracing::info!(backend = backend.name(), "agent backend ready");
    Ok(backend)
}
