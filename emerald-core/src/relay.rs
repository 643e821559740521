//! Command relay to the emulator.
//!
//! Each command goes out on its own short-lived connection as one line. The
//! emulator does not acknowledge commands, so a send that times out after
//! connecting is counted as sent.

use crate::response::Action;
use std::io;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::time::timeout;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("write: {0}")]
    Write(#[source] io::Error),

    #[error("shell: {0}")]
    Shell(#[source] io::Error),

    #[error("shell command exited with {0:?}")]
    ShellExit(Option<i32>),
}

#[derive(Debug)]
pub enum RelayOutcome {
    Sent,
    /// No completion within the send timeout; treated as sent.
    TimedOut,
    DryRun,
    Failed(RelayError),
}

impl RelayOutcome {
    pub fn is_sent(&self) -> bool {
        !matches!(self, RelayOutcome::Failed(_))
    }
}

#[derive(Debug, Clone)]
pub struct CommandRelay {
    host: String,
    port: u16,
    send_timeout: Duration,
    dry_run: bool,
}

impl CommandRelay {
    pub fn new(host: impl Into<String>, port: u16, send_timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            send_timeout,
            dry_run: false,
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub async fn send(&self, action: &Action) -> RelayOutcome {
        if self.dry_run {
            tracing::info!(action = ?action, "dry run, not relaying");
            return RelayOutcome::DryRun;
        }
        let result = match action {
            Action::Call(call) => timeout(self.send_timeout, self.send_line(&call.raw)).await,
            Action::Shell(command) => timeout(self.send_timeout, run_shell(command)).await,
        };
        match result {
            Ok(Ok(())) => RelayOutcome::Sent,
            Ok(Err(e)) => RelayOutcome::Failed(e),
            Err(_) => RelayOutcome::TimedOut,
        }
    }

    async fn send_line(&self, line: &str) -> Result<(), RelayError> {
        let addr = self.address();
        let mut stream = TcpStream::connect(&addr)
            .await
            .map_err(|source| RelayError::Connect { addr, source })?;
        let mut payload = line.trim_end().to_string();
        payload.push('\n');
        stream
            .write_all(payload.as_bytes())
            .await
            .map_err(RelayError::Write)?;
        stream.shutdown().await.map_err(RelayError::Write)?;
        Ok(())
    }
}

async fn run_shell(command: &str) -> Result<(), RelayError> {
    let status = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status()
        .await
        .map_err(RelayError::Shell)?;
    if status.success() {
        Ok(())
    } else {
        Err(RelayError::ShellExit(status.code()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::ResponseParser;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    fn call(text: &str) -> Action {
        let calls = ResponseParser::default().extract_calls(text);
        Action::Call(calls.into_iter().next().unwrap())
    }

    #[tokio::test]
    async fn test_sends_one_line_per_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let relay = CommandRelay::new("127.0.0.1", port, Duration::from_secs(2));

        let server = tokio::spawn(async move {
            let mut lines = Vec::new();
            for _ in 0..2 {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = String::new();
                socket.read_to_string(&mut buf).await.unwrap();
                lines.push(buf);
            }
            lines
        });

        assert!(relay.send(&call("GM.heal(0)")).await.is_sent());
        assert!(relay.send(&call("GM.setShiny(1)")).await.is_sent());
        assert_eq!(server.await.unwrap(), vec!["GM.heal(0)\n", "GM.setShiny(1)\n"]);
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let relay = CommandRelay::new("127.0.0.1", port, Duration::from_secs(2));
        let outcome = relay.send(&call("GM.heal(0)")).await;
        assert!(matches!(outcome, RelayOutcome::Failed(RelayError::Connect { .. })));
    }

    #[tokio::test]
    async fn test_dry_run_sends_nothing() {
        let relay = CommandRelay::new("127.0.0.1", 1, Duration::from_secs(1)).dry_run(true);
        assert!(matches!(relay.send(&call("GM.heal(0)")).await, RelayOutcome::DryRun));
    }

    #[tokio::test]
    async fn test_shell_fallback() {
        let dir = tempfile::TempDir::new().unwrap();
        let marker = dir.path().join("ran");
        let relay = CommandRelay::new("127.0.0.1", 1, Duration::from_secs(5));

        let ok = relay
            .send(&Action::Shell(format!("touch {}", marker.display())))
            .await;
        assert!(matches!(ok, RelayOutcome::Sent));
        assert!(marker.exists());

        let failed = relay.send(&Action::Shell("exit 4".to_string())).await;
        assert!(matches!(failed, RelayOutcome::Failed(RelayError::ShellExit(Some(4)))));
    }

    #[tokio::test]
    async fn test_slow_shell_counts_as_sent() {
        let relay = CommandRelay::new("127.0.0.1", 1, Duration::from_millis(50));
        let outcome = relay.send(&Action::Shell("sleep 5".to_string())).await;
        assert!(matches!(outcome, RelayOutcome::TimedOut));
        assert!(outcome.is_sent());
    }
}
