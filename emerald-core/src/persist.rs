//! Session persistence.
//!
//! History is an append-only JSONL file, one entry per completed dispatch.
//! Counters live in a small JSON document replaced atomically via a temp file
//! and rename. A malformed history line is skipped on load.

use crate::state::SessionStats;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;

pub const HISTORY_FILE: &str = "session_history.jsonl";
pub const STATS_FILE: &str = "session_stats.json";

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("encode: {0}")]
    Encode(#[from] serde_json::Error),
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> PersistError + '_ {
    move |source| PersistError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// One completed dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub prompt: String,
    pub response: String,
}

/// Most recent history entries plus a running total.
#[derive(Debug, Clone)]
pub struct SessionHistory {
    recent: VecDeque<HistoryEntry>,
    total: usize,
    keep: usize,
}

impl SessionHistory {
    pub fn new(keep: usize) -> Self {
        Self {
            recent: VecDeque::with_capacity(keep),
            total: 0,
            keep,
        }
    }

    pub fn push(&mut self, entry: HistoryEntry) {
        self.total += 1;
        if self.keep == 0 {
            return;
        }
        if self.recent.len() == self.keep {
            self.recent.pop_front();
        }
        self.recent.push_back(entry);
    }

    pub fn recent(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.recent.iter()
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }
}

/// The counters document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredStats {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub stats: SessionStats,
}

/// Generate a fresh `gm-xxxxxxxx` session id.
pub fn new_session_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("gm-{}", &id[..8])
}

/// Read a persisted session id, creating and saving one if absent.
pub async fn load_or_create_session_id(path: &Path) -> Result<String, PersistError> {
    match fs::read_to_string(path).await {
        Ok(text) if !text.trim().is_empty() => return Ok(text.trim().to_string()),
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(io_err(path)(e)),
    }
    let id = new_session_id();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.map_err(io_err(parent))?;
    }
    fs::write(path, &id).await.map_err(io_err(path))?;
    tracing::info!(session_id = %id, "created new session id");
    Ok(id)
}

/// Locations of the history and counters files.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    dir: PathBuf,
}

impl HistoryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn history_path(&self) -> PathBuf {
        self.dir.join(HISTORY_FILE)
    }

    pub fn stats_path(&self) -> PathBuf {
        self.dir.join(STATS_FILE)
    }

    /// Load prior history (keeping the newest `keep`) and counters.
    pub async fn load(
        &self,
        keep: usize,
    ) -> Result<(SessionHistory, Option<StoredStats>), PersistError> {
        let mut history = SessionHistory::new(keep);
        let path = self.history_path();
        match fs::read_to_string(&path).await {
            Ok(text) => {
                let mut skipped = 0usize;
                for line in text.lines().filter(|l| !l.trim().is_empty()) {
                    match serde_json::from_str::<HistoryEntry>(line) {
                        Ok(entry) => history.push(entry),
                        Err(_) => skipped += 1,
                    }
                }
                if skipped > 0 {
                    tracing::warn!(skipped, path = %path.display(), "skipped malformed history lines");
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(io_err(&path)(e)),
        }

        let path = self.stats_path();
        let stats = match fs::read_to_string(&path).await {
            Ok(text) => match serde_json::from_str::<StoredStats>(&text) {
                Ok(stats) => Some(stats),
                Err(e) => {
                    tracing::warn!(error = %e, path = %path.display(), "ignoring unreadable stats");
                    None
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(io_err(&path)(e)),
        };

        Ok((history, stats))
    }

    /// Append one entry and flush it to disk.
    pub async fn append(&self, entry: &HistoryEntry) -> Result<(), PersistError> {
        fs::create_dir_all(&self.dir).await.map_err(io_err(&self.dir))?;
        let path = self.history_path();
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(io_err(&path))?;
        file.write_all(line.as_bytes()).await.map_err(io_err(&path))?;
        file.sync_data().await.map_err(io_err(&path))?;
        Ok(())
    }

    /// Replace the counters document.
    pub async fn save_stats(&self, stats: &StoredStats) -> Result<(), PersistError> {
        fs::create_dir_all(&self.dir).await.map_err(io_err(&self.dir))?;
        let path = self.stats_path();
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(stats)?;
        fs::write(&tmp, body).await.map_err(io_err(&tmp))?;
        fs::rename(&tmp, &path).await.map_err(io_err(&path))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(n: usize) -> HistoryEntry {
        HistoryEntry {
            timestamp: Utc::now(),
            event_type: "BATTLE_SUMMARY".to_string(),
            prompt: format!("prompt {n}"),
            response: format!("response {n}"),
        }
    }

    #[tokio::test]
    async fn test_append_and_reload() {
        let dir = TempDir::new().unwrap();
        let store = HistoryStore::new(dir.path());
        for n in 0..5 {
            store.append(&entry(n)).await.unwrap();
        }

        let (history, stats) = store.load(3).await.unwrap();
        assert_eq!(history.total(), 5);
        let prompts: Vec<_> = history.recent().map(|e| e.prompt.as_str()).collect();
        assert_eq!(prompts, vec!["prompt 2", "prompt 3", "prompt 4"]);
        assert!(stats.is_none());
    }

    #[tokio::test]
    async fn test_malformed_lines_skipped() {
        let dir = TempDir::new().unwrap();
        let store = HistoryStore::new(dir.path());
        store.append(&entry(0)).await.unwrap();
        let mut raw = std::fs::read_to_string(store.history_path()).unwrap();
        raw.push_str("{truncated\n");
        std::fs::write(store.history_path(), raw).unwrap();
        store.append(&entry(1)).await.unwrap();

        let (history, _) = store.load(10).await.unwrap();
        assert_eq!(history.total(), 2);
    }

    #[tokio::test]
    async fn test_stats_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = HistoryStore::new(dir.path().join("nested"));
        let stats = StoredStats {
            session_id: "gm-12345678".to_string(),
            started_at: Utc::now(),
            updated_at: Utc::now(),
            stats: SessionStats {
                battles_won: 4,
                pokemon_caught: 1,
                close_calls: 2,
            },
        };
        store.save_stats(&stats).await.unwrap();

        let (_, loaded) = store.load(10).await.unwrap();
        assert_eq!(loaded, Some(stats));
        assert!(!store.stats_path().with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_session_id_is_stable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state").join("session_id");
        let first = load_or_create_session_id(&path).await.unwrap();
        assert!(first.starts_with("gm-"));
        assert_eq!(first.len(), 11);
        assert_eq!(load_or_create_session_id(&path).await.unwrap(), first);
    }
}
