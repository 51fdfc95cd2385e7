//! Run history persistence using JSON file storage

use crate::models::run::RunSummary;
use anyhow::{Context, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

/// Root JSON store
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HistoryStore {
    /// Finished runs, oldest first
    pub runs: Vec<RunSummary>,
}

/// Stores summaries of finished runs
pub struct RunHistory {
    /// Path to JSON store file
    store_path: PathBuf,
    /// In-memory copy of the store
    store: Mutex<HistoryStore>,
}

impl RunHistory {
    /// Open the history, creating the parent directory if needed
    pub fn new<P: AsRef<Path>>(store_path: P) -> Result<Self> {
        let store_path = store_path.as_ref().to_path_buf();

        if let Some(parent) = store_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .context("Failed to create run history directory")?;
            }
        }

        let store = if store_path.exists() {
            Self::load_store(&store_path)?
        } else {
            HistoryStore::default()
        };

        Ok(Self {
            store_path,
            store: Mutex::new(store),
        })
    }

    /// Load JSON store from file with file locking
    fn load_store(path: &Path) -> Result<HistoryStore> {
        let file = File::open(path).context("Failed to open run history file")?;

        file.lock_shared()
            .context("Failed to acquire read lock on run history")?;

        let mut contents = String::new();
        let mut reader = std::io::BufReader::new(file);
        reader
            .read_to_string(&mut contents)
            .context("Failed to read run history")?;

        // Release lock
        drop(reader);

        if contents.trim().is_empty() {
            return Ok(HistoryStore::default());
        }

        serde_json::from_str(&contents).context("Failed to parse run history JSON")
    }

    /// Append a finished run.
    ///
    /// The file is re-read under an exclusive lock so runs recorded by other
    /// processes since this history was opened are kept.
    pub fn record_run(&self, summary: RunSummary) -> Result<()> {
        let mut store = self
            .store
            .lock()
            .map_err(|_| anyhow::anyhow!("run history lock poisoned"))?;

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.store_path)
            .context("Failed to open run history file for writing")?;

        file.lock_exclusive()
            .context("Failed to acquire write lock on run history")?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .context("Failed to read run history")?;
        let mut on_disk: HistoryStore = if contents.trim().is_empty() {
            HistoryStore::default()
        } else {
            serde_json::from_str(&contents).context("Failed to parse run history JSON")?
        };
        on_disk.runs.push(summary);

        let json =
            serde_json::to_string_pretty(&on_disk).context("Failed to serialize run history")?;
        file.set_len(0).context("Failed to truncate run history")?;
        file.seek(SeekFrom::Start(0))
            .context("Failed to rewind run history")?;
        file.write_all(json.as_bytes())
            .context("Failed to write run history")?;
        file.flush().context("Failed to flush run history to disk")?;

        *store = on_disk;
        Ok(())
    }

    /// Most recent runs first, at most `limit`
    pub fn recent_runs(&self, limit: usize) -> Vec<RunSummary> {
        self.store
            .lock()
            .map(|store| store.runs.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    /// Look up a run by ID
    pub fn get_run(&self, run_id: Uuid) -> Option<RunSummary> {
        self.store
            .lock()
            .ok()?
            .runs
            .iter()
            .find(|r| r.run_id == run_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.store.lock().map(|store| store.runs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::tempdir;

    fn summary(success_count: u32) -> RunSummary {
        RunSummary {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            target_successes: 3,
            max_attempts: 9,
            concurrency_limit: 2,
            attempts_launched: 5,
            success_count,
            peak_in_flight: 2,
            attempts: vec![],
        }
    }

    #[test]
    fn test_history_initialization() {
        let dir = tempdir().unwrap();
        let store_path = dir.path().join("history.json");

        let history = RunHistory::new(&store_path).unwrap();
        assert!(history.is_empty());
        assert!(!store_path.exists());
    }

    #[test]
    fn test_record_and_reload() {
        let dir = tempdir().unwrap();
        let store_path = dir.path().join("history.json");

        let first = summary(1);
        let second = summary(3);
        let second_id = second.run_id;
        {
            let history = RunHistory::new(&store_path).unwrap();
            history.record_run(first).unwrap();
            history.record_run(second).unwrap();
        }

        let reloaded = RunHistory::new(&store_path).unwrap();
        assert_eq!(reloaded.len(), 2);

        let recent = reloaded.recent_runs(1);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].run_id, second_id);
        assert_eq!(reloaded.get_run(second_id).unwrap().success_count, 3);
    }

    #[test]
    fn test_concurrent_writers_keep_both_runs() {
        let dir = tempdir().unwrap();
        let store_path = dir.path().join("history.json");

        // Both opened before either writes
        let first = RunHistory::new(&store_path).unwrap();
        let second = RunHistory::new(&store_path).unwrap();
        let first_run = summary(1);
        let first_id = first_run.run_id;
        first.record_run(first_run).unwrap();
        second.record_run(summary(2)).unwrap();

        assert_eq!(second.len(), 2);
        assert!(second.get_run(first_id).is_some());
        assert_eq!(RunHistory::new(&store_path).unwrap().len(), 2);
    }

    #[test]
    fn test_empty_file_is_empty_history() {
        let dir = tempdir().unwrap();
        let store_path = dir.path().join("history.json");
        std::fs::write(&store_path, "").unwrap();

        assert!(RunHistory::new(&store_path).unwrap().is_empty());
    }
}
