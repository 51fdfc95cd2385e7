//! Append-only log of successful attempts

use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// One `identity:secret` line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultRecord {
    pub identity: String,
    pub secret: String,
}

impl ResultRecord {
    pub fn new(identity: &str, secret: &str) -> Self {
        Self {
            identity: identity.to_string(),
            secret: secret.to_string(),
        }
    }

    /// Serialized line, without trailing newline
    pub fn to_line(&self) -> String {
        format!("{}:{}", self.identity, self.secret)
    }
}

/// Durable destination for successful attempts
pub trait ResultSink: Send + Sync {
    /// Append one record; called at most once per successful attempt
    fn append(&self, record: &ResultRecord) -> Result<()>;
}

/// Appends records to a text file, one per line
pub struct FileResultSink {
    path: PathBuf,
}

impl FileResultSink {
    /// Create sink, creating the parent directory if needed
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .context("Failed to create result file directory")?;
            }
        }

        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ResultSink for FileResultSink {
    fn append(&self, record: &ResultRecord) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open result file {}", self.path.display()))?;

        // Exclusive lock so concurrent runs never interleave lines
        file.lock_exclusive()
            .context("Failed to acquire write lock on result file")?;

        writeln!(file, "{}", record.to_line()).context("Failed to write result record")?;
        file.flush().context("Failed to flush result file")?;

        // Lock released when file goes out of scope
        Ok(())
    }
}

/// In-memory sink, mostly for tests and dry runs
#[derive(Default)]
pub struct MemoryResultSink {
    records: Mutex<Vec<ResultRecord>>,
}

impl MemoryResultSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ResultRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

impl ResultSink for MemoryResultSink {
    fn append(&self, record: &ResultRecord) -> Result<()> {
        self.records
            .lock()
            .map_err(|_| anyhow::anyhow!("result sink lock poisoned"))?
            .push(record.clone());
        Ok(())
    }
}
