//! Attempt and run data models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Lifecycle status of a single attempt
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    /// Created, not yet handed to the executor
    Pending,
    /// Executor is running
    Running,
    /// Finalize reported success
    Succeeded,
    /// Any phase failed
    Failed,
}

/// Rejected status change
#[derive(Debug, Error, PartialEq, Eq)]
#[error("illegal attempt transition {from:?} -> {to:?}")]
pub struct StatusError {
    pub from: AttemptStatus,
    pub to: AttemptStatus,
}

impl AttemptStatus {
    /// Whether the status can no longer change
    pub fn is_terminal(self) -> bool {
        matches!(self, AttemptStatus::Succeeded | AttemptStatus::Failed)
    }

    /// Move forward along `pending -> running -> {succeeded, failed}`
    pub fn advance(&mut self, next: AttemptStatus) -> Result<(), StatusError> {
        let allowed = matches!(
            (*self, next),
            (AttemptStatus::Pending, AttemptStatus::Running)
                | (AttemptStatus::Running, AttemptStatus::Succeeded)
                | (AttemptStatus::Running, AttemptStatus::Failed)
        );

        if allowed {
            *self = next;
            Ok(())
        } else {
            Err(StatusError {
                from: *self,
                to: next,
            })
        }
    }
}

/// One execution of the workflow, owned by the orchestrator
#[derive(Debug, Clone)]
pub struct Attempt {
    /// Launch-order index, starting at 1
    pub index: u64,
    /// Current status
    pub status: AttemptStatus,
    /// When the attempt was handed to the executor
    pub started_at: Option<DateTime<Utc>>,
}

impl Attempt {
    pub fn new(index: u64) -> Self {
        Self {
            index,
            status: AttemptStatus::Pending,
            started_at: None,
        }
    }

    /// Mark the attempt as running
    pub fn start(&mut self) -> Result<(), StatusError> {
        self.status.advance(AttemptStatus::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Close the attempt with its outcome and produce the bookkeeping record
    pub fn finish(mut self, outcome: &AttemptOutcome) -> Result<AttemptRecord, StatusError> {
        let next = if outcome.succeeded {
            AttemptStatus::Succeeded
        } else {
            AttemptStatus::Failed
        };
        self.status.advance(next)?;

        let duration_ms = self
            .started_at
            .map(|start| (Utc::now() - start).num_milliseconds().max(0) as u64);

        Ok(AttemptRecord {
            index: self.index,
            status: self.status,
            diagnostic: outcome.diagnostic.clone(),
            duration_ms,
        })
    }
}

/// Result reported by the workflow executor for one attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptOutcome {
    pub succeeded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
}

impl AttemptOutcome {
    pub fn success() -> Self {
        Self {
            succeeded: true,
            diagnostic: None,
        }
    }

    pub fn failed(diagnostic: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            diagnostic: Some(diagnostic.into()),
        }
    }
}

/// Terminal record of a resolved attempt
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttemptRecord {
    pub index: u64,
    pub status: AttemptStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// Final result of one orchestrator run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Unique run identifier
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub target_successes: u32,
    pub max_attempts: u32,
    pub concurrency_limit: u32,
    pub attempts_launched: u32,
    pub success_count: u32,
    /// Highest number of simultaneously running attempts observed
    pub peak_in_flight: u32,
    /// Resolved attempts in completion order
    #[serde(default)]
    pub attempts: Vec<AttemptRecord>,
}

impl RunSummary {
    /// Successes still missing to reach the target
    pub fn shortfall(&self) -> u32 {
        self.target_successes.saturating_sub(self.success_count)
    }

    pub fn target_met(&self) -> bool {
        self.success_count >= self.target_successes
    }

    /// Attempts that ended in failure
    pub fn failure_count(&self) -> u32 {
        self.attempts
            .iter()
            .filter(|a| a.status == AttemptStatus::Failed)
            .count() as u32
    }
}
