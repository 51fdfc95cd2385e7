//! Bounded-concurrency attempt orchestration
//!
//! [`TaskOrchestrator::run`] is a single control loop. It fills free slots
//! with new attempts, then sleeps on a [`JoinSet`] until at least one attempt
//! resolves. All counters and the in-flight set are touched only by that loop,
//! so no locking is needed around them. Dropping the run aborts every attempt
//! still in flight.

use crate::models::run::{Attempt, AttemptOutcome, AttemptRecord, RunSummary, StatusError};
use crate::services::logging::log_run_summary;
use crate::workflow::executor::{panic_message, AttemptRunner};
use crate::workflow::identity::IdentityError;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::{Id, JoinError, JoinSet};
use uuid::Uuid;

/// Run-level failures; no attempt is launched when one of these is returned
#[derive(Debug, Error)]
pub enum RunError {
    #[error("invalid run limits: {0}")]
    InvalidLimits(String),

    #[error("no usable resources: {0}")]
    NoResources(String),

    #[error("attempt bookkeeping error: {0}")]
    Bookkeeping(#[from] StatusError),
}

impl From<IdentityError> for RunError {
    fn from(err: IdentityError) -> Self {
        RunError::NoResources(err.to_string())
    }
}

/// Attempt budget used when the caller does not pick one
pub fn default_max_attempts(target_successes: u32, concurrency_limit: u32) -> u32 {
    target_successes
        .saturating_mul(3)
        .max(target_successes.saturating_add(concurrency_limit))
}

/// Termination and concurrency limits of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorLimits {
    /// Stop launching once this many attempts succeeded
    pub target_successes: u32,
    /// Hard ceiling on attempts launched
    pub max_attempts: u32,
    /// Maximum attempts running at once
    pub concurrency_limit: u32,
}

impl OrchestratorLimits {
    /// Limits with the default attempt budget
    pub fn new(target_successes: u32, concurrency_limit: u32) -> Self {
        Self {
            target_successes,
            max_attempts: default_max_attempts(target_successes, concurrency_limit),
            concurrency_limit,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn validate(&self) -> Result<(), RunError> {
        if self.target_successes == 0 {
            return Err(RunError::InvalidLimits(
                "target_successes must be at least 1".to_string(),
            ));
        }
        if self.concurrency_limit == 0 {
            return Err(RunError::InvalidLimits(
                "concurrency_limit must be at least 1".to_string(),
            ));
        }
        if self.max_attempts < self.target_successes {
            return Err(RunError::InvalidLimits(format!(
                "max_attempts ({}) cannot be lower than target_successes ({})",
                self.max_attempts, self.target_successes
            )));
        }
        Ok(())
    }
}

/// Mutable state of one run, owned by the control loop
struct RunState {
    next_index: u64,
    attempts_launched: u32,
    success_count: u32,
    peak_in_flight: u32,
    /// Running attempts keyed by the task driving them
    in_flight: HashMap<Id, Attempt>,
    records: Vec<AttemptRecord>,
}

impl RunState {
    fn new() -> Self {
        Self {
            next_index: 1,
            attempts_launched: 0,
            success_count: 0,
            peak_in_flight: 0,
            in_flight: HashMap::new(),
            records: Vec::new(),
        }
    }

    fn can_launch(&self, limits: &OrchestratorLimits) -> bool {
        self.in_flight.len() < limits.concurrency_limit as usize
            && self.attempts_launched < limits.max_attempts
            && self.success_count < limits.target_successes
    }
}

/// Launches attempts until the success target or the attempt budget is reached
pub struct TaskOrchestrator {
    runner: Arc<dyn AttemptRunner>,
    limits: OrchestratorLimits,
    /// Log a progress line every this many resolved attempts
    progress_every: u32,
}

impl TaskOrchestrator {
    /// Create new orchestrator
    pub fn new(runner: Arc<dyn AttemptRunner>, limits: OrchestratorLimits) -> Self {
        Self {
            runner,
            limits,
            progress_every: limits.concurrency_limit.max(1),
        }
    }

    /// Use the batch-size hint as the progress reporting cadence
    pub fn with_progress_every(mut self, batch_size: u32) -> Self {
        self.progress_every = batch_size.max(1);
        self
    }

    pub fn limits(&self) -> OrchestratorLimits {
        self.limits
    }

    /// Drive the run to completion
    pub async fn run(&self) -> Result<RunSummary, RunError> {
        self.limits.validate()?;

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let mut tasks = JoinSet::new();
        let mut state = RunState::new();
        let mut resolved: u32 = 0;

        tracing::info!(
            run_id = %run_id,
            target = self.limits.target_successes,
            max_attempts = self.limits.max_attempts,
            concurrency = self.limits.concurrency_limit,
            "Starting run"
        );

        loop {
            while state.can_launch(&self.limits) {
                self.launch(&mut state, &mut tasks)?;
            }

            let Some(first) = tasks.join_next_with_id().await else {
                break;
            };

            // Settle every completion that is already available before refilling.
            let mut pending = Some(first);
            while let Some(joined) = pending.take().or_else(|| tasks.try_join_next_with_id()) {
                self.resolve(&mut state, joined)?;
                resolved += 1;

                if resolved % self.progress_every == 0 {
                    tracing::info!(
                        launched = state.attempts_launched,
                        succeeded = state.success_count,
                        in_flight = state.in_flight.len(),
                        "Progress"
                    );
                }
            }
        }

        let summary = RunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            target_successes: self.limits.target_successes,
            max_attempts: self.limits.max_attempts,
            concurrency_limit: self.limits.concurrency_limit,
            attempts_launched: state.attempts_launched,
            success_count: state.success_count,
            peak_in_flight: state.peak_in_flight,
            attempts: state.records,
        };

        log_run_summary(&summary);
        Ok(summary)
    }

    /// Assign the next index, mark it running and spawn its executor
    fn launch(
        &self,
        state: &mut RunState,
        tasks: &mut JoinSet<AttemptOutcome>,
    ) -> Result<(), RunError> {
        let index = state.next_index;
        state.next_index += 1;
        state.attempts_launched += 1;

        let mut attempt = Attempt::new(index);
        attempt.start()?;

        let runner = self.runner.clone();
        let handle = tasks.spawn(async move { runner.execute(index).await });
        state.in_flight.insert(handle.id(), attempt);
        state.peak_in_flight = state.peak_in_flight.max(state.in_flight.len() as u32);

        tracing::info!(
            attempt = index,
            in_flight = state.in_flight.len(),
            "Launching attempt {}/{}",
            state.attempts_launched,
            self.limits.max_attempts
        );

        Ok(())
    }

    /// Record a finished attempt and update counters
    fn resolve(
        &self,
        state: &mut RunState,
        joined: Result<(Id, AttemptOutcome), JoinError>,
    ) -> Result<(), RunError> {
        let (id, outcome) = match joined {
            Ok(done) => done,
            Err(err) => {
                let id = err.id();
                let diagnostic = if err.is_panic() {
                    format!("attempt panicked: {}", panic_message(err.into_panic().as_ref()))
                } else {
                    "attempt cancelled".to_string()
                };
                (id, AttemptOutcome::failed(diagnostic))
            }
        };

        let Some(attempt) = state.in_flight.remove(&id) else {
            tracing::warn!(task = %id, "Ignoring completion for unknown attempt");
            return Ok(());
        };
        let index = attempt.index;

        let record = attempt.finish(&outcome)?;
        if outcome.succeeded {
            state.success_count += 1;
            tracing::info!(
                attempt = index,
                "Attempt succeeded ({}/{})",
                state.success_count,
                self.limits.target_successes
            );
        } else {
            tracing::debug!(attempt = index, "Attempt resolved as failed");
        }

        state.records.push(record);
        Ok(())
    }
}
