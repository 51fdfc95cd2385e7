//! Workflow executor: register, await confirmation, finalize
//!
//! [`WorkflowExecutor`] runs one attempt end to end against a
//! [`WorkflowBackend`] and always resolves to an [`AttemptOutcome`]. Errors
//! from any phase are logged and folded into a failed outcome so that the
//! orchestrator never sees them.

use crate::models::configuration::PollConfig;
use crate::models::run::AttemptOutcome;
use crate::services::logging::log_attempt_failure;
use crate::workflow::identity::{Identity, IdentityError, IdentityGenerator};
use crate::workflow::poller::{poll, PollError};
use crate::workflow::result_sink::{ResultRecord, ResultSink};
use async_trait::async_trait;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;

/// Trait for anything the orchestrator can launch as an attempt
#[async_trait]
pub trait AttemptRunner: Send + Sync {
    /// Run attempt `attempt_index` to completion.
    ///
    /// Implementations must not return early on error; every failure is
    /// reported through the returned outcome. A runner that panics anyway is
    /// recorded by the orchestrator as a failed attempt.
    async fn execute(&self, attempt_index: u64) -> AttemptOutcome;
}

/// Confirmation artifact, e.g. a verification code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact(pub String);

impl Artifact {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Application-level answer of the register and finalize operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }

    /// A response only counts as success when it says so and carries no error
    pub fn is_success(&self) -> bool {
        self.success && self.error.is_none()
    }

    fn rejection_reason(&self) -> String {
        self.error
            .clone()
            .unwrap_or_else(|| "operation reported failure".to_string())
    }
}

/// Transport-level failure of a backend call
#[derive(Debug, Error)]
pub enum StepError {
    /// Connection, timeout or other I/O problem
    #[error("transport error: {0}")]
    Transport(String),

    /// Response could not be understood
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// External operations an attempt drives
#[async_trait]
pub trait WorkflowBackend: Send + Sync {
    /// Phase 1: begin registration for `identity`
    async fn register(
        &self,
        identity: &Identity,
        secret: &str,
        proxy: Option<&str>,
    ) -> Result<StepResponse, StepError>;

    /// Single-shot lookup of the confirmation artifact; `None` means not yet available
    async fn probe_confirmation(
        &self,
        identity: &Identity,
        proxy: Option<&str>,
    ) -> Result<Option<Artifact>, StepError>;

    /// Phase 3: complete registration with the received artifact
    async fn finalize(
        &self,
        identity: &Identity,
        secret: &str,
        artifact: &Artifact,
        proxy: Option<&str>,
    ) -> Result<StepResponse, StepError>;
}

/// Reasons a single attempt fails
#[derive(Debug, Error)]
pub enum AttemptError {
    #[error("identity generation failed: {0}")]
    Identity(#[from] IdentityError),

    #[error("register rejected: {0}")]
    RegisterRejected(String),

    #[error("register failed: {0}")]
    Register(#[source] StepError),

    #[error("confirmation failed: {0}")]
    Confirmation(#[from] PollError<StepError>),

    #[error("finalize rejected: {0}")]
    FinalizeRejected(String),

    #[error("finalize failed: {0}")]
    Finalize(#[source] StepError),
}

/// Read-only inputs shared by every attempt of a run
#[derive(Debug, Clone)]
pub struct AttemptContext {
    /// Secret used for every attempt in the run
    pub secret: String,
    /// Opaque proxy endpoint handed to the backend
    pub proxy: Option<String>,
    /// Confirmation poller parameters
    pub poll: PollConfig,
}

/// Runs the three-phase workflow for one attempt
pub struct WorkflowExecutor {
    backend: Arc<dyn WorkflowBackend>,
    identities: Arc<dyn IdentityGenerator>,
    sink: Arc<dyn ResultSink>,
    context: AttemptContext,
}

impl WorkflowExecutor {
    /// Create new workflow executor
    pub fn new(
        backend: Arc<dyn WorkflowBackend>,
        identities: Arc<dyn IdentityGenerator>,
        sink: Arc<dyn ResultSink>,
        context: AttemptContext,
    ) -> Self {
        Self {
            backend,
            identities,
            sink,
            context,
        }
    }

    /// Register, poll and finalize; returns the identity that was completed
    async fn run_phases(&self, attempt_index: u64) -> Result<Identity, AttemptError> {
        let identity = self.identities.generate()?;
        let proxy = self.context.proxy.as_deref();
        let secret = self.context.secret.as_str();

        tracing::info!(attempt = attempt_index, identity = %identity, "Registering");
        let registered = self
            .backend
            .register(&identity, secret, proxy)
            .await
            .map_err(AttemptError::Register)?;
        if !registered.is_success() {
            return Err(AttemptError::RegisterRejected(registered.rejection_reason()));
        }

        tracing::debug!(attempt = attempt_index, "Waiting for confirmation");
        let artifact = poll(&self.context.poll, || {
            self.backend.probe_confirmation(&identity, proxy)
        })
        .await?;

        tracing::debug!(attempt = attempt_index, "Finalizing");
        let finalized = self
            .backend
            .finalize(&identity, secret, &artifact, proxy)
            .await
            .map_err(AttemptError::Finalize)?;
        if !finalized.is_success() {
            return Err(AttemptError::FinalizeRejected(finalized.rejection_reason()));
        }

        Ok(identity)
    }

    /// Run the phases and persist the result of a successful attempt
    async fn attempt(&self, attempt_index: u64) -> AttemptOutcome {
        let identity = match self.run_phases(attempt_index).await {
            Ok(identity) => identity,
            Err(e) => {
                let diagnostic = e.to_string();
                log_attempt_failure(attempt_index, &diagnostic);
                return AttemptOutcome::failed(diagnostic);
            }
        };

        let record = ResultRecord::new(identity.as_str(), &self.context.secret);
        match self.sink.append(&record) {
            Ok(()) => {
                tracing::info!(attempt = attempt_index, identity = %identity, "Attempt succeeded");
                AttemptOutcome::success()
            }
            Err(e) => {
                // Finalize already succeeded; the attempt still counts.
                tracing::error!(
                    attempt = attempt_index,
                    identity = %identity,
                    "Result not persisted: {:#}",
                    e
                );
                AttemptOutcome {
                    succeeded: true,
                    diagnostic: Some(format!("result not persisted: {:#}", e)),
                }
            }
        }
    }
}

#[async_trait]
impl AttemptRunner for WorkflowExecutor {
    async fn execute(&self, attempt_index: u64) -> AttemptOutcome {
        match AssertUnwindSafe(self.attempt(attempt_index))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(panic) => {
                let diagnostic = format!("attempt panicked: {}", panic_message(panic.as_ref()));
                log_attempt_failure(attempt_index, &diagnostic);
                AttemptOutcome::failed(diagnostic)
            }
        }
    }
}

/// Text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
