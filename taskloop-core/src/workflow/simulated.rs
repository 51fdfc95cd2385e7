//! In-process backend with deterministic behaviour
//!
//! Used by `taskloop simulate` and by tests to drive the full orchestrator
//! without any network traffic.

use crate::workflow::executor::{Artifact, StepError, StepResponse, WorkflowBackend};
use crate::workflow::identity::Identity;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::sleep;
use uuid::Uuid;

#[derive(Debug)]
struct Pending {
    code: String,
    probes: u32,
    finalized: bool,
}

/// Backend behaviour knobs
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Reject every N-th registration (1-based); never when `None`
    pub reject_every: Option<u64>,
    /// Probe on which the confirmation code becomes visible
    pub confirm_after: u32,
    /// Artificial latency added to every call
    pub latency: Duration,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            reject_every: None,
            confirm_after: 1,
            latency: Duration::ZERO,
        }
    }
}

pub struct SimulatedBackend {
    config: SimulationConfig,
    registrations: AtomicU64,
    pending: Mutex<HashMap<Identity, Pending>>,
}

impl SimulatedBackend {
    pub fn new(config: SimulationConfig) -> Self {
        Self {
            config,
            registrations: AtomicU64::new(0),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Number of identities that completed finalize
    pub fn finalized_count(&self) -> usize {
        self.pending
            .lock()
            .map(|pending| pending.values().filter(|p| p.finalized).count())
            .unwrap_or(0)
    }

    async fn delay(&self) {
        if !self.config.latency.is_zero() {
            sleep(self.config.latency).await;
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<Identity, Pending>>, StepError> {
        self.pending
            .lock()
            .map_err(|_| StepError::Transport("simulated backend state poisoned".to_string()))
    }
}

#[async_trait]
impl WorkflowBackend for SimulatedBackend {
    async fn register(
        &self,
        identity: &Identity,
        _secret: &str,
        _proxy: Option<&str>,
    ) -> Result<StepResponse, StepError> {
        self.delay().await;

        let n = self.registrations.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(every) = self.config.reject_every {
            if every > 0 && n % every == 0 {
                return Ok(StepResponse::rejected("registration refused"));
            }
        }

        let mut pending = self.lock()?;
        if pending.contains_key(identity) {
            return Ok(StepResponse::rejected("identity already registered"));
        }

        let code = format!("{:06}", Uuid::new_v4().as_u128() % 1_000_000);
        pending.insert(
            identity.clone(),
            Pending {
                code,
                probes: 0,
                finalized: false,
            },
        );

        Ok(StepResponse::ok())
    }

    async fn probe_confirmation(
        &self,
        identity: &Identity,
        _proxy: Option<&str>,
    ) -> Result<Option<Artifact>, StepError> {
        self.delay().await;

        let mut pending = self.lock()?;
        let entry = pending
            .get_mut(identity)
            .ok_or_else(|| StepError::Malformed(format!("unknown identity {}", identity)))?;

        entry.probes += 1;
        if entry.probes >= self.config.confirm_after {
            Ok(Some(Artifact(entry.code.clone())))
        } else {
            Ok(None)
        }
    }

    async fn finalize(
        &self,
        identity: &Identity,
        _secret: &str,
        artifact: &Artifact,
        _proxy: Option<&str>,
    ) -> Result<StepResponse, StepError> {
        self.delay().await;

        let mut pending = self.lock()?;
        match pending.get_mut(identity) {
            Some(entry) if entry.code == artifact.as_str() && !entry.finalized => {
                entry.finalized = true;
                Ok(StepResponse::ok())
            }
            Some(_) => Ok(StepResponse::rejected("invalid confirmation code")),
            None => Err(StepError::Malformed(format!("unknown identity {}", identity))),
        }
    }
}
