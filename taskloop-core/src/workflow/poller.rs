//! Confirmation poller
//!
//! Repeatedly invokes a probe until it yields an artifact or the probe budget
//! runs out. Waiting happens with `tokio::time::sleep`, so other attempts keep
//! running while one is between probes.

use crate::models::configuration::PollConfig;
use std::future::Future;
use thiserror::Error;
use tokio::time::sleep;

/// Why polling ended without an artifact
#[derive(Debug, Error)]
pub enum PollError<E: std::error::Error + 'static> {
    /// Every probe came back empty
    #[error("no confirmation after {attempts} probes")]
    Timeout { attempts: u32 },

    /// The probe itself failed; polling stops at the first such error
    #[error("probe {attempt} failed: {source}")]
    Probe {
        attempt: u32,
        #[source]
        source: E,
    },
}

impl<E: std::error::Error + 'static> PollError<E> {
    pub fn is_timeout(&self) -> bool {
        matches!(self, PollError::Timeout { .. })
    }
}

/// Call `probe` up to `config.max_poll_attempts` times.
///
/// Returns the first `Some` immediately, without waiting afterwards. Between
/// empty probes the task sleeps for [`PollConfig::delay_after`]. A
/// `max_poll_attempts` of zero is treated as one probe.
pub async fn poll<T, E, F, Fut>(config: &PollConfig, mut probe: F) -> Result<T, PollError<E>>
where
    E: std::error::Error + 'static,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    let max_attempts = config.max_poll_attempts.max(1);

    for attempt in 1..=max_attempts {
        tracing::debug!("Confirmation probe {}/{}", attempt, max_attempts);

        match probe().await {
            Ok(Some(artifact)) => return Ok(artifact),
            Ok(None) => {}
            Err(source) => return Err(PollError::Probe { attempt, source }),
        }

        if attempt < max_attempts {
            sleep(config.delay_after(attempt)).await;
        }
    }

    Err(PollError::Timeout {
        attempts: max_attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[tokio::test]
    async fn test_first_probe_hit() {
        let config = PollConfig::constant(3, 0);
        let result: Result<&str, PollError<io::Error>> =
            poll(&config, || async { Ok(Some("123456")) }).await;
        assert_eq!(result.unwrap(), "123456");
    }

    #[tokio::test]
    async fn test_probe_error_is_not_timeout() {
        let config = PollConfig::constant(5, 0);
        let mut calls = 0;
        let result: Result<String, PollError<io::Error>> = poll(&config, || {
            calls += 1;
            async { Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")) }
        })
        .await;

        let err = result.unwrap_err();
        assert!(!err.is_timeout());
        assert!(matches!(err, PollError::Probe { attempt: 1, .. }));
        assert_eq!(calls, 1);
    }
}
