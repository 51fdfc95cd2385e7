//! Logging service

use crate::models::{LogLevel, RunSummary};
use tracing_subscriber::EnvFilter;

/// Initialize logging with the specified level.
///
/// `RUST_LOG` takes precedence over `level` when it is set.
pub fn init_logging(level: LogLevel) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("taskloop={0},taskloop_core={0}", level)))?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init()?;

    Ok(())
}

/// Log a contained attempt failure
pub fn log_attempt_failure(attempt: u64, diagnostic: &str) {
    tracing::warn!(attempt = attempt, diagnostic = diagnostic, "Attempt failed");
}

/// Log the final outcome of a run
pub fn log_run_summary(summary: &RunSummary) {
    tracing::info!(
        run_id = %summary.run_id,
        launched = summary.attempts_launched,
        succeeded = summary.success_count,
        shortfall = summary.shortfall(),
        peak_in_flight = summary.peak_in_flight,
        "Run finished"
    );

    if !summary.target_met() {
        tracing::warn!(
            shortfall = summary.shortfall(),
            "Target not reached; consider raising concurrency or the attempt budget"
        );
    }
}
