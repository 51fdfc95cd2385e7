//! CLI command handlers

use anyhow::{Context, Result};
use clap::Args;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use taskloop_core::models::{Configuration, LogLevel, RunSummary};
use taskloop_core::workflow::{
    AttemptContext, DomainPoolGenerator, FileResultSink, OrchestratorLimits, RunError, RunHistory,
    SimulatedBackend, SimulationConfig, TaskOrchestrator, WorkflowExecutor,
};

/// Arguments of the `simulate` command
#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Number of successful attempts to reach
    #[arg(short, long)]
    pub target: Option<u32>,

    /// Maximum attempts running at once
    #[arg(short, long)]
    pub concurrency: Option<u32>,

    /// Attempt budget (default: max(target * 3, target + concurrency))
    #[arg(long)]
    pub max_attempts: Option<u32>,

    /// Report progress every N resolved attempts
    #[arg(long)]
    pub batch_size: Option<u32>,

    /// Secret shared by every attempt (random when omitted)
    #[arg(long)]
    pub secret: Option<String>,

    /// Opaque proxy endpoint handed to the backend
    #[arg(long)]
    pub proxy: Option<String>,

    /// Simulated backend refuses every N-th registration
    #[arg(long)]
    pub reject_every: Option<u64>,

    /// Probe on which the simulated confirmation code appears
    #[arg(long, default_value = "1")]
    pub confirm_after: u32,

    /// Simulated latency per backend call in milliseconds
    #[arg(long, default_value = "0")]
    pub latency_ms: u64,

    /// Path to configuration file
    #[arg(long)]
    pub config: Option<String>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Resolve the config path, expanding `~/` and falling back to the XDG default
fn resolve_config_path(config_file: Option<String>) -> Result<PathBuf> {
    match config_file {
        Some(path) if path.starts_with("~/") => {
            let home = dirs::home_dir().context("Could not determine home directory")?;
            Ok(home.join(&path[2..]))
        }
        Some(path) => Ok(PathBuf::from(path)),
        None => Configuration::default_config_path(),
    }
}

fn load_config(config_file: Option<String>) -> Result<Configuration> {
    let path = resolve_config_path(config_file)?;
    tracing::debug!(path = %path.display(), "Loading configuration");
    Configuration::load_from_file(&path)
}

/// Pick the log level: the command-line flag wins, then the config file
pub fn resolve_log_level(flag: Option<LogLevel>, config_file: Option<String>) -> LogLevel {
    if let Some(level) = flag {
        return level;
    }

    match load_config(config_file) {
        Ok(config) => config.log_level,
        Err(e) => {
            eprintln!("⚠️  Could not read log level from config: {:#}", e);
            LogLevel::default()
        }
    }
}

/// Apply command-line overrides on top of file configuration
fn apply_overrides(config: &mut Configuration, args: &SimulateArgs) {
    if let Some(target) = args.target {
        config.target_successes = target;
    }
    if let Some(concurrency) = args.concurrency {
        config.concurrency_limit = concurrency;
    }
    if args.max_attempts.is_some() {
        config.max_attempts = args.max_attempts;
    }
    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }
}

/// Handle the 'simulate' command
pub async fn handle_simulate(args: SimulateArgs) -> Result<()> {
    let mut config = load_config(args.config.clone())?;
    apply_overrides(&mut config, &args);

    config.validate().map_err(|errors| {
        anyhow::anyhow!("Invalid configuration:\n  - {}", errors.join("\n  - "))
    })?;

    // Fatal before any attempt is launched
    let identities = DomainPoolGenerator::new(config.domains.clone()).map_err(RunError::from)?;

    let mut limits = OrchestratorLimits::new(config.target_successes, config.concurrency_limit);
    if let Some(max_attempts) = config.max_attempts {
        limits = limits.with_max_attempts(max_attempts);
    }

    let secret = args
        .secret
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());

    let backend = Arc::new(SimulatedBackend::new(SimulationConfig {
        reject_every: args.reject_every,
        confirm_after: args.confirm_after,
        latency: Duration::from_millis(args.latency_ms),
    }));
    let sink = Arc::new(
        FileResultSink::new(&config.result_file).context("Failed to open result file")?,
    );
    let executor = WorkflowExecutor::new(
        backend,
        Arc::new(identities),
        sink,
        AttemptContext {
            secret,
            proxy: args.proxy.clone(),
            poll: config.poll.clone(),
        },
    );

    if !args.json {
        println!(
            "🚀 Starting run: target {}, concurrency {}, budget {}",
            limits.target_successes, limits.concurrency_limit, limits.max_attempts
        );
    }

    let summary = TaskOrchestrator::new(Arc::new(executor), limits)
        .with_progress_every(config.batch_size)
        .run()
        .await?;

    let history = RunHistory::new(&config.history_file)
        .context("Failed to initialize run history")?;
    history
        .record_run(summary.clone())
        .context("Failed to record run history")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary_json(&summary))?);
    } else {
        print!("{}", format_summary(&summary));
        println!("   Results: {}", config.result_file.display());
    }

    Ok(())
}

/// JSON view of a run summary
fn summary_json(summary: &RunSummary) -> serde_json::Value {
    serde_json::json!({
        "run_id": summary.run_id.to_string(),
        "attempts_launched": summary.attempts_launched,
        "success_count": summary.success_count,
        "target_successes": summary.target_successes,
        "max_attempts": summary.max_attempts,
        "shortfall": summary.shortfall(),
        "peak_in_flight": summary.peak_in_flight,
        "started_at": summary.started_at.to_rfc3339(),
        "finished_at": summary.finished_at.to_rfc3339(),
    })
}

/// Human-readable final report
fn format_summary(summary: &RunSummary) -> String {
    let mut out = String::new();
    out.push_str("\nRun Summary\n");
    out.push_str("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n");
    out.push_str(&format!("   Run ID: {}\n", summary.run_id));
    out.push_str(&format!("   Attempts launched: {}\n", summary.attempts_launched));
    out.push_str(&format!(
        "   Successes: {}/{}\n",
        summary.success_count, summary.target_successes
    ));

    if summary.target_met() {
        out.push_str("✅ Target reached\n");
    } else {
        out.push_str(&format!(
            "⚠️  Short of target by {}. Try raising --concurrency or --max-attempts.\n",
            summary.shortfall()
        ));
    }

    out
}

/// Handle the 'history' command
pub fn handle_history(limit: usize, config_file: Option<String>, json: bool) -> Result<()> {
    let config = load_config(config_file)?;
    let history =
        RunHistory::new(&config.history_file).context("Failed to initialize run history")?;
    let runs = history.recent_runs(limit);

    if json {
        let output: Vec<serde_json::Value> = runs.iter().map(summary_json).collect();
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    if runs.is_empty() {
        println!("No runs recorded yet.");
        return Ok(());
    }

    println!("Run History");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for run in &runs {
        let marker = if run.target_met() { "✅" } else { "⚠️ " };
        println!(
            "{} {}  {}  {}/{} succeeded, {} launched",
            marker,
            run.started_at.format("%Y-%m-%d %H:%M:%S"),
            run.run_id,
            run.success_count,
            run.target_successes,
            run.attempts_launched
        );
    }

    Ok(())
}

/// Read one line and parse it, keeping `current` on empty or invalid input
fn prompt_value<T, R>(input: &mut R, label: &str, current: T) -> Result<T>
where
    T: FromStr + std::fmt::Display,
    R: BufRead,
{
    print!("{} [{}]: ", label, current);
    io::stdout().flush()?;

    let mut line = String::new();
    input.read_line(&mut line)?;
    let trimmed = line.trim();

    if trimmed.is_empty() {
        return Ok(current);
    }

    match trimmed.parse::<T>() {
        Ok(value) => Ok(value),
        Err(_) => {
            println!("⚠️  Invalid value, using default");
            Ok(current)
        }
    }
}

/// Prompt for every run parameter, reading answers from `input`
fn prompt_configuration<R: BufRead>(input: &mut R, mut config: Configuration) -> Result<Configuration> {
    config.target_successes = prompt_value(input, "Target successes", config.target_successes)?;
    config.concurrency_limit = prompt_value(input, "Concurrency limit", config.concurrency_limit)?;

    let budget_default = config.max_attempts.unwrap_or(0);
    let budget = prompt_value(input, "Attempt budget (0 = derived)", budget_default)?;
    config.max_attempts = if budget == 0 { None } else { Some(budget) };

    config.batch_size = prompt_value(input, "Progress batch size", config.batch_size)?;

    let domains = prompt_value(input, "Domains (comma separated)", config.domains.join(","))?;
    config.domains = domains
        .split(',')
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
        .collect();

    config.poll.max_poll_attempts =
        prompt_value(input, "Confirmation probes", config.poll.max_poll_attempts)?;
    config.poll.poll_interval_ms =
        prompt_value(input, "Probe interval in ms", config.poll.poll_interval_ms)?;
    config.log_level = prompt_value(input, "Log level", config.log_level)?;

    Ok(config)
}

/// Handle the 'config --init' command
pub fn handle_config_init(config_file: Option<String>) -> Result<()> {
    println!("⚙️  Initializing taskloop configuration");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let config_path = resolve_config_path(config_file)?;
    println!("📄 Config file: {}", config_path.display());

    let config = if config_path.exists() {
        println!("⚠️  Configuration file already exists. Loading existing values...");
        Configuration::load_from_file(&config_path).context("Failed to load existing config")?
    } else {
        println!("✨ Creating new configuration with defaults...");
        Configuration::default()
    };

    println!("\n📝 Please answer the following questions (press Enter to use default):\n");
    let stdin = io::stdin();
    let config = prompt_configuration(&mut stdin.lock(), config)?;

    println!("\n🔍 Validating configuration...");
    match config.validate() {
        Ok(()) => println!("✅ Configuration is valid"),
        Err(errors) => {
            println!("❌ Configuration has errors:");
            for error in &errors {
                println!("   - {}", error);
            }
            return Err(anyhow::anyhow!("Configuration validation failed"));
        }
    }

    config.save_to_file(&config_path)?;
    println!("💾 Saved configuration to {}", config_path.display());

    Ok(())
}
