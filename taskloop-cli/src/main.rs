mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use cli::handlers;
use taskloop_core::models::LogLevel;

#[derive(Parser)]
#[command(name = "taskloop")]
#[command(version)]
#[command(about = "Bounded-concurrency attempt orchestrator")]
#[command(
    help_template = "{name} - {version}\n{about}\n\n{usage-heading}\n  {usage}\n\n{all-args}{options}\n"
)]
struct Cli {
    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the orchestrator against the in-process simulated backend
    ///
    /// Values not given on the command line come from the config file.
    ///
    /// Examples:
    ///   taskloop simulate --target 5 --concurrency 3
    ///   taskloop simulate --target 3 --reject-every 2 --confirm-after 4 --json
    Simulate(handlers::SimulateArgs),

    /// Show finished runs, newest first
    History {
        /// Number of runs to show
        #[arg(short, long, default_value = "10")]
        limit: usize,

        /// Path to configuration file
        #[arg(long)]
        config: Option<String>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Configure taskloop settings interactively
    Config {
        /// Start interactive configuration setup
        #[arg(long)]
        init: bool,

        /// Path to configuration file
        #[arg(long)]
        config_file: Option<String>,
    },
}

impl Commands {
    /// Config file named on the command line, if any
    fn config_file(&self) -> Option<String> {
        match self {
            Commands::Simulate(args) => args.config.clone(),
            Commands::History { config, .. } => config.clone(),
            Commands::Config { config_file, .. } => config_file.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = handlers::resolve_log_level(cli.log_level, cli.command.config_file());
    if let Err(e) = taskloop_core::services::logging::init_logging(log_level) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    match cli.command {
        Commands::Simulate(args) => {
            handlers::handle_simulate(args).await?;
        }
        Commands::History {
            limit,
            config,
            json,
        } => {
            handlers::handle_history(limit, config, json)?;
        }
        Commands::Config { init, config_file } => {
            if init {
                handlers::handle_config_init(config_file)?;
            } else {
                println!("Config command requires --init flag");
                println!("Usage: taskloop config --init [--config-file PATH]");
            }
        }
    }

    Ok(())
}
