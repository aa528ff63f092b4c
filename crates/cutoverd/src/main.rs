//! cutoverd — the cutover daemon and operator tool.
//!
//! Single binary that assembles the control plane:
//! - State store (redb): flag record, flag audit log, record tables
//! - Flag store
//! - Rollout controller
//! - Health monitor
//!
//! # Usage
//!
//! ```text
//! cutoverd --config cutover.toml run --auto-advance
//! cutoverd status
//! cutoverd rollback --reason "error budget exhausted"
//! cutoverd reset --operator alice
//! ```

mod daemon;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use daemon::Components;

const DEFAULT_LOG_FILTER: &str = "info,cutoverd=debug,cutover=debug";

#[derive(Parser)]
#[command(name = "cutoverd", about = "Gradual migration rollout controller")]
struct Cli {
    /// Path to cutover.toml.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory for the state store.
    #[arg(long, global = true, default_value = "/var/lib/cutover")]
    data_dir: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the health monitor and rollout metrics loop until interrupted.
    Run {
        /// Advance through every phase automatically.
        #[arg(long)]
        auto_advance: bool,
    },
    /// Print flags, phase and a fresh health evaluation as JSON.
    Status {
        /// Number of recent flag changes to include.
        #[arg(long, default_value = "10")]
        audit: usize,
    },
    /// Advance one phase and soak it.
    Advance,
    /// Roll every migrated path back to legacy.
    Rollback {
        #[arg(long)]
        reason: String,
    },
    /// Clear an emergency rollback. Migrated paths stay disabled.
    Reset {
        #[arg(long)]
        operator: String,
    },
    /// Seed the local record tables.
    Seed {
        #[arg(long, default_value = "100")]
        legacy: usize,
        #[arg(long, default_value = "0")]
        migrated: usize,
    },
    /// Print the loaded configuration as TOML.
    Config,
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = daemon::load_config(cli.config.as_deref())?;
    if let Command::Config = cli.command {
        print!("{}", config.to_toml_string()?);
        return Ok(());
    }

    let state = daemon::open_state(&config, &cli.data_dir)?;
    let components = Components::assemble(&config, state)?;

    match cli.command {
        Command::Run { auto_advance } => daemon::run(components, auto_advance).await,
        Command::Status { audit } => {
            let report = daemon::status(&components, audit).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Advance => {
            match components.controller.advance_to_next_phase().await? {
                Some(phase) => info!(percentage = phase.percentage, "advanced to {}", phase.description),
                None => info!("already at the final phase"),
            }
            Ok(())
        }
        Command::Rollback { reason } => {
            components.controller.emergency_rollback(&reason).await?;
            println!("{}", serde_json::to_string_pretty(&components.flags.get_flags().await)?);
            Ok(())
        }
        Command::Reset { operator } => {
            let flags = components.flags.clear_emergency_rollback(&operator).await?;
            println!("{}", serde_json::to_string_pretty(&flags)?);
            Ok(())
        }
        Command::Seed { legacy, migrated } => daemon::seed(&components.state, legacy, migrated),
        Command::Config => Ok(()),
    }
}
