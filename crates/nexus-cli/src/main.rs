//! nexus CLI
//!
//! Command-line interface for submitting tasks to the swarm and managing
//! which models are resident on the GPU.

mod commands;

use clap::{Parser, Subcommand};
use nexus_core::NexusConfig;
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// nexus - submit tasks and manage GPU residency for the local swarm
#[derive(Parser, Debug)]
#[command(name = "nexus")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Publish a task and wait for its result
    Submit {
        /// Task text
        task: String,

        /// Seconds to wait for the result
        #[arg(long, default_value_t = 300)]
        timeout: u64,
    },

    /// Show resident models and memory use
    Ps,

    /// Unload every resident model except the given ones
    Unload {
        /// Model to keep (prefix match, repeatable)
        #[arg(long)]
        keep: Vec<String>,
    },

    /// Hibernate: keep only the sentinel model resident
    Sentry,

    /// Free all GPU memory before a generation job
    Clear,

    /// Show which tier a task would be routed to
    Classify {
        /// Task text
        text: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    let mut config = match &cli.config {
        Some(path) => NexusConfig::from_file(path)?,
        None => NexusConfig::default(),
    };
    config.apply_env();

    match cli.command {
        Commands::Submit { task, timeout } => {
            commands::submit(&config, task, timeout).await?;
        }
        Commands::Ps => {
            commands::ps(&config).await?;
        }
        Commands::Unload { keep } => {
            commands::unload(&config, keep).await?;
        }
        Commands::Sentry => {
            commands::sentry(&config).await?;
        }
        Commands::Clear => {
            commands::clear(&config).await?;
        }
        Commands::Classify { text } => {
            commands::classify(&config, &text);
        }
    }

    Ok(())
}
