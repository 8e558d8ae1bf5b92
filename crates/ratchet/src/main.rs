//! Ratchet - tool-calling agent engine

use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{init_command, run_command, status_command};

/// Ratchet - drive a model through tools until the task is done
#[derive(Parser)]
#[command(name = "ratchet")]
#[command(about = "A tool-calling agent engine for your terminal")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize config and workspace
    Init,
    /// Run a task with the agent
    Run {
        /// Task to run; omit for interactive mode
        #[arg(short, long)]
        message: Option<String>,
        /// Verbose logging
        #[arg(short, long)]
        verbose: bool,
    },
    /// Show configuration status
    Status,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if matches!(cli.command, Commands::Run { verbose: true, .. }) {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Init => {
            if let Err(e) = init_command().await {
                error!("Init failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Commands::Run {
            message,
            verbose: _,
        } => {
            if let Err(e) = run_command(message).await {
                error!("Run failed: {:#}", e);
                eprintln!("Error: {:#}", e);
                std::process::exit(1);
            }
        }
        Commands::Status => {
            if let Err(e) = status_command().await {
                error!("Status failed: {:#}", e);
                std::process::exit(1);
            }
        }
    }
}
