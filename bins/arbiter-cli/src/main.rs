mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "arbiter-cli")]
#[command(about = "Arbiter CLI - Run gradings, inspect languages, probe engine health", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a grading request from a JSON file
    Run {
        /// Path to the ExecutionRequest JSON document
        #[arg(short, long)]
        file: String,

        /// Print the full grading report as JSON
        #[arg(long, default_value = "false")]
        json: bool,

        /// Override the sandbox worker-pool size
        #[arg(long)]
        pool: Option<usize>,
    },

    /// List the supported languages
    Languages {
        /// Print the full language specs as JSON
        #[arg(long, default_value = "false")]
        json: bool,
    },

    /// Probe the execution pipeline end to end
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { file, json, pool } => {
            commands::run(&file, json, pool).await?;
        }
        Commands::Languages { json } => {
            commands::languages(json)?;
        }
        Commands::Health => {
            commands::health().await?;
        }
    }

    Ok(())
}
