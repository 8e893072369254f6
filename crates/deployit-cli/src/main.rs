//! DeployIt CLI tool.

use clap::{Parser, Subcommand};
use deployit_core::deployer::DeployerKind;
use deployit_core::state::Operation;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "deployit")]
#[command(about = "DeployIt IaC deployment CLI", long_about = None)]
struct Cli {
    /// System configuration file
    #[arg(long, env = "DEPLOYIT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one operation in-process and print the result
    Run {
        /// Service descriptor (JSON)
        #[arg(long)]
        descriptor: PathBuf,
        /// Deploy request (JSON)
        #[arg(long)]
        request: PathBuf,
        /// deploy, retry, modify, destroy, rollback or purge
        #[arg(long, default_value = "deploy", value_parser = commands::parse_operation)]
        operation: Operation,
        /// Tool state left by an earlier run, needed for destroy and modify
        #[arg(long)]
        tool_state: Option<PathBuf>,
        /// Write the resulting tool state here
        #[arg(long)]
        state_out: Option<PathBuf>,
        #[arg(long, default_value = "default")]
        namespace: String,
    },
    /// List available tool versions
    Versions {
        /// Only this deployer kind
        #[arg(long, value_parser = commands::parse_kind)]
        kind: Option<DeployerKind>,
        /// Fetch from the release feeds instead of using cached data
        #[arg(long)]
        refresh: bool,
    },
    /// Validate a system configuration file
    ValidateConfig {
        /// Path to the configuration file
        #[arg(default_value = "deployit.kdl")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            descriptor,
            request,
            operation,
            tool_state,
            state_out,
            namespace,
        } => {
            let args = commands::run::RunArgs {
                descriptor,
                request,
                operation,
                tool_state,
                state_out,
                namespace,
            };
            commands::run::run(cli.config.as_deref(), args).await?;
        }
        Commands::Versions { kind, refresh } => {
            commands::versions(cli.config.as_deref(), kind, refresh).await?;
        }
        Commands::ValidateConfig { path } => {
            commands::validate_config(&path)?;
        }
    }

    Ok(())
}
