// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # OIM Controller
//!
//! The `oim-controller` binary runs one controller per storage host. It
//! connects to the local SPDK daemon, serves the volume API over HTTP and
//! keeps its address announced in the registry.
//!
//! ## Commands
//!
//! - `oim-controller run` (default) - Serve until SIGINT/SIGTERM
//! - `oim-controller config show|validate|generate` - Configuration management

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod server;

use commands::ConfigCommand;
use oim_core::domain::controller_config::ControllerConfigManifest;

/// OIM Controller - Map storage volumes into vhost SCSI controllers
#[derive(Parser)]
#[command(name = "oim-controller")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "OIM_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long, global = true, env = "OIM_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the controller (default)
    #[command(name = "run")]
    Run,

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let config = ControllerConfigManifest::load_or_default(cli.config)
                .context("Failed to load configuration")?;
            let logging = config
                .spec
                .observability
                .as_ref()
                .and_then(|o| o.logging.clone())
                .unwrap_or_default();
            let level = cli.log_level.unwrap_or(logging.level);
            init_logging(&level, &logging.format)?;

            server::run(config).await
        }
        Commands::Config { command } => {
            init_logging(cli.log_level.as_deref().unwrap_or("warn"), "text")?;
            commands::config::handle_command(command, cli.config).await
        }
    }
}

/// Initialize tracing subscriber for logging. `RUST_LOG` wins over `level`.
fn init_logging(level: &str, format: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    match format {
        "json" => builder.json().with_target(true).init(),
        "text" => builder.with_target(false).compact().init(),
        other => anyhow::bail!("Unknown log format '{}'. Expected 'text' or 'json'", other),
    }

    Ok(())
}
