// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::{Path, PathBuf};

use oim_core::domain::controller_config::ControllerConfigManifest;

const MINIMAL_TEMPLATE: &str = include_str!("../../templates/controller-minimal.yaml");
const EXAMPLES_TEMPLATE: &str = include_str!("../../templates/controller-with-examples.yaml");

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show the effective configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,

        /// Print the full manifest as YAML
        #[arg(long)]
        yaml: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path (default: ./oim-controller.yaml)
        #[arg(short, long, default_value = "./oim-controller.yaml")]
        output: PathBuf,

        /// Include examples and comments
        #[arg(long)]
        examples: bool,
    },
}

pub async fn handle_command(
    command: ConfigCommand,
    config_override: Option<PathBuf>,
) -> Result<()> {
    match command {
        ConfigCommand::Show { paths, yaml } => show(config_override, paths, yaml),
        ConfigCommand::Validate { file } => validate(file.or(config_override)),
        ConfigCommand::Generate { output, examples } => generate(&output, examples),
    }
}

fn show(config_override: Option<PathBuf>, show_paths: bool, as_yaml: bool) -> Result<()> {
    let config = ControllerConfigManifest::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        match &config_override {
            Some(path) => println!("  1. --config flag: {}", path.display()),
            None => println!("  1. --config flag: {}", "(not set)".dimmed()),
        }
        println!(
            "  2. OIM_CONFIG_PATH: {}",
            std::env::var("OIM_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./oim-controller.yaml");
        println!("  4. ~/.oim/controller.yaml");
        println!("  5. /etc/oim/controller.yaml");
        println!();
    }

    if as_yaml {
        print!("{}", serde_yaml::to_string(&config)?);
        return Ok(());
    }

    let spec = &config.spec;
    let unset = || "(not set)".dimmed().to_string();

    println!("{}", "Controller:".bold());
    println!("  ID: {}", spec.controller.id);
    println!(
        "  Address: {}",
        spec.controller.address.clone().unwrap_or_else(unset)
    );
    println!();

    println!("{}", "Backend:".bold());
    println!(
        "  SPDK socket: {}",
        spec.backend
            .socket_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(unset)
    );
    println!(
        "  vhost controller: {}",
        spec.vhost.controller_name.clone().unwrap_or_else(unset)
    );
    println!(
        "  PCI address: {}",
        spec.vhost.pci_address.clone().unwrap_or_else(unset)
    );
    println!();

    println!("{}", "Registry:".bold());
    println!(
        "  Endpoint: {}",
        spec.registry.endpoint.clone().unwrap_or_else(unset)
    );
    println!("  Delay: {}s", spec.registry.delay_seconds);
    println!();

    println!("{}", "Server:".bold());
    println!("  Listen: {}:{}", spec.server.bind_address, spec.server.port);
    println!(
        "  TLS: {}",
        if spec.server.tls.is_some() { "configured" } else { "disabled" }
    );
    println!();

    Ok(())
}

fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = ControllerConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;

    config
        .validate()
        .context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

fn generate(output: &Path, with_examples: bool) -> Result<()> {
    let sample = if with_examples {
        EXAMPLES_TEMPLATE
    } else {
        MINIMAL_TEMPLATE
    };

    std::fs::write(output, sample)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}
