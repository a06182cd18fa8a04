// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use courier_core::domain::node_config::CourierConfigManifest;

const SAMPLE_CONFIG: &str = include_str!("../../templates/courier-config.yaml");

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path
        #[arg(short, long, default_value = "./courier-config.yaml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

pub async fn handle_command(command: ConfigCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths),
        ConfigCommand::Validate { file } => validate(file.or(config_override)),
        ConfigCommand::Generate { output, force } => generate(output, force),
    }
}

fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = CourierConfigManifest::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        match &config_override {
            Some(path) => println!("  1. --config flag: {}", path.display()),
            None => println!("  1. --config flag: {}", "(not set)".dimmed()),
        }
        println!(
            "  2. COURIER_CONFIG_PATH: {}",
            std::env::var("COURIER_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./courier-config.yaml");
        println!("  4. ~/.courier/config.yaml");
        println!("  5. /etc/courier/config.yaml");
        println!();
    }

    let spec = &config.spec;
    println!("{}", "Current configuration:".bold());
    println!();

    println!("{}", "Node Identity:".bold());
    println!("  Name: {}", config.metadata.name);
    println!("  Agent ID: {}", spec.node.agent_id);
    println!("  Endpoint: {}:{}", spec.node.base_url, spec.network.port);
    if !spec.node.capabilities.is_empty() {
        println!("  Capabilities: {}", spec.node.capabilities.join(", "));
    }
    println!();

    println!("{}", "Storage:".bold());
    println!("  Backend: {}", spec.storage.backend);
    if spec.storage.backend == "sqlite" {
        println!("  Path: {}", spec.storage.path);
        println!("  Max connections: {}", spec.pool.max_connections);
    }
    println!();

    println!("{}", "Delegation:".bold());
    println!("  Task timeout: {}s", spec.delegation.task_timeout().as_secs());
    println!("  Sweep interval: {}s", spec.delegation.sweep_interval().as_secs());
    println!("  Max pending per agent: {}", spec.delegation.max_pending_per_agent());
    println!();

    println!("{}", "Peer Registry:".bold());
    println!("  Stale after: {}s", spec.registry.stale_after().as_secs());
    println!("  Reap orphans: {}", spec.registry.reap_orphans);
    println!();

    println!("{}", "Auth:".bold());
    let token_state = if spec.auth.resolve_token().is_some() {
        "set".green()
    } else {
        "not set".red()
    };
    println!("  Token env: {} ({})", spec.auth.token_env, token_state);
    println!("  Require inbound: {}", spec.auth.require_inbound);
    println!();

    Ok(())
}

fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = CourierConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;

    config
        .validate()
        .context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

fn generate(output: PathBuf, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", output.display());
    }

    std::fs::write(&output, SAMPLE_CONFIG)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}
