// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Courier Node CLI
//!
//! The `courier` binary hosts one A2A node: it accepts delegated tasks over
//! HTTP, tracks them through their lifecycle, and delegates work to peers.
//!
//! ## Commands
//!
//! - `courier serve` (or `courier --daemon`) - Run the node in the foreground
//! - `courier status` - Query a running node's health endpoint
//! - `courier delegate --agent <id> <text>` - Hand a task to a registered peer
//! - `courier config show|validate|generate` - Configuration management

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing::info;

use courier_cli::commands::{self, ConfigCommand, DelegateArgs};
use courier_cli::daemon;
use courier_core::domain::node_config::CourierConfigManifest;

/// Courier - agent-to-agent task delegation node
#[derive(Parser)]
#[command(name = "courier")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Run the node in the foreground (same as `courier serve`)
    #[arg(long, global = true)]
    daemon: bool,

    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "COURIER_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// HTTP API port (overrides spec.network.port)
    #[arg(long, global = true, env = "COURIER_PORT")]
    port: Option<u16>,

    /// Host used by `status` to reach a running node
    #[arg(long, global = true, env = "COURIER_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long, global = true, env = "COURIER_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log output format (text, json); overrides the config file
    #[arg(long, global = true, env = "COURIER_LOG_FORMAT")]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the node: HTTP API, sweeps and heartbeats
    #[command(name = "serve")]
    Serve,

    /// Show whether a node is answering on --host/--port
    #[command(name = "status")]
    Status,

    /// Delegate a task to a peer agent
    #[command(name = "delegate")]
    Delegate(DelegateArgs),

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is normal.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Logging defaults come from the config file when one is readable; config
    // errors are reported by the command that needs the config.
    let logging = CourierConfigManifest::load_or_default(cli.config.clone())
        .map(|c| c.spec.observability.logging)
        .unwrap_or_default();
    let level = cli.log_level.clone().unwrap_or(logging.level);
    let format = cli.log_format.clone().unwrap_or(logging.format);
    init_logging(&level, &format)?;

    if cli.daemon {
        info!("Starting Courier node in daemon mode");
        return daemon::start_daemon(cli.config, cli.port).await;
    }

    match cli.command {
        Some(Commands::Serve) => daemon::start_daemon(cli.config, cli.port).await,
        Some(Commands::Status) => commands::status::handle_command(&cli.host, cli.port, cli.config).await,
        Some(Commands::Delegate(args)) => commands::delegate::handle_command(args, cli.config).await,
        Some(Commands::Config { command }) => commands::config::handle_command(command, cli.config).await,
        None => {
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

/// Initialize tracing subscriber for logging
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
        "json" => builder.json().with_current_span(false).init(),
        _ => builder.with_target(false).compact().init(),
    }

    Ok(())
}
