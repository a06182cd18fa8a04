// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `courier status`: health of a running node

use anyhow::Result;
use colored::Colorize;
use std::path::PathBuf;

use courier_core::domain::node_config::CourierConfigManifest;

use crate::daemon::{check_node_running, node_url, NodeStatus};

pub async fn handle_command(host: &str, port: Option<u16>, config_override: Option<PathBuf>) -> Result<()> {
    let port = match port {
        Some(port) => port,
        None => CourierConfigManifest::load_or_default(config_override)?.spec.network.port,
    };

    match check_node_running(host, port).await? {
        NodeStatus::Running { uptime, busy_agents } => {
            println!("{} {}", "✓ Node is running at".green(), node_url(host, port));
            if let Some(uptime) = uptime {
                println!("  Uptime: {}s", uptime);
            }
            if let Some(busy) = busy_agents {
                println!("  Busy agents: {}", busy);
            }
        }
        NodeStatus::Stopped => {
            println!("{} {}", "✗ No node answering at".yellow(), node_url(host, port));
        }
        NodeStatus::Unhealthy { error } => {
            println!("{} {}", "✗ Node is unhealthy:".red(), error);
        }
    }

    Ok(())
}
