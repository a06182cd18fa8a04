// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `courier delegate`: hand a task to a peer registered in this node's store
//!
//! The peer is resolved through the local peer registry, so only agents that
//! registered (and are still active) can be targeted.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use courier_core::application::peer_registry::RegistryBinding;
use courier_core::domain::agent::AgentId;
use courier_core::domain::node_config::ClientConfig;
use courier_core::domain::task::{Message, SendMessageRequest, TaskPriority};
use courier_core::infrastructure::a2a_client::A2aClient;

use crate::daemon::server::{load_config, NodeContext};

#[derive(Args, Debug)]
pub struct DelegateArgs {
    /// Target agent id
    #[arg(short, long)]
    pub agent: String,

    /// Task priority (low, normal, high, urgent)
    #[arg(short, long, default_value = "normal")]
    pub priority: TaskPriority,

    /// Optional task name
    #[arg(long)]
    pub name: Option<String>,

    /// Poll the peer until the task reaches a terminal state
    #[arg(long)]
    pub wait: bool,

    /// Poll interval in seconds when --wait is set
    #[arg(long, default_value = "2")]
    pub poll_seconds: u64,

    /// Task text sent as the first user message
    #[arg(value_name = "TEXT", required = true)]
    pub text: Vec<String>,
}

pub async fn handle_command(args: DelegateArgs, config_override: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_override)?;
    let binding = RegistryBinding::new();
    let node = NodeContext::open(&config, &binding).await?;

    let result = delegate(&args, &config.spec.client, config.spec.auth.resolve_token(), &node).await;
    node.close().await;
    result
}

async fn delegate(
    args: &DelegateArgs,
    client_config: &ClientConfig,
    token: Option<String>,
    node: &NodeContext,
) -> Result<()> {
    let client = A2aClient::new(node.registry.clone(), token, client_config)?;
    let agent_id = AgentId::new(args.agent.clone());

    let mut request = SendMessageRequest::new(Message::user_text(args.text.join(" ")))
        .for_agent(agent_id.clone());
    request.priority = args.priority;
    request.name = args.name.clone();

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let response = client
        .send_message(&agent_id, &request, &cancel)
        .await
        .with_context(|| format!("Delegation to '{}' failed", agent_id))?;

    println!(
        "{} {} ({})",
        "✓ Task delegated:".green(),
        response.task_id,
        response.status
    );

    if !args.wait {
        return Ok(());
    }

    let poll = Duration::from_secs(args.poll_seconds.max(1));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                println!("{}", "Stopped waiting; the task keeps running on the peer".yellow());
                return Ok(());
            }
            _ = tokio::time::sleep(poll) => {}
        }

        match client.get_task(&agent_id, &response.task_id).await {
            Ok(task) if task.is_terminal() => {
                let line = format!("Task {} finished: {}", task.id, task.state);
                if task.error.is_some() {
                    println!("{}", line.red());
                } else {
                    println!("{}", line.green());
                }
                if let Some(error) = &task.error {
                    println!("  Error: {}", error);
                }
                if let Some(result) = &task.result {
                    println!("{}", serde_json::to_string_pretty(result)?);
                }
                return Ok(());
            }
            Ok(task) => println!("  {} {}", "…".dimmed(), task.state),
            Err(e) if e.is_retryable() => warn!(error = %e, "Status poll failed, will retry"),
            Err(e) => return Err(e).context("Status poll failed"),
        }
    }
}
