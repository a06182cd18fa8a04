// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Node composition root
//!
//! Builds every core component from configuration, registers this node in the
//! peer registry, runs the background loops and serves the A2A HTTP API until
//! SIGINT/SIGTERM.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use courier_core::application::delegation_queue::DelegationQueue;
use courier_core::application::peer_registry::{PeerRegistry, RegistryBinding, RegistryError};
use courier_core::application::repository_factory::{build_repositories, Repositories};
use courier_core::application::task_service::TaskService;
use courier_core::domain::agent::{AgentId, AgentRecord};
use courier_core::domain::events::{AgentEvent, TaskEvent};
use courier_core::domain::node_config::CourierConfigManifest;
use courier_core::domain::repository::StorageBackend;
use courier_core::infrastructure::event_bus::{DomainEvent, EventBus, EventBusError};
use courier_core::infrastructure::pool::PoolConfig;
use courier_core::infrastructure::process::OsProcessProbe;
use courier_core::presentation::api::{app, ApiState};

/// Load, override and validate the node configuration.
pub fn load_config(config_path: Option<PathBuf>) -> Result<CourierConfigManifest> {
    let config = CourierConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;
    config
        .validate()
        .context("Configuration validation failed")?;
    Ok(config)
}

/// Storage, registry and event bus shared by the daemon and one-shot commands.
pub struct NodeContext {
    pub backend: StorageBackend,
    pub repositories: Repositories,
    pub event_bus: EventBus,
    pub registry: Arc<PeerRegistry>,
}

impl NodeContext {
    pub async fn open(config: &CourierConfigManifest, binding: &RegistryBinding) -> Result<Self> {
        let backend = config.storage_backend()?;
        let repositories = build_repositories(&backend, PoolConfig::from(&config.spec.pool))
            .await
            .with_context(|| format!("Failed to open storage at {}", backend.location().display()))?;
        let event_bus = EventBus::with_default_capacity();
        let registry = PeerRegistry::new(
            binding,
            backend.location(),
            repositories.agents.clone(),
            Arc::new(OsProcessProbe::new()),
            event_bus.clone(),
            &config.spec.registry,
        )?;

        Ok(Self {
            backend,
            repositories,
            event_bus,
            registry: Arc::new(registry),
        })
    }

    pub async fn close(&self) {
        if let Some(pool) = &self.repositories.pool {
            pool.shutdown().await;
        }
    }
}

/// Run the node until a shutdown signal arrives.
pub async fn start_daemon(config_path: Option<PathBuf>, port_override: Option<u16>) -> Result<()> {
    let config = load_config(config_path)?;
    let spec = &config.spec;
    let port = port_override.unwrap_or(spec.network.port);

    info!(
        node = %config.metadata.name,
        agent_id = %spec.node.agent_id,
        storage = %spec.storage.backend,
        "Starting Courier node"
    );

    if spec.observability.metrics.enabled {
        install_metrics_exporter(spec.observability.metrics.port)?;
    }

    let token = spec.auth.resolve_token();
    if spec.auth.require_inbound && token.is_none() {
        anyhow::bail!(
            "Inbound auth is required but {} is not set",
            spec.auth.token_env
        );
    }
    if token.is_none() {
        warn!(
            token_env = %spec.auth.token_env,
            "No bearer token configured: inbound auth disabled and outbound calls will fail"
        );
    }

    let binding = RegistryBinding::new();
    let node = NodeContext::open(&config, &binding).await?;
    info!(store = %node.backend.location().display(), "Storage ready");

    let queue = Arc::new(DelegationQueue::from_config(
        node.repositories.tasks.clone(),
        node.event_bus.clone(),
        &spec.delegation,
    ));
    let tasks = Arc::new(TaskService::new(
        node.repositories.tasks.clone(),
        queue.clone(),
        node.event_bus.clone(),
    ));

    let cancel = CancellationToken::new();
    let mut workers: Vec<JoinHandle<()>> = vec![
        spawn_event_logger(&node.event_bus, cancel.clone()),
        queue.spawn_timeout_sweep(spec.delegation.sweep_interval(), cancel.clone()),
        node.registry
            .spawn_sweep(spec.registry.cleanup_interval(), cancel.clone()),
    ];
    if let Some(pool) = &node.repositories.pool {
        workers.push(pool.spawn_health_check(cancel.clone()));
    }

    let own_record = AgentRecord::new(AgentId::new(spec.node.agent_id.clone()), spec.node.base_url.clone(), port)
        .with_pid(std::process::id())
        .with_capabilities(spec.node.capabilities.clone());
    node.registry
        .register(own_record.clone())
        .await
        .context("Failed to register this node in the peer registry")?;
    workers.push(spawn_heartbeat(
        node.registry.clone(),
        own_record,
        spec.registry.heartbeat_interval(),
        cancel.clone(),
    ));

    let state = ApiState::new(
        tasks,
        node.repositories.pool.clone(),
        if spec.auth.require_inbound { token } else { None },
    );
    let router = app(state);

    let addr: SocketAddr = format!("{}:{}", spec.network.bind_address, port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", spec.network.bind_address, port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("A2A API listening on {}", addr);

    let served = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await;

    info!("Shutting down Courier node");
    cancel.cancel();
    for worker in workers {
        if let Err(e) = worker.await {
            error!(error = %e, "Background task ended abnormally");
        }
    }
    node.close().await;

    served.context("HTTP server error")
}

fn install_metrics_exporter(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;
    info!("Prometheus metrics exposed on {}", addr);
    Ok(())
}

/// Keep this node's registry record fresh. If a sweep purged the record
/// (for example after the process was suspended), register it again.
fn spawn_heartbeat(
    registry: Arc<PeerRegistry>,
    record: AgentRecord,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let agent_id = record.agent_id.clone();
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => match registry.heartbeat(&agent_id).await {
                    Ok(()) => debug!(%agent_id, "Heartbeat"),
                    Err(RegistryError::NotFound(_)) => {
                        warn!(%agent_id, "Own registry record missing, re-registering");
                        if let Err(e) = registry.register(record.clone()).await {
                            error!(%agent_id, error = %e, "Re-registration failed");
                        }
                    }
                    Err(e) => warn!(%agent_id, error = %e, "Heartbeat failed"),
                },
            }
        }
        debug!("Heartbeat loop stopped");
    })
}

/// Log domain events as they are published.
fn spawn_event_logger(event_bus: &EventBus, cancel: CancellationToken) -> JoinHandle<()> {
    let mut receiver = event_bus.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = receiver.recv() => match event {
                    Ok(DomainEvent::Task(event)) => log_task_event(&event),
                    Ok(DomainEvent::Agent(event)) => log_agent_event(&event),
                    Err(EventBusError::Lagged(_)) | Err(EventBusError::Empty) => continue,
                    Err(EventBusError::Closed) => break,
                },
            }
        }
    })
}

fn log_task_event(event: &TaskEvent) {
    match event {
        TaskEvent::TaskCreated { task_id, agent_id, priority, .. } => {
            debug!(%task_id, agent_id = ?agent_id, %priority, "Task created")
        }
        TaskEvent::TaskStateChanged { task_id, from, to, .. } => {
            debug!(%task_id, %from, %to, "Task state changed")
        }
        TaskEvent::TaskTimedOut { task_id, agent_id, .. } => {
            info!(%task_id, %agent_id, "Task timed out")
        }
    }
}

fn log_agent_event(event: &AgentEvent) {
    match event {
        AgentEvent::AgentRegistered { agent_id, .. } => debug!(%agent_id, "Agent registered"),
        AgentEvent::AgentMarkedStale { agent_id, reason, .. } => {
            info!(%agent_id, reason = ?reason, "Agent marked stale")
        }
        AgentEvent::OrphanProcessTerminated { agent_id, pid, .. } => {
            info!(%agent_id, pid, "Orphaned agent process terminated")
        }
        AgentEvent::AgentsPurged { count, .. } => debug!(count, "Stale agents purged"),
    }
}

/// Resolves on SIGINT or SIGTERM, or when `cancel` fires.
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
        _ = cancel.cancelled() => {},
    }
}
