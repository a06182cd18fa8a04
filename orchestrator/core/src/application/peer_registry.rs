// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Peer Registry
//!
//! Known peer agents, where to reach them, and whether the OS process behind
//! each one is still there.
//!
//! A registry is pinned to one backing store for the life of the process.
//! The composition root owns a [`RegistryBinding`] and hands it to
//! [`PeerRegistry::new`]; a second registry against a different store path is
//! refused with [`RegistryError::AlreadyBound`].
//!
//! ## Stale sweep
//!
//! For every active record:
//!
//! | Condition                                        | Result                    |
//! |--------------------------------------------------|---------------------------|
//! | pid set, process gone                            | stale (`ProcessGone`)     |
//! | pid set, process holds a terminal                | alive, heartbeat ignored  |
//! | heartbeat older than `stale_after`               | stale (`HeartbeatExpired`)|
//! | otherwise                                        | alive                     |
//!
//! With orphan reaping on, a live process whose record went stale on an
//! expired heartbeat is sent SIGTERM. The current process is never signalled.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::agent::{AgentId, AgentRecord, AgentStatus};
use crate::domain::events::{AgentEvent, StaleReason};
use crate::domain::node_config::RegistryConfig;
use crate::domain::repository::{AgentRecordRepository, RepositoryError};
use crate::domain::validation::ValidationError;
use crate::infrastructure::a2a_client::PeerResolver;
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::process::ProcessProbe;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("peer registry is bound to '{}', refusing to rebind to '{}'", .bound.display(), .requested.display())]
    AlreadyBound { bound: PathBuf, requested: PathBuf },

    #[error("agent '{0}' is not registered")]
    NotFound(AgentId),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Process-wide record of which store the peer registry uses.
#[derive(Debug, Default)]
pub struct RegistryBinding {
    bound: Mutex<Option<PathBuf>>,
}

impl RegistryBinding {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind to `path`. Binding again to the same path is a no-op.
    pub fn bind(&self, path: &Path) -> Result<(), RegistryError> {
        let mut bound = self.bound.lock();
        match bound.as_ref() {
            Some(existing) if existing.as_path() == path => Ok(()),
            Some(existing) => Err(RegistryError::AlreadyBound {
                bound: existing.clone(),
                requested: path.to_path_buf(),
            }),
            None => {
                *bound = Some(path.to_path_buf());
                Ok(())
            }
        }
    }

    pub fn bound_path(&self) -> Option<PathBuf> {
        self.bound.lock().clone()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StaleSweepReport {
    pub checked: usize,
    pub marked_stale: usize,
    pub reaped: usize,
    pub failed: usize,
}

pub struct PeerRegistry {
    repository: Arc<dyn AgentRecordRepository>,
    probe: Arc<dyn ProcessProbe>,
    event_bus: EventBus,
    store_path: PathBuf,
    stale_after: Duration,
    reap_orphans: bool,
    own_pid: u32,
}

impl PeerRegistry {
    pub fn new(
        binding: &RegistryBinding,
        store_path: impl AsRef<Path>,
        repository: Arc<dyn AgentRecordRepository>,
        probe: Arc<dyn ProcessProbe>,
        event_bus: EventBus,
        config: &RegistryConfig,
    ) -> Result<Self, RegistryError> {
        let store_path = store_path.as_ref().to_path_buf();
        binding.bind(&store_path)?;
        Ok(Self {
            repository,
            probe,
            event_bus,
            store_path,
            stale_after: config.stale_after(),
            reap_orphans: config.reap_orphans,
            own_pid: std::process::id(),
        })
    }

    pub fn store_path(&self) -> &Path {
        &self.store_path
    }

    /// Register or re-register a peer. The record is stored active with a
    /// fresh heartbeat.
    pub async fn register(&self, mut record: AgentRecord) -> Result<AgentRecord, RegistryError> {
        if record.agent_id.as_str().trim().is_empty() {
            return Err(ValidationError::new("agentId", "must not be empty").into());
        }
        match url::Url::parse(&record.base_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            _ => {
                return Err(ValidationError::new(
                    "baseUrl",
                    format!("'{}' is not an http(s) URL", record.base_url),
                )
                .into())
            }
        }

        record.status = AgentStatus::Active;
        record.last_heartbeat = Utc::now();
        self.repository.save(&record).await?;

        info!(
            agent_id = %record.agent_id,
            endpoint = %record.endpoint(),
            pid = ?record.process_pid,
            "Agent registered"
        );
        self.event_bus.publish_agent_event(AgentEvent::AgentRegistered {
            agent_id: record.agent_id.clone(),
            registered_at: record.last_heartbeat,
        });
        Ok(record)
    }

    /// Refresh `last_heartbeat`; a stale record becomes active again.
    pub async fn heartbeat(&self, agent_id: &AgentId) -> Result<(), RegistryError> {
        if self.repository.touch(agent_id, Utc::now()).await? {
            Ok(())
        } else {
            Err(RegistryError::NotFound(agent_id.clone()))
        }
    }

    pub async fn get(&self, agent_id: &AgentId) -> Result<Option<AgentRecord>, RegistryError> {
        Ok(self.repository.find_by_id(agent_id).await?)
    }

    pub async fn list_active(&self) -> Result<Vec<AgentRecord>, RegistryError> {
        Ok(self.repository.list_active().await?)
    }

    pub async fn cleanup_stale(&self) -> Result<StaleSweepReport, RegistryError> {
        self.cleanup_stale_at(Utc::now()).await
    }

    /// Evaluate every active record as of `now`. Failures on one record are
    /// logged and counted; the rest are still processed.
    pub async fn cleanup_stale_at(&self, now: DateTime<Utc>) -> Result<StaleSweepReport, RegistryError> {
        let stale_after = chrono::Duration::from_std(self.stale_after)
            .unwrap_or_else(|_| chrono::Duration::hours(24));
        let active = self.repository.list_active().await?;
        let mut report = StaleSweepReport {
            checked: active.len(),
            ..StaleSweepReport::default()
        };

        for record in active {
            let Some(reason) = self.assess(&record, now, stale_after) else {
                continue;
            };

            match self.repository.mark_stale(&record.agent_id).await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    report.failed += 1;
                    warn!(agent_id = %record.agent_id, error = %e, "Failed to mark agent stale");
                    continue;
                }
            }
            report.marked_stale += 1;
            metrics::counter!("courier_agents_marked_stale_total").increment(1);
            warn!(
                agent_id = %record.agent_id,
                pid = ?record.process_pid,
                reason = ?reason,
                "Agent marked stale"
            );
            self.event_bus.publish_agent_event(AgentEvent::AgentMarkedStale {
                agent_id: record.agent_id.clone(),
                reason,
                marked_at: now,
            });

            if reason == StaleReason::HeartbeatExpired && self.reap_orphans {
                if let Some(pid) = record.process_pid {
                    if self.reap(&record.agent_id, pid) {
                        report.reaped += 1;
                    }
                }
            }
        }

        if report.marked_stale > 0 || report.failed > 0 {
            debug!(
                checked = report.checked,
                marked_stale = report.marked_stale,
                reaped = report.reaped,
                failed = report.failed,
                "Stale sweep finished"
            );
        }
        Ok(report)
    }

    fn assess(
        &self,
        record: &AgentRecord,
        now: DateTime<Utc>,
        stale_after: chrono::Duration,
    ) -> Option<StaleReason> {
        if let Some(pid) = record.process_pid {
            if pid != self.own_pid {
                if !self.probe.is_alive(pid) {
                    return Some(StaleReason::ProcessGone);
                }
                if self.probe.is_interactive(pid) {
                    return None;
                }
            }
        }
        (record.heartbeat_age(now) > stale_after).then_some(StaleReason::HeartbeatExpired)
    }

    fn reap(&self, agent_id: &AgentId, pid: u32) -> bool {
        if pid == self.own_pid {
            debug!(%agent_id, pid, "Not reaping the current process");
            return false;
        }
        match self.probe.terminate(pid) {
            Ok(()) => {
                metrics::counter!("courier_orphans_reaped_total").increment(1);
                info!(%agent_id, pid, "Terminated orphaned agent process");
                self.event_bus.publish_agent_event(AgentEvent::OrphanProcessTerminated {
                    agent_id: agent_id.clone(),
                    pid,
                    terminated_at: Utc::now(),
                });
                true
            }
            Err(e) => {
                warn!(%agent_id, pid, error = %e, "Failed to terminate orphaned agent process");
                false
            }
        }
    }

    /// Purge every stale record.
    pub async fn delete_stale(&self) -> Result<usize, RegistryError> {
        let count = self.repository.delete_stale().await?;
        if count > 0 {
            info!(count, "Purged stale agents");
            self.event_bus.publish_agent_event(AgentEvent::AgentsPurged {
                count,
                purged_at: Utc::now(),
            });
        }
        Ok(count)
    }

    /// Every `interval`: purge records left stale by the previous tick, then
    /// run the stale sweep. A stale peer therefore has one interval to
    /// heartbeat back before its record is removed.
    pub fn spawn_sweep(self: &Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let registry = Arc::clone(&registry);
                        let run = tokio::spawn(async move {
                            if let Err(e) = registry.delete_stale().await {
                                warn!(error = %e, "Failed to purge stale agents");
                            }
                            if let Err(e) = registry.cleanup_stale().await {
                                warn!(error = %e, "Stale agent sweep failed");
                            }
                        });
                        if let Err(e) = run.await {
                            error!(error = %e, "Stale agent sweep aborted");
                        }
                    }
                }
            }
            debug!("Stale agent sweep stopped");
        })
    }
}

#[async_trait]
impl PeerResolver for PeerRegistry {
    /// Endpoint of an active peer; stale and unknown peers resolve to `None`.
    async fn resolve(&self, agent_id: &AgentId) -> Result<Option<String>, RepositoryError> {
        Ok(self
            .repository
            .find_by_id(agent_id)
            .await?
            .filter(|record| record.status == AgentStatus::Active)
            .map(|record| record.endpoint()))
    }
}
