// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Repository Factory - Application Layer
//!
//! Creates concrete repository implementations for the configured storage
//! backend, keeping the domain layer free of infrastructure types.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Wires `TaskRepository` / `AgentRecordRepository` to a backend

use std::sync::Arc;

use tracing::info;

use crate::domain::repository::{
    AgentRecordRepository, RepositoryError, StorageBackend, TaskRepository,
};
use crate::infrastructure::db::{self, SqlitePool};
use crate::infrastructure::pool::PoolConfig;
use crate::infrastructure::repositories::{
    InMemoryAgentRecordRepository, InMemoryTaskRepository, SqliteAgentRecordRepository,
    SqliteTaskRepository,
};

/// Repositories for one backend, plus the pool behind them when there is one.
#[derive(Clone)]
pub struct Repositories {
    pub tasks: Arc<dyn TaskRepository>,
    pub agents: Arc<dyn AgentRecordRepository>,
    pub pool: Option<SqlitePool>,
}

/// Creates a TaskRepository implementation based on the configured backend
pub fn create_task_repository(backend: &StorageBackend, pool: Option<SqlitePool>) -> Arc<dyn TaskRepository> {
    match (backend, pool) {
        (StorageBackend::Sqlite(_), Some(pool)) => Arc::new(SqliteTaskRepository::new(pool)),
        _ => Arc::new(InMemoryTaskRepository::new()),
    }
}

/// Creates an AgentRecordRepository implementation based on the configured backend
pub fn create_agent_repository(
    backend: &StorageBackend,
    pool: Option<SqlitePool>,
) -> Arc<dyn AgentRecordRepository> {
    match (backend, pool) {
        (StorageBackend::Sqlite(_), Some(pool)) => Arc::new(SqliteAgentRecordRepository::new(pool)),
        _ => Arc::new(InMemoryAgentRecordRepository::new()),
    }
}

/// Open the backend (running migrations for SQLite) and build both repositories.
pub async fn build_repositories(
    backend: &StorageBackend,
    pool_config: PoolConfig,
) -> Result<Repositories, RepositoryError> {
    let pool = match backend {
        StorageBackend::InMemory => None,
        StorageBackend::Sqlite(config) => {
            let pool = db::open(&config.path, pool_config).await?;
            info!(path = %config.path.display(), "SQLite store ready");
            Some(pool)
        }
    };

    Ok(Repositories {
        tasks: create_task_repository(backend, pool.clone()),
        agents: create_agent_repository(backend, pool.clone()),
        pool,
    })
}
