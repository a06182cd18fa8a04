// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Repository Interfaces
//!
//! Persistence contracts for the two aggregates this node owns, following the
//! DDD Repository pattern: interface defined in the domain layer, implemented
//! in `crate::infrastructure::repositories`.
//!
//! | Trait | Aggregate | Implementations |
//! |-------|-----------|----------------|
//! | `TaskRepository` | `Task` | `InMemoryTaskRepository`, `SqliteTaskRepository` |
//! | `AgentRecordRepository` | `AgentRecord` | `InMemoryAgentRecordRepository`, `SqliteAgentRecordRepository` |
//!
//! ## Storage Backend Abstraction
//!
//! Concrete implementations are selected at startup from `storage.backend` in
//! `courier-config.yaml`. In-memory implementations are used for development
//! and testing; the SQLite implementations for anything that must survive a
//! restart.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::agent::{AgentId, AgentRecord};
use crate::domain::task::{NewTask, StateUpdate, Task, TaskId};
use crate::domain::task_filter::ValidatedTaskFilter;
use crate::domain::task_state::{TaskState, TransitionError};
use crate::domain::validation::ValidationError;

/// Storage backend enum for pluggable persistence
#[derive(Debug, Clone, PartialEq)]
pub enum StorageBackend {
    InMemory,
    Sqlite(SqliteConfig),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SqliteConfig {
    pub path: PathBuf,
}

impl StorageBackend {
    /// Identity of the backing store, used to pin a peer registry to it.
    pub fn location(&self) -> PathBuf {
        match self {
            StorageBackend::InMemory => PathBuf::from(":memory:"),
            StorageBackend::Sqlite(config) => config.path.clone(),
        }
    }
}

/// Outcome of a successful state write.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionOutcome {
    pub task: Task,
    /// Every hop written, in order, as `(from, to)`.
    pub hops: Vec<(TaskState, TaskState)>,
}

/// One row of a task's append-only transition history.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskTransitionRecord {
    pub task_id: TaskId,
    pub from: TaskState,
    pub to: TaskState,
    pub reason: Option<String>,
    pub changed_at: DateTime<Utc>,
}

/// Repository interface for Task aggregates
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Persist a new task in `SUBMITTED`.
    async fn create(&self, new_task: NewTask) -> Result<Task, RepositoryError>;

    async fn find_by_id(&self, id: &TaskId) -> Result<Option<Task>, RepositoryError>;

    /// Apply one validated transition. Invalid edges fail with
    /// `RepositoryError::InvalidTransition` and leave the row untouched.
    async fn update_state(
        &self,
        id: &TaskId,
        update: StateUpdate,
    ) -> Result<TransitionOutcome, RepositoryError>;

    /// Move a non-terminal task to `TIMEOUT` along the shortest valid path,
    /// atomically. A task that is already terminal yields
    /// `RepositoryError::AlreadyTerminal`.
    async fn expire(&self, id: &TaskId, reason: &str) -> Result<TransitionOutcome, RepositoryError>;

    /// List tasks matching an already-validated filter, newest first.
    async fn list(&self, filter: &ValidatedTaskFilter) -> Result<Vec<Task>, RepositoryError>;

    /// Transition history of one task, oldest first.
    async fn transitions(&self, id: &TaskId) -> Result<Vec<TaskTransitionRecord>, RepositoryError>;
}

/// Repository interface for peer agent records
#[async_trait]
pub trait AgentRecordRepository: Send + Sync {
    /// Insert or replace a record.
    async fn save(&self, record: &AgentRecord) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: &AgentId) -> Result<Option<AgentRecord>, RepositoryError>;

    async fn list_active(&self) -> Result<Vec<AgentRecord>, RepositoryError>;

    /// Refresh the heartbeat and reactivate. Returns false if unknown.
    async fn touch(&self, id: &AgentId, at: DateTime<Utc>) -> Result<bool, RepositoryError>;

    /// Returns false if the record is unknown.
    async fn mark_stale(&self, id: &AgentId) -> Result<bool, RepositoryError>;

    /// Physically remove every stale record, returning how many were removed.
    async fn delete_stale(&self) -> Result<usize, RepositoryError>;
}

/// Repository errors
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),

    #[error("Task {task_id} is already in terminal state {state}")]
    AlreadyTerminal { task_id: TaskId, state: TaskState },

    /// Concurrent writer changed the row between read and write.
    #[error("Concurrent update on {0}")]
    Conflict(String),

    /// No connection could be obtained (pool timeout, exhaustion or shutdown).
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("Row not found".to_string()),
            _ => RepositoryError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}
