// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! Infrastructure implementations of the repository abstractions defined in
//! `crate::domain::repository`.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Persist and retrieve tasks and peer agent records
//! - **Pattern:** Repository (DDD), Adapter (Hexagonal Architecture)
//!
//! # Available Implementations
//!
//! ## SQLite Repositories
//!
//! - **SqliteTaskRepository** - tasks plus their transition history
//! - **SqliteAgentRecordRepository** - peer registry records
//!
//! ## In-Memory Repositories
//!
//! Lightweight implementations for testing and development:
//! - **InMemoryTaskRepository**
//! - **InMemoryAgentRecordRepository**
//!
//! Both families enforce the same rules: every state write is validated
//! against the lifecycle graph, and list queries only accept a
//! `ValidatedTaskFilter`.

pub mod sqlite_agent;
pub mod sqlite_task;

pub use sqlite_agent::SqliteAgentRecordRepository;
pub use sqlite_task::SqliteTaskRepository;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::domain::agent::{AgentId, AgentRecord, AgentStatus};
use crate::domain::repository::{
    AgentRecordRepository, RepositoryError, TaskRepository, TaskTransitionRecord,
    TransitionOutcome,
};
use crate::domain::task::{NewTask, StateUpdate, Task, TaskId};
use crate::domain::task_filter::ValidatedTaskFilter;
use crate::domain::task_state::{TaskState, TransitionError};

/// Drive `task` to `TIMEOUT` along the shortest valid path, recording `reason`
/// as the task error on the final hop. `task` is only modified on success.
pub(crate) fn walk_to_timeout(
    task: &mut Task,
    reason: &str,
) -> Result<Vec<(TaskState, TaskState)>, RepositoryError> {
    if task.is_terminal() {
        return Err(RepositoryError::AlreadyTerminal {
            task_id: task.id.clone(),
            state: task.state,
        });
    }
    let path = task.state.path_to(TaskState::Timeout).ok_or(TransitionError {
        from: task.state,
        to: TaskState::Timeout,
    })?;

    let mut working = task.clone();
    let mut hops = Vec::with_capacity(path.len());
    for next in path {
        let mut update = StateUpdate::to(next);
        if next == TaskState::Timeout {
            update = update.with_error(reason);
        }
        let previous = working.apply(&update)?;
        hops.push((previous, next));
    }
    *task = working;
    Ok(hops)
}

fn page<T>(items: Vec<T>, filter: &ValidatedTaskFilter) -> Vec<T> {
    items
        .into_iter()
        .skip(filter.offset as usize)
        .take(filter.limit as usize)
        .collect()
}

#[derive(Default)]
struct TaskTable {
    tasks: HashMap<TaskId, Task>,
    history: Vec<TaskTransitionRecord>,
}

#[derive(Clone, Default)]
pub struct InMemoryTaskRepository {
    table: Arc<RwLock<TaskTable>>,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(
        table: &mut TaskTable,
        task: &Task,
        hops: &[(TaskState, TaskState)],
        reason: Option<&str>,
    ) {
        for &(from, to) in hops {
            table.history.push(TaskTransitionRecord {
                task_id: task.id.clone(),
                from,
                to,
                reason: reason.map(str::to_string),
                changed_at: task.updated_at,
            });
        }
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn create(&self, new_task: NewTask) -> Result<Task, RepositoryError> {
        let task = Task::new(new_task);
        self.table.write().tasks.insert(task.id.clone(), task.clone());
        Ok(task)
    }

    async fn find_by_id(&self, id: &TaskId) -> Result<Option<Task>, RepositoryError> {
        Ok(self.table.read().tasks.get(id).cloned())
    }

    async fn update_state(
        &self,
        id: &TaskId,
        update: StateUpdate,
    ) -> Result<TransitionOutcome, RepositoryError> {
        let mut table = self.table.write();
        let task = table
            .tasks
            .get_mut(id)
            .ok_or_else(|| RepositoryError::NotFound(format!("task {}", id)))?;
        let previous = task.apply(&update)?;
        let task = task.clone();
        let hops = vec![(previous, update.state)];
        Self::record(&mut table, &task, &hops, update.error.as_deref());
        Ok(TransitionOutcome { task, hops })
    }

    async fn expire(&self, id: &TaskId, reason: &str) -> Result<TransitionOutcome, RepositoryError> {
        let mut table = self.table.write();
        let task = table
            .tasks
            .get_mut(id)
            .ok_or_else(|| RepositoryError::NotFound(format!("task {}", id)))?;
        let hops = walk_to_timeout(task, reason)?;
        let task = task.clone();
        Self::record(&mut table, &task, &hops, Some(reason));
        Ok(TransitionOutcome { task, hops })
    }

    async fn list(&self, filter: &ValidatedTaskFilter) -> Result<Vec<Task>, RepositoryError> {
        let mut matching: Vec<Task> = self
            .table
            .read()
            .tasks
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(page(matching, filter))
    }

    async fn transitions(&self, id: &TaskId) -> Result<Vec<TaskTransitionRecord>, RepositoryError> {
        Ok(self
            .table
            .read()
            .history
            .iter()
            .filter(|r| &r.task_id == id)
            .cloned()
            .collect())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryAgentRecordRepository {
    agents: Arc<RwLock<HashMap<AgentId, AgentRecord>>>,
}

impl InMemoryAgentRecordRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AgentRecordRepository for InMemoryAgentRecordRepository {
    async fn save(&self, record: &AgentRecord) -> Result<(), RepositoryError> {
        self.agents
            .write()
            .insert(record.agent_id.clone(), record.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &AgentId) -> Result<Option<AgentRecord>, RepositoryError> {
        Ok(self.agents.read().get(id).cloned())
    }

    async fn list_active(&self) -> Result<Vec<AgentRecord>, RepositoryError> {
        let mut active: Vec<AgentRecord> = self
            .agents
            .read()
            .values()
            .filter(|r| r.status == AgentStatus::Active)
            .cloned()
            .collect();
        active.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        Ok(active)
    }

    async fn touch(&self, id: &AgentId, at: DateTime<Utc>) -> Result<bool, RepositoryError> {
        match self.agents.write().get_mut(id) {
            Some(record) => {
                record.last_heartbeat = at;
                record.status = AgentStatus::Active;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_stale(&self, id: &AgentId) -> Result<bool, RepositoryError> {
        match self.agents.write().get_mut(id) {
            Some(record) => {
                record.status = AgentStatus::Stale;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_stale(&self) -> Result<usize, RepositoryError> {
        let mut agents = self.agents.write();
        let before = agents.len();
        agents.retain(|_, r| r.status != AgentStatus::Stale);
        Ok(before - agents.len())
    }
}
