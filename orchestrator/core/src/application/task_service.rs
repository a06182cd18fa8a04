// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Task Service
//!
//! The inbound A2A use cases: accept a delegated task, read and list tasks,
//! cancel, and apply state updates reported by the working agent.
//!
//! The store is written first and the delegation queue follows it. Store
//! writes never happen while the queue lock is held.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::application::delegation_queue::{DelegationQueue, QueueError};
use crate::domain::agent::AgentId;
use crate::domain::events::TaskEvent;
use crate::domain::repository::{RepositoryError, TaskRepository, TransitionOutcome};
use crate::domain::task::{SendMessageRequest, SendMessageResponse, StateUpdate, Task, TaskId};
use crate::domain::task_filter::TaskFilter;
use crate::domain::task_state::{TaskState, TransitionError};
use crate::domain::validation::ValidationError;
use crate::infrastructure::event_bus::EventBus;

#[derive(Debug, Error)]
pub enum TaskServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("task {0} not found")]
    NotFound(TaskId),

    /// The task was stored and then rejected because the agent is saturated.
    #[error("agent '{agent_id}' is busy; task {task_id} was rejected")]
    AgentBusy { task_id: TaskId, agent_id: AgentId },

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

pub struct TaskService {
    repository: Arc<dyn TaskRepository>,
    queue: Arc<DelegationQueue>,
    event_bus: EventBus,
}

impl TaskService {
    pub fn new(repository: Arc<dyn TaskRepository>, queue: Arc<DelegationQueue>, event_bus: EventBus) -> Self {
        Self {
            repository,
            queue,
            event_bus,
        }
    }

    pub fn queue(&self) -> &Arc<DelegationQueue> {
        &self.queue
    }

    /// Persist a new task and, if it names an agent, admit it to the
    /// delegation queue. A refused admission leaves the task `REJECTED`.
    pub async fn send_message(&self, request: SendMessageRequest) -> Result<SendMessageResponse, TaskServiceError> {
        if request.message.parts.is_empty() {
            return Err(ValidationError::new("message", "must contain at least one part").into());
        }
        if let Some(agent_id) = &request.agent_id {
            if agent_id.as_str().trim().is_empty() {
                return Err(ValidationError::new("agentId", "must not be empty").into());
            }
        }

        let task = self.repository.create(request.into_new_task()).await?;
        metrics::counter!("courier_tasks_created_total").increment(1);
        info!(task_id = %task.id, agent_id = ?task.agent_id, priority = %task.priority, "Task created");
        self.event_bus.publish_task_event(TaskEvent::TaskCreated {
            task_id: task.id.clone(),
            agent_id: task.agent_id.clone(),
            priority: task.priority,
            created_at: task.created_at,
        });

        let Some(agent_id) = task.agent_id.clone() else {
            return Ok(SendMessageResponse {
                task_id: task.id,
                status: task.state,
            });
        };

        match self
            .queue
            .add_task(task.id.clone(), task.description.clone(), task.priority, agent_id.clone())
        {
            Ok(_) => Ok(SendMessageResponse {
                task_id: task.id,
                status: task.state,
            }),
            Err(QueueError::AgentBusy { .. }) => {
                warn!(task_id = %task.id, %agent_id, "Agent busy, rejecting task");
                let update = StateUpdate::to(TaskState::Rejected)
                    .with_error(format!("agent '{}' already has a pending task", agent_id));
                let outcome = self.repository.update_state(&task.id, update).await?;
                self.publish_hops(&outcome);
                Err(TaskServiceError::AgentBusy {
                    task_id: task.id,
                    agent_id,
                })
            }
            Err(e) => Err(RepositoryError::Conflict(e.to_string()).into()),
        }
    }

    pub async fn get_task(&self, task_id: &TaskId) -> Result<Task, TaskServiceError> {
        self.repository
            .find_by_id(task_id)
            .await?
            .ok_or_else(|| TaskServiceError::NotFound(task_id.clone()))
    }

    pub async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, TaskServiceError> {
        let filter = filter.validate()?;
        Ok(self.repository.list(&filter).await?)
    }

    /// Cancel a task. Cancelling an already cancelled task returns it
    /// unchanged and publishes nothing.
    pub async fn cancel_task(&self, task_id: &TaskId) -> Result<Task, TaskServiceError> {
        let current = self.get_task(task_id).await?;
        if current.state == TaskState::Canceled {
            debug!(%task_id, "Task already cancelled");
            self.queue.remove_task(task_id);
            return Ok(current);
        }

        match self
            .repository
            .update_state(task_id, StateUpdate::to(TaskState::Canceled))
            .await
        {
            Ok(outcome) => {
                self.queue.remove_task(task_id);
                info!(%task_id, from = %current.state, "Task cancelled");
                self.publish_hops(&outcome);
                Ok(outcome.task)
            }
            // Lost a race with another cancel.
            Err(RepositoryError::InvalidTransition(TransitionError {
                from: TaskState::Canceled,
                ..
            })) => self.get_task(task_id).await,
            Err(e) => Err(e.into()),
        }
    }

    /// Apply a state change reported for a task and keep the queue in step:
    /// `WORKING` frees the agent's admission slot, terminal states drop the
    /// entry.
    pub async fn update_state(&self, task_id: &TaskId, update: StateUpdate) -> Result<Task, TaskServiceError> {
        let outcome = match self.repository.update_state(task_id, update).await {
            Err(RepositoryError::NotFound(_)) => return Err(TaskServiceError::NotFound(task_id.clone())),
            other => other?,
        };

        let state = outcome.task.state;
        if state == TaskState::Working {
            if let Err(e) = self.queue.mark_in_progress(task_id) {
                debug!(%task_id, error = %e, "No queue entry to mark in progress");
            }
        } else if state.is_terminal() {
            self.queue.remove_task(task_id);
        }

        info!(%task_id, state = %state, "Task state updated");
        self.publish_hops(&outcome);
        Ok(outcome.task)
    }

    fn publish_hops(&self, outcome: &TransitionOutcome) {
        for (from, to) in &outcome.hops {
            self.event_bus.publish_task_event(TaskEvent::TaskStateChanged {
                task_id: outcome.task.id.clone(),
                from: *from,
                to: *to,
                changed_at: outcome.task.updated_at,
            });
        }
    }
}
