// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Delegation Queue
//!
//! In-memory admission and routing record for delegated tasks. The task store
//! stays authoritative for task content and state; an entry here only says
//! "agent X owes us task Y since T".
//!
//! Two maps are kept in step under one lock: entries by task id, and the ids
//! of each agent's `PENDING` entries. The agent index never holds an empty
//! set, so its size is the number of agents with pending work.
//!
//! ## Timeout sweep
//!
//! [`DelegationQueue::check_timeouts`] snapshots expired entries under the
//! lock, drops the lock, then writes `TIMEOUT` to the store one task at a
//! time. An entry leaves the queue only once the store accepted the write (or
//! reports the task already terminal). Any other failure leaves it for the
//! next tick. The sweep never returns an error.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::agent::AgentId;
use crate::domain::events::TaskEvent;
use crate::domain::node_config::DelegationConfig;
use crate::domain::repository::{RepositoryError, TaskRepository};
use crate::domain::task::{TaskId, TaskPriority};
use crate::infrastructure::event_bus::EventBus;

/// Pending tasks an agent may hold before new delegations are refused.
pub const MAX_PENDING_TASKS_PER_AGENT: usize = 1;

const TIMEOUT_REASON: &str = "task timed out in delegation queue";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PendingStatus {
    Pending,
    InProgress,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingTaskEntry {
    pub task_id: TaskId,
    pub agent_id: AgentId,
    pub priority: TaskPriority,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Admission time. The timeout sweep measures age from here for both
    /// `PENDING` and `IN_PROGRESS` entries; `mark_in_progress` does not reset it.
    pub created_at: DateTime<Utc>,
    pub status: PendingStatus,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("agent '{agent_id}' already has {pending} pending task(s) (limit {limit})")]
    AgentBusy {
        agent_id: AgentId,
        pending: usize,
        limit: usize,
    },

    #[error("task {0} is already queued")]
    DuplicateTask(TaskId),

    #[error("task {0} is not queued")]
    NotQueued(TaskId),
}

/// Outcome of one timeout sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub timed_out: usize,
    /// Entries dropped because the store no longer considers them live.
    pub dropped: usize,
    /// Store writes that failed; those entries stay queued.
    pub failed: usize,
}

#[derive(Default)]
struct QueueState {
    entries: HashMap<TaskId, PendingTaskEntry>,
    pending_by_agent: HashMap<AgentId, HashSet<TaskId>>,
}

impl QueueState {
    fn unindex(&mut self, agent_id: &AgentId, task_id: &TaskId) {
        if let Some(ids) = self.pending_by_agent.get_mut(agent_id) {
            ids.remove(task_id);
            if ids.is_empty() {
                self.pending_by_agent.remove(agent_id);
            }
        }
    }

    fn remove(&mut self, task_id: &TaskId) -> Option<PendingTaskEntry> {
        let entry = self.entries.remove(task_id)?;
        if entry.status == PendingStatus::Pending {
            self.unindex(&entry.agent_id, task_id);
        }
        Some(entry)
    }
}

pub struct DelegationQueue {
    state: Mutex<QueueState>,
    repository: Arc<dyn TaskRepository>,
    event_bus: EventBus,
    task_timeout: Duration,
    max_pending_per_agent: usize,
}

impl DelegationQueue {
    pub fn new(repository: Arc<dyn TaskRepository>, event_bus: EventBus, task_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            repository,
            event_bus,
            task_timeout,
            max_pending_per_agent: MAX_PENDING_TASKS_PER_AGENT,
        }
    }

    pub fn from_config(
        repository: Arc<dyn TaskRepository>,
        event_bus: EventBus,
        config: &DelegationConfig,
    ) -> Self {
        Self::new(repository, event_bus, config.task_timeout())
            .with_max_pending_per_agent(config.max_pending_per_agent())
    }

    pub fn with_max_pending_per_agent(mut self, limit: usize) -> Self {
        self.max_pending_per_agent = limit.max(1);
        self
    }

    pub fn task_timeout(&self) -> Duration {
        self.task_timeout
    }

    pub fn max_pending_per_agent(&self) -> usize {
        self.max_pending_per_agent
    }

    /// Admit a task for `agent_id`, refusing it if the agent is at its
    /// pending limit.
    pub fn add_task(
        &self,
        task_id: TaskId,
        description: Option<String>,
        priority: TaskPriority,
        agent_id: AgentId,
    ) -> Result<PendingTaskEntry, QueueError> {
        let mut state = self.state.lock();

        if state.entries.contains_key(&task_id) {
            return Err(QueueError::DuplicateTask(task_id));
        }
        let pending = state.pending_by_agent.get(&agent_id).map_or(0, HashSet::len);
        if pending >= self.max_pending_per_agent {
            return Err(QueueError::AgentBusy {
                agent_id,
                pending,
                limit: self.max_pending_per_agent,
            });
        }

        let entry = PendingTaskEntry {
            task_id: task_id.clone(),
            agent_id: agent_id.clone(),
            priority,
            description,
            created_at: Utc::now(),
            status: PendingStatus::Pending,
        };
        state
            .pending_by_agent
            .entry(agent_id)
            .or_default()
            .insert(task_id.clone());
        state.entries.insert(task_id, entry.clone());
        Ok(entry)
    }

    /// `PENDING` entries for `agent_id`, oldest first.
    pub fn get_pending_tasks(&self, agent_id: &AgentId) -> Vec<PendingTaskEntry> {
        let state = self.state.lock();
        let mut pending: Vec<_> = state
            .pending_by_agent
            .get(agent_id)
            .into_iter()
            .flatten()
            .filter_map(|id| state.entries.get(id).cloned())
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        pending
    }

    /// Move an entry to `IN_PROGRESS`, freeing the agent's admission slot.
    /// Idempotent for entries already in progress.
    pub fn mark_in_progress(&self, task_id: &TaskId) -> Result<(), QueueError> {
        let mut state = self.state.lock();
        let agent_id = match state.entries.get_mut(task_id) {
            None => return Err(QueueError::NotQueued(task_id.clone())),
            Some(entry) if entry.status == PendingStatus::InProgress => return Ok(()),
            Some(entry) => {
                entry.status = PendingStatus::InProgress;
                entry.agent_id.clone()
            }
        };
        state.unindex(&agent_id, task_id);
        Ok(())
    }

    pub fn remove_task(&self, task_id: &TaskId) -> Option<PendingTaskEntry> {
        self.state.lock().remove(task_id)
    }

    pub fn get(&self, task_id: &TaskId) -> Option<PendingTaskEntry> {
        self.state.lock().entries.get(task_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Number of agents that currently hold at least one pending entry.
    pub fn busy_agents(&self) -> usize {
        self.state.lock().pending_by_agent.len()
    }

    pub async fn check_timeouts(&self) -> SweepReport {
        self.check_timeouts_at(Utc::now()).await
    }

    /// Expire every entry older than the task timeout as of `now`.
    pub async fn check_timeouts_at(&self, now: DateTime<Utc>) -> SweepReport {
        let timeout = chrono::Duration::from_std(self.task_timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(i64::from(u32::MAX)));

        let expired: Vec<PendingTaskEntry> = {
            let state = self.state.lock();
            state
                .entries
                .values()
                .filter(|entry| now - entry.created_at > timeout)
                .cloned()
                .collect()
        };

        let mut report = SweepReport {
            expired: expired.len(),
            ..SweepReport::default()
        };

        for entry in expired {
            match self.repository.expire(&entry.task_id, TIMEOUT_REASON).await {
                Ok(outcome) => {
                    self.state.lock().remove(&entry.task_id);
                    report.timed_out += 1;
                    metrics::counter!("courier_tasks_timed_out_total").increment(1);
                    info!(
                        task_id = %entry.task_id,
                        agent_id = %entry.agent_id,
                        hops = outcome.hops.len(),
                        "Task timed out"
                    );
                    for (from, to) in outcome.hops {
                        self.event_bus.publish_task_event(TaskEvent::TaskStateChanged {
                            task_id: entry.task_id.clone(),
                            from,
                            to,
                            changed_at: outcome.task.updated_at,
                        });
                    }
                    self.event_bus.publish_task_event(TaskEvent::TaskTimedOut {
                        task_id: entry.task_id.clone(),
                        agent_id: entry.agent_id.clone(),
                        timed_out_at: outcome.task.updated_at,
                    });
                }
                Err(RepositoryError::AlreadyTerminal { state, .. }) => {
                    self.state.lock().remove(&entry.task_id);
                    report.dropped += 1;
                    debug!(
                        task_id = %entry.task_id,
                        agent_id = %entry.agent_id,
                        %state,
                        "Dropping queue entry for task that already finished"
                    );
                }
                Err(RepositoryError::NotFound(_)) => {
                    self.state.lock().remove(&entry.task_id);
                    report.dropped += 1;
                    warn!(
                        task_id = %entry.task_id,
                        agent_id = %entry.agent_id,
                        "Dropping queue entry for task missing from the store"
                    );
                }
                Err(e) => {
                    report.failed += 1;
                    metrics::counter!("courier_timeout_sweep_failures_total").increment(1);
                    warn!(
                        task_id = %entry.task_id,
                        agent_id = %entry.agent_id,
                        error = %e,
                        "Failed to persist task timeout; will retry next sweep"
                    );
                }
            }
        }

        if report.expired > 0 {
            debug!(
                expired = report.expired,
                timed_out = report.timed_out,
                dropped = report.dropped,
                failed = report.failed,
                "Timeout sweep finished"
            );
        }
        report
    }

    /// Run [`Self::check_timeouts`] every `interval` until cancelled. Each
    /// sweep runs in its own task so a panic is logged and the next tick
    /// still fires.
    pub fn spawn_timeout_sweep(self: &Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let queue = Arc::clone(&queue);
                        if let Err(e) = tokio::spawn(async move { queue.check_timeouts().await }).await {
                            error!(error = %e, "Timeout sweep aborted");
                        }
                    }
                }
            }
            debug!("Timeout sweep stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::repository::{TaskTransitionRecord, TransitionOutcome};
    use crate::domain::task::{NewTask, StateUpdate, Task};
    use crate::domain::task_filter::ValidatedTaskFilter;
    use crate::domain::task_state::TaskState;
    use crate::infrastructure::event_bus::DomainEvent;
    use crate::infrastructure::repositories::InMemoryTaskRepository;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// In-memory store whose `expire` can be made to fail.
    struct FlakyRepository {
        inner: InMemoryTaskRepository,
        fail_expire: AtomicBool,
        expire_calls: AtomicUsize,
    }

    impl FlakyRepository {
        fn new() -> Self {
            Self {
                inner: InMemoryTaskRepository::new(),
                fail_expire: AtomicBool::new(false),
                expire_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl TaskRepository for FlakyRepository {
        async fn create(&self, new_task: NewTask) -> Result<Task, RepositoryError> {
            self.inner.create(new_task).await
        }
        async fn find_by_id(&self, id: &TaskId) -> Result<Option<Task>, RepositoryError> {
            self.inner.find_by_id(id).await
        }
        async fn update_state(
            &self,
            id: &TaskId,
            update: StateUpdate,
        ) -> Result<TransitionOutcome, RepositoryError> {
            self.inner.update_state(id, update).await
        }
        async fn expire(&self, id: &TaskId, reason: &str) -> Result<TransitionOutcome, RepositoryError> {
            self.expire_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_expire.load(Ordering::SeqCst) {
                return Err(RepositoryError::Database("disk I/O error".to_string()));
            }
            self.inner.expire(id, reason).await
        }
        async fn list(&self, filter: &ValidatedTaskFilter) -> Result<Vec<Task>, RepositoryError> {
            self.inner.list(filter).await
        }
        async fn transitions(&self, id: &TaskId) -> Result<Vec<TaskTransitionRecord>, RepositoryError> {
            self.inner.transitions(id).await
        }
    }

    const TIMEOUT: Duration = Duration::from_secs(300);

    fn queue_with(repo: Arc<FlakyRepository>) -> DelegationQueue {
        DelegationQueue::new(repo, EventBus::with_default_capacity(), TIMEOUT)
    }

    async fn delegated(repo: &FlakyRepository, queue: &DelegationQueue, agent: &str) -> PendingTaskEntry {
        let task = repo
            .create(NewTask {
                agent_id: Some(AgentId::from(agent)),
                ..NewTask::default()
            })
            .await
            .unwrap();
        queue
            .add_task(task.id, Some("summarise".to_string()), TaskPriority::Normal, AgentId::from(agent))
            .unwrap()
    }

    #[test]
    fn test_second_pending_task_for_agent_is_refused() {
        let queue = queue_with(Arc::new(FlakyRepository::new()));
        let agent = AgentId::from("writer");
        queue
            .add_task(TaskId::from("t-1"), None, TaskPriority::Normal, agent.clone())
            .unwrap();

        let err = queue
            .add_task(TaskId::from("t-2"), None, TaskPriority::High, agent.clone())
            .unwrap_err();
        assert_eq!(
            err,
            QueueError::AgentBusy {
                agent_id: agent.clone(),
                pending: 1,
                limit: MAX_PENDING_TASKS_PER_AGENT
            }
        );
        assert_eq!(queue.get_pending_tasks(&agent).len(), 1);

        // Other agents are unaffected.
        queue
            .add_task(TaskId::from("t-3"), None, TaskPriority::Normal, AgentId::from("reader"))
            .unwrap();
    }

    #[test]
    fn test_duplicate_task_is_refused() {
        let queue = queue_with(Arc::new(FlakyRepository::new()));
        queue
            .add_task(TaskId::from("t-1"), None, TaskPriority::Normal, AgentId::from("a"))
            .unwrap();
        assert_eq!(
            queue
                .add_task(TaskId::from("t-1"), None, TaskPriority::Normal, AgentId::from("b"))
                .unwrap_err(),
            QueueError::DuplicateTask(TaskId::from("t-1"))
        );
    }

    #[test]
    fn test_in_progress_frees_admission_slot_and_index() {
        let queue = queue_with(Arc::new(FlakyRepository::new()));
        let agent = AgentId::from("writer");
        queue
            .add_task(TaskId::from("t-1"), None, TaskPriority::Normal, agent.clone())
            .unwrap();
        assert_eq!(queue.busy_agents(), 1);

        queue.mark_in_progress(&TaskId::from("t-1")).unwrap();
        queue.mark_in_progress(&TaskId::from("t-1")).unwrap();
        assert!(queue.get_pending_tasks(&agent).is_empty());
        assert_eq!(queue.busy_agents(), 0);
        assert_eq!(queue.get(&TaskId::from("t-1")).unwrap().status, PendingStatus::InProgress);

        queue
            .add_task(TaskId::from("t-2"), None, TaskPriority::Normal, agent.clone())
            .unwrap();
        assert_eq!(queue.len(), 2);
        assert_eq!(
            queue.mark_in_progress(&TaskId::from("missing")),
            Err(QueueError::NotQueued(TaskId::from("missing")))
        );
    }

    #[test]
    fn test_remove_cleans_agent_index() {
        let queue = queue_with(Arc::new(FlakyRepository::new()));
        let agent = AgentId::from("writer");
        queue
            .add_task(TaskId::from("t-1"), None, TaskPriority::Normal, agent.clone())
            .unwrap();
        assert!(queue.remove_task(&TaskId::from("t-1")).is_some());
        assert!(queue.remove_task(&TaskId::from("t-1")).is_none());
        assert_eq!(queue.busy_agents(), 0);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_configured_limit_is_honoured() {
        let queue = queue_with(Arc::new(FlakyRepository::new())).with_max_pending_per_agent(2);
        let agent = AgentId::from("writer");
        for id in ["t-1", "t-2"] {
            queue
                .add_task(TaskId::from(id), None, TaskPriority::Normal, agent.clone())
                .unwrap();
        }
        assert!(matches!(
            queue.add_task(TaskId::from("t-3"), None, TaskPriority::Normal, agent.clone()),
            Err(QueueError::AgentBusy { pending: 2, limit: 2, .. })
        ));
        assert_eq!(queue.get_pending_tasks(&agent).len(), 2);
    }

    #[tokio::test]
    async fn test_timeout_boundary() {
        let repo = Arc::new(FlakyRepository::new());
        let queue = queue_with(repo.clone());
        let entry = delegated(&repo, &queue, "writer").await;
        let timeout = chrono::Duration::from_std(TIMEOUT).unwrap();
        let epsilon = chrono::Duration::seconds(1);

        let report = queue.check_timeouts_at(entry.created_at + timeout - epsilon).await;
        assert_eq!(report, SweepReport::default());
        assert!(queue.get(&entry.task_id).is_some());
        let task = repo.find_by_id(&entry.task_id).await.unwrap().unwrap();
        assert_eq!(task.state, TaskState::Submitted);

        let report = queue.check_timeouts_at(entry.created_at + timeout + epsilon).await;
        assert_eq!(report.timed_out, 1);
        assert!(queue.get(&entry.task_id).is_none());
        assert_eq!(queue.busy_agents(), 0);
        let task = repo.find_by_id(&entry.task_id).await.unwrap().unwrap();
        assert_eq!(task.state, TaskState::Timeout);
    }

    #[tokio::test]
    async fn test_in_progress_age_counts_from_admission() {
        let repo = Arc::new(FlakyRepository::new());
        let queue = queue_with(repo.clone());
        let entry = delegated(&repo, &queue, "writer").await;
        repo.update_state(&entry.task_id, StateUpdate::to(TaskState::Working))
            .await
            .unwrap();
        queue.mark_in_progress(&entry.task_id).unwrap();
        assert_eq!(queue.get(&entry.task_id).unwrap().created_at, entry.created_at);

        let timeout = chrono::Duration::from_std(TIMEOUT).unwrap();
        let report = queue
            .check_timeouts_at(entry.created_at + timeout + chrono::Duration::seconds(1))
            .await;
        assert_eq!(report.timed_out, 1);
        assert!(queue.get(&entry.task_id).is_none());
        let task = repo.find_by_id(&entry.task_id).await.unwrap().unwrap();
        assert_eq!(task.state, TaskState::Timeout);
    }

    #[tokio::test]
    async fn test_failed_write_keeps_entry_for_next_sweep() {
        let repo = Arc::new(FlakyRepository::new());
        let queue = queue_with(repo.clone());
        let stuck = delegated(&repo, &queue, "writer").await;
        let other = delegated(&repo, &queue, "reader").await;
        let later = Utc::now() + chrono::Duration::hours(1);

        repo.fail_expire.store(true, Ordering::SeqCst);
        let report = queue.check_timeouts_at(later).await;
        assert_eq!(report.expired, 2);
        assert_eq!(report.failed, 2);
        assert!(queue.get(&stuck.task_id).is_some());
        assert!(queue.get(&other.task_id).is_some());

        repo.fail_expire.store(false, Ordering::SeqCst);
        let report = queue.check_timeouts_at(later).await;
        assert_eq!(report.timed_out, 2);
        assert!(queue.is_empty());
        assert_eq!(repo.expire_calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_already_terminal_task_is_dropped() {
        let repo = Arc::new(FlakyRepository::new());
        let queue = queue_with(repo.clone());
        let entry = delegated(&repo, &queue, "writer").await;
        repo.update_state(&entry.task_id, StateUpdate::to(TaskState::Canceled))
            .await
            .unwrap();

        let report = queue.check_timeouts_at(Utc::now() + chrono::Duration::hours(1)).await;
        assert_eq!(report.dropped, 1);
        assert!(queue.is_empty());
        let task = repo.find_by_id(&entry.task_id).await.unwrap().unwrap();
        assert_eq!(task.state, TaskState::Canceled);
    }

    #[tokio::test]
    async fn test_timeout_publishes_events() {
        let repo = Arc::new(FlakyRepository::new());
        let queue = queue_with(repo.clone());
        let mut events = queue.event_bus.subscribe();
        let entry = delegated(&repo, &queue, "writer").await;

        queue.check_timeouts_at(Utc::now() + chrono::Duration::hours(1)).await;

        let mut hops = Vec::new();
        let mut timed_out = false;
        while let Ok(event) = events.try_recv() {
            match event {
                DomainEvent::Task(TaskEvent::TaskStateChanged { from, to, .. }) => hops.push((from, to)),
                DomainEvent::Task(TaskEvent::TaskTimedOut { task_id, agent_id, .. }) => {
                    assert_eq!(task_id, entry.task_id);
                    assert_eq!(agent_id, AgentId::from("writer"));
                    timed_out = true;
                }
                _ => {}
            }
        }
        assert!(timed_out);
        assert_eq!(
            hops,
            vec![
                (TaskState::Submitted, TaskState::Working),
                (TaskState::Working, TaskState::Timeout)
            ]
        );
    }

    #[tokio::test]
    async fn test_sweep_task_stops_on_cancel() {
        let queue = Arc::new(queue_with(Arc::new(FlakyRepository::new())));
        let cancel = CancellationToken::new();
        let handle = queue.spawn_timeout_sweep(Duration::from_millis(10), cancel.clone());
        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweep did not stop")
            .unwrap();
    }
}
