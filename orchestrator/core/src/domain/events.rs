// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::agent::AgentId;
use crate::domain::task::{TaskId, TaskPriority};
use crate::domain::task_state::TaskState;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TaskEvent {
    TaskCreated {
        task_id: TaskId,
        agent_id: Option<AgentId>,
        priority: TaskPriority,
        created_at: DateTime<Utc>,
    },
    TaskStateChanged {
        task_id: TaskId,
        from: TaskState,
        to: TaskState,
        changed_at: DateTime<Utc>,
    },
    /// Emitted by the timeout sweep once the store accepted the TIMEOUT write.
    TaskTimedOut {
        task_id: TaskId,
        agent_id: AgentId,
        timed_out_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AgentEvent {
    AgentRegistered {
        agent_id: AgentId,
        registered_at: DateTime<Utc>,
    },
    AgentMarkedStale {
        agent_id: AgentId,
        reason: StaleReason,
        marked_at: DateTime<Utc>,
    },
    OrphanProcessTerminated {
        agent_id: AgentId,
        pid: u32,
        terminated_at: DateTime<Utc>,
    },
    AgentsPurged {
        count: usize,
        purged_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StaleReason {
    /// The backing process no longer exists.
    ProcessGone,
    /// The process exists but is not interactive and stopped heartbeating.
    HeartbeatExpired,
}
