// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Task State Machine
//!
//! Pure lifecycle rules for delegated tasks. No I/O.
//!
//! ```text
//! SUBMITTED ──► WORKING ──► COMPLETED | FAILED | TIMEOUT
//!    │  │         │  ▲
//!    │  │         ▼  │
//!    │  │     INPUT_REQUIRED
//!    │  └──► REJECTED
//!    └─────► CANCELED ◄── (WORKING, INPUT_REQUIRED)
//! ```
//!
//! Terminal states have no outgoing edges. Every requested transition that is
//! not an edge of this graph, including a self-loop, is rejected with a
//! [`TransitionError`].

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::validation::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Submitted,
    Working,
    InputRequired,
    Completed,
    Failed,
    Canceled,
    Rejected,
    Timeout,
}

/// A requested transition that is not an edge of the lifecycle graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid task state transition {from} -> {to}")]
pub struct TransitionError {
    pub from: TaskState,
    pub to: TaskState,
}

impl TaskState {
    pub const INITIAL: TaskState = TaskState::Submitted;

    pub const ALL: [TaskState; 8] = [
        TaskState::Submitted,
        TaskState::Working,
        TaskState::InputRequired,
        TaskState::Completed,
        TaskState::Failed,
        TaskState::Canceled,
        TaskState::Rejected,
        TaskState::Timeout,
    ];

    /// Canonical wire/storage spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Submitted => "SUBMITTED",
            TaskState::Working => "WORKING",
            TaskState::InputRequired => "INPUT_REQUIRED",
            TaskState::Completed => "COMPLETED",
            TaskState::Failed => "FAILED",
            TaskState::Canceled => "CANCELED",
            TaskState::Rejected => "REJECTED",
            TaskState::Timeout => "TIMEOUT",
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.allowed_transitions().is_empty()
    }

    /// Outgoing edges of this state.
    pub fn allowed_transitions(&self) -> &'static [TaskState] {
        match self {
            TaskState::Submitted => &[TaskState::Working, TaskState::Canceled, TaskState::Rejected],
            TaskState::Working => &[
                TaskState::Completed,
                TaskState::Failed,
                TaskState::Timeout,
                TaskState::Canceled,
                TaskState::InputRequired,
            ],
            TaskState::InputRequired => &[TaskState::Working, TaskState::Canceled],
            TaskState::Completed
            | TaskState::Failed
            | TaskState::Canceled
            | TaskState::Rejected
            | TaskState::Timeout => &[],
        }
    }

    pub fn can_transition_to(&self, next: TaskState) -> bool {
        self.allowed_transitions().contains(&next)
    }

    /// Validate a single hop, returning the new state.
    pub fn transition(self, next: TaskState) -> Result<TaskState, TransitionError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(TransitionError { from: self, to: next })
        }
    }

    /// Shortest sequence of valid hops from `self` to `target`, excluding `self`.
    ///
    /// Returns `None` when `target` is unreachable (always the case from a
    /// terminal state) and an empty path when `self == target`.
    pub fn path_to(self, target: TaskState) -> Option<Vec<TaskState>> {
        if self == target {
            return Some(Vec::new());
        }

        let mut previous: HashMap<TaskState, TaskState> = HashMap::new();
        let mut frontier = VecDeque::from([self]);

        while let Some(state) = frontier.pop_front() {
            for &next in state.allowed_transitions() {
                if next == self || previous.contains_key(&next) {
                    continue;
                }
                previous.insert(next, state);
                if next == target {
                    let mut path = vec![target];
                    let mut cursor = target;
                    while let Some(&prev) = previous.get(&cursor) {
                        if prev == self {
                            break;
                        }
                        path.push(prev);
                        cursor = prev;
                    }
                    path.reverse();
                    return Some(path);
                }
                frontier.push_back(next);
            }
        }

        None
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = ValidationError;

    /// Whitelist lookup. Anything that is not one of the eight canonical names
    /// (compared case-insensitively) is rejected, never passed through.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        TaskState::ALL
            .iter()
            .copied()
            .find(|state| state.as_str().eq_ignore_ascii_case(raw))
            .ok_or_else(|| {
                ValidationError::new("state", format!("unknown task state '{}'", raw))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EDGES: &[(TaskState, TaskState)] = &[
        (TaskState::Submitted, TaskState::Working),
        (TaskState::Submitted, TaskState::Canceled),
        (TaskState::Submitted, TaskState::Rejected),
        (TaskState::Working, TaskState::Completed),
        (TaskState::Working, TaskState::Failed),
        (TaskState::Working, TaskState::Timeout),
        (TaskState::Working, TaskState::Canceled),
        (TaskState::Working, TaskState::InputRequired),
        (TaskState::InputRequired, TaskState::Working),
        (TaskState::InputRequired, TaskState::Canceled),
    ];

    #[test]
    fn test_every_pair_matches_edge_table() {
        for from in TaskState::ALL {
            for to in TaskState::ALL {
                let expected = EDGES.contains(&(from, to));
                let result = from.transition(to);
                assert_eq!(
                    result.is_ok(),
                    expected,
                    "transition {} -> {} expected ok={}",
                    from,
                    to,
                    expected
                );
                if let Err(err) = result {
                    assert_eq!(err, TransitionError { from, to });
                }
            }
        }
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        let terminal: Vec<_> = TaskState::ALL.iter().filter(|s| s.is_terminal()).copied().collect();
        assert_eq!(
            terminal,
            vec![
                TaskState::Completed,
                TaskState::Failed,
                TaskState::Canceled,
                TaskState::Rejected,
                TaskState::Timeout,
            ]
        );
        assert!(TaskState::Canceled.transition(TaskState::Canceled).is_err());
        assert!(!TaskState::INITIAL.is_terminal());
    }

    #[test]
    fn test_path_to_timeout() {
        assert_eq!(
            TaskState::Submitted.path_to(TaskState::Timeout),
            Some(vec![TaskState::Working, TaskState::Timeout])
        );
        assert_eq!(
            TaskState::InputRequired.path_to(TaskState::Timeout),
            Some(vec![TaskState::Working, TaskState::Timeout])
        );
        assert_eq!(
            TaskState::Working.path_to(TaskState::Timeout),
            Some(vec![TaskState::Timeout])
        );
        assert_eq!(TaskState::Completed.path_to(TaskState::Timeout), None);
        assert_eq!(TaskState::Working.path_to(TaskState::Working), Some(vec![]));
    }

    #[test]
    fn test_parse_is_whitelisted() {
        assert_eq!("SUBMITTED".parse::<TaskState>().unwrap(), TaskState::Submitted);
        assert_eq!("input_required".parse::<TaskState>().unwrap(), TaskState::InputRequired);

        let err = "SUBMITTED' OR '1'='1".parse::<TaskState>().unwrap_err();
        assert_eq!(err.field, "state");
        assert!("".parse::<TaskState>().is_err());
    }

    #[test]
    fn test_serde_uses_canonical_names() {
        let json = serde_json::to_string(&TaskState::InputRequired).unwrap();
        assert_eq!(json, "\"INPUT_REQUIRED\"");
        let parsed: TaskState = serde_json::from_str("\"TIMEOUT\"").unwrap();
        assert_eq!(parsed, TaskState::Timeout);
    }
}
