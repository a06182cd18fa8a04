// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # SQLite Task Repository
//!
//! `TaskRepository` over the `a2a_tasks` and `a2a_task_transitions` tables.
//!
//! State writes run inside one `BEGIN IMMEDIATE` transaction, so the write
//! lock is taken before the read and concurrent writers wait on the busy
//! timeout instead of failing a lock upgrade. The row is read, the transition is
//! validated in the domain, the row is updated with a compare-and-set on the
//! state and `updated_at` that were read, and each hop is appended to the
//! history. A concurrent writer that got there first turns into
//! `RepositoryError::Conflict` instead of a lost update.
//!
//! List queries are assembled with `QueryBuilder` from a `ValidatedTaskFilter`
//! only; every value is a bound parameter.

use async_trait::async_trait;
use sqlx::sqlite::{Sqlite, SqliteConnection, SqliteRow};
use sqlx::{Connection, QueryBuilder, Row};

use crate::domain::agent::AgentId;
use crate::domain::repository::{
    RepositoryError, TaskRepository, TaskTransitionRecord, TransitionOutcome,
};
use crate::domain::task::{NewTask, StateUpdate, Task, TaskId, TaskPriority};
use crate::domain::task_filter::ValidatedTaskFilter;
use crate::domain::task_state::TaskState;
use crate::infrastructure::db::{decode_timestamp, encode_timestamp, SqlitePool};
use crate::infrastructure::repositories::walk_to_timeout;

const SELECT_TASK: &str = "SELECT id, state, priority, name, description, session_id, agent_id, \
     messages, artifacts, result, error, metadata, created_at, updated_at FROM a2a_tasks";

pub struct SqliteTaskRepository {
    pool: SqlitePool,
}

impl SqliteTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn load(conn: &mut SqliteConnection, id: &TaskId) -> Result<Task, RepositoryError> {
        let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_TASK))
            .bind(id.as_str())
            .fetch_optional(&mut *conn)
            .await?;
        match row {
            Some(row) => row_to_task(&row),
            None => Err(RepositoryError::NotFound(format!("task {}", id))),
        }
    }

    /// Persist `task` (already moved through `hops`) over the row that still
    /// holds `before`, and append the hops to the history.
    async fn write_transition(
        conn: &mut SqliteConnection,
        before: &Task,
        task: &Task,
        hops: &[(TaskState, TaskState)],
        reason: Option<&str>,
    ) -> Result<(), RepositoryError> {
        let result = task
            .result
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let updated = sqlx::query(
            r#"
            UPDATE a2a_tasks
            SET state = ?, result = ?, error = ?, updated_at = ?
            WHERE id = ? AND state = ? AND updated_at = ?
            "#,
        )
        .bind(task.state.as_str())
        .bind(result)
        .bind(task.error.as_deref())
        .bind(encode_timestamp(&task.updated_at))
        .bind(task.id.as_str())
        .bind(before.state.as_str())
        .bind(encode_timestamp(&before.updated_at))
        .execute(&mut *conn)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(RepositoryError::Conflict(format!("task {}", task.id)));
        }

        for (from, to) in hops {
            sqlx::query(
                r#"
                INSERT INTO a2a_task_transitions (task_id, from_state, to_state, reason, changed_at)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(task.id.as_str())
            .bind(from.as_str())
            .bind(to.as_str())
            .bind(reason)
            .bind(encode_timestamp(&task.updated_at))
            .execute(&mut *conn)
            .await?;
        }
        Ok(())
    }
}

fn corrupt(column: &str, err: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::Serialization(format!("column {}: {}", column, err))
}

fn row_to_task(row: &SqliteRow) -> Result<Task, RepositoryError> {
    let state: String = row.try_get("state")?;
    let priority: String = row.try_get("priority")?;
    let messages: String = row.try_get("messages")?;
    let artifacts: String = row.try_get("artifacts")?;
    let result: Option<String> = row.try_get("result")?;
    let metadata: String = row.try_get("metadata")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    let agent_id: Option<String> = row.try_get("agent_id")?;

    Ok(Task {
        id: TaskId(row.try_get("id")?),
        state: state.parse::<TaskState>().map_err(|e| corrupt("state", e))?,
        created_at: decode_timestamp(&created_at)?,
        updated_at: decode_timestamp(&updated_at)?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        priority: priority
            .parse::<TaskPriority>()
            .map_err(|e| corrupt("priority", e))?,
        session_id: row.try_get("session_id")?,
        agent_id: agent_id.map(AgentId),
        messages: serde_json::from_str(&messages)?,
        artifacts: serde_json::from_str(&artifacts)?,
        result: result.as_deref().map(serde_json::from_str).transpose()?,
        error: row.try_get("error")?,
        metadata: serde_json::from_str(&metadata)?,
    })
}

#[async_trait]
impl TaskRepository for SqliteTaskRepository {
    async fn create(&self, new_task: NewTask) -> Result<Task, RepositoryError> {
        let task = Task::new(new_task);
        let mut conn = self.pool.acquire().await?;

        sqlx::query(
            r#"
            INSERT INTO a2a_tasks (
                id, state, priority, name, description, session_id, agent_id,
                messages, artifacts, result, error, metadata, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, NULL, ?, ?, ?)
            "#,
        )
        .bind(task.id.as_str())
        .bind(task.state.as_str())
        .bind(task.priority.as_str())
        .bind(task.name.as_deref())
        .bind(task.description.as_deref())
        .bind(task.session_id.as_deref())
        .bind(task.agent_id.as_ref().map(|a| a.as_str()))
        .bind(serde_json::to_string(&task.messages)?)
        .bind(serde_json::to_string(&task.artifacts)?)
        .bind(serde_json::to_string(&task.metadata)?)
        .bind(encode_timestamp(&task.created_at))
        .bind(encode_timestamp(&task.updated_at))
        .execute(&mut *conn)
        .await?;

        Ok(task)
    }

    async fn find_by_id(&self, id: &TaskId) -> Result<Option<Task>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        match Self::load(&mut conn, id).await {
            Ok(task) => Ok(Some(task)),
            Err(RepositoryError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn update_state(
        &self,
        id: &TaskId,
        update: StateUpdate,
    ) -> Result<TransitionOutcome, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        let mut tx = conn.begin_with("BEGIN IMMEDIATE").await?;

        let before = Self::load(&mut tx, id).await?;
        let mut task = before.clone();
        let previous = task.apply(&update)?;
        let hops = vec![(previous, update.state)];
        Self::write_transition(&mut tx, &before, &task, &hops, update.error.as_deref()).await?;

        tx.commit().await?;
        Ok(TransitionOutcome { task, hops })
    }

    async fn expire(&self, id: &TaskId, reason: &str) -> Result<TransitionOutcome, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        let mut tx = conn.begin_with("BEGIN IMMEDIATE").await?;

        let before = Self::load(&mut tx, id).await?;
        let mut task = before.clone();
        let hops = walk_to_timeout(&mut task, reason)?;
        Self::write_transition(&mut tx, &before, &task, &hops, Some(reason)).await?;

        tx.commit().await?;
        Ok(TransitionOutcome { task, hops })
    }

    async fn list(&self, filter: &ValidatedTaskFilter) -> Result<Vec<Task>, RepositoryError> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(SELECT_TASK);
        qb.push(" WHERE 1 = 1");

        if !filter.states.is_empty() {
            qb.push(" AND state IN (");
            let mut values = qb.separated(", ");
            for state in &filter.states {
                values.push_bind(state.as_str());
            }
            values.push_unseparated(")");
        }
        if !filter.priorities.is_empty() {
            qb.push(" AND priority IN (");
            let mut values = qb.separated(", ");
            for priority in &filter.priorities {
                values.push_bind(priority.as_str());
            }
            values.push_unseparated(")");
        }
        if let Some(after) = &filter.created_after {
            qb.push(" AND created_at >= ").push_bind(encode_timestamp(after));
        }
        if let Some(before) = &filter.created_before {
            qb.push(" AND created_at <= ").push_bind(encode_timestamp(before));
        }
        qb.push(" ORDER BY created_at DESC, id ASC LIMIT ")
            .push_bind(filter.limit as i64)
            .push(" OFFSET ")
            .push_bind(filter.offset as i64);

        let mut conn = self.pool.acquire().await?;
        let rows = qb.build().fetch_all(&mut *conn).await?;
        rows.iter().map(row_to_task).collect()
    }

    async fn transitions(&self, id: &TaskId) -> Result<Vec<TaskTransitionRecord>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query(
            r#"
            SELECT from_state, to_state, reason, changed_at
            FROM a2a_task_transitions
            WHERE task_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(id.as_str())
        .fetch_all(&mut *conn)
        .await?;

        rows.iter()
            .map(|row| -> Result<TaskTransitionRecord, RepositoryError> {
                let from: String = row.try_get("from_state")?;
                let to: String = row.try_get("to_state")?;
                let changed_at: String = row.try_get("changed_at")?;
                Ok(TaskTransitionRecord {
                    task_id: id.clone(),
                    from: from.parse().map_err(|e| corrupt("from_state", e))?,
                    to: to.parse().map_err(|e| corrupt("to_state", e))?,
                    reason: row.try_get("reason")?,
                    changed_at: decode_timestamp(&changed_at)?,
                })
            })
            .collect()
    }
}
