// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # SQLite Agent Record Repository
//!
//! `AgentRecordRepository` over the `a2a_agents` table. Capabilities are
//! stored as a JSON array; `NULL` means the peer advertised none.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::domain::agent::{AgentId, AgentRecord, AgentStatus};
use crate::domain::repository::{AgentRecordRepository, RepositoryError};
use crate::infrastructure::db::{decode_timestamp, encode_timestamp, SqlitePool};

pub struct SqliteAgentRecordRepository {
    pool: SqlitePool,
}

impl SqliteAgentRecordRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn row_to_record(row: &SqliteRow) -> Result<AgentRecord, RepositoryError> {
    let status: String = row.try_get("status")?;
    let port: i64 = row.try_get("port")?;
    let last_heartbeat: String = row.try_get("last_heartbeat")?;
    let pid: Option<i64> = row.try_get("process_pid")?;
    let capabilities: Option<String> = row.try_get("capabilities")?;

    Ok(AgentRecord {
        agent_id: AgentId(row.try_get("agent_id")?),
        base_url: row.try_get("base_url")?,
        port: u16::try_from(port)
            .map_err(|_| RepositoryError::Serialization(format!("port {} out of range", port)))?,
        status: AgentStatus::parse(&status).ok_or_else(|| {
            RepositoryError::Serialization(format!("unknown agent status '{}'", status))
        })?,
        last_heartbeat: decode_timestamp(&last_heartbeat)?,
        process_pid: pid.and_then(|p| u32::try_from(p).ok()),
        capabilities: capabilities
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?,
    })
}

const SELECT_AGENT: &str =
    "SELECT agent_id, base_url, port, status, last_heartbeat, process_pid, capabilities FROM a2a_agents";

#[async_trait]
impl AgentRecordRepository for SqliteAgentRecordRepository {
    async fn save(&self, record: &AgentRecord) -> Result<(), RepositoryError> {
        let capabilities = record
            .capabilities
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let mut conn = self.pool.acquire().await?;

        sqlx::query(
            r#"
            INSERT INTO a2a_agents (
                agent_id, base_url, port, status, last_heartbeat, process_pid, capabilities
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (agent_id) DO UPDATE SET
                base_url = excluded.base_url,
                port = excluded.port,
                status = excluded.status,
                last_heartbeat = excluded.last_heartbeat,
                process_pid = excluded.process_pid,
                capabilities = excluded.capabilities
            "#,
        )
        .bind(record.agent_id.as_str())
        .bind(&record.base_url)
        .bind(record.port as i64)
        .bind(record.status.as_str())
        .bind(encode_timestamp(&record.last_heartbeat))
        .bind(record.process_pid.map(i64::from))
        .bind(capabilities)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, id: &AgentId) -> Result<Option<AgentRecord>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        let row = sqlx::query(&format!("{} WHERE agent_id = ?", SELECT_AGENT))
            .bind(id.as_str())
            .fetch_optional(&mut *conn)
            .await?;
        row.as_ref().map(row_to_record).transpose()
    }

    async fn list_active(&self) -> Result<Vec<AgentRecord>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query(&format!(
            "{} WHERE status = 'active' ORDER BY agent_id",
            SELECT_AGENT
        ))
        .fetch_all(&mut *conn)
        .await?;
        rows.iter().map(row_to_record).collect()
    }

    async fn touch(&self, id: &AgentId, at: DateTime<Utc>) -> Result<bool, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        let result = sqlx::query(
            "UPDATE a2a_agents SET last_heartbeat = ?, status = 'active' WHERE agent_id = ?",
        )
        .bind(encode_timestamp(&at))
        .bind(id.as_str())
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_stale(&self, id: &AgentId) -> Result<bool, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        let result = sqlx::query("UPDATE a2a_agents SET status = 'stale' WHERE agent_id = ?")
            .bind(id.as_str())
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_stale(&self) -> Result<usize, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        let result = sqlx::query("DELETE FROM a2a_agents WHERE status = 'stale'")
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected() as usize)
    }
}
