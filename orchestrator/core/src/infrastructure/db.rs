// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # SQLite Store
//!
//! Connection manager and schema for the file-backed task and agent store.
//! Every connection is opened in WAL mode with foreign-key enforcement turned
//! on, and the setting is read back after connecting: a connection on which
//! `PRAGMA foreign_keys` does not report `1` is closed and rejected.
//!
//! Timestamps are stored as RFC 3339 text with microsecond precision and a
//! `Z` suffix so lexical order matches chronological order.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqliteSynchronous};
use sqlx::{ConnectOptions, Connection};
use tracing::{debug, info, warn};

use crate::domain::repository::RepositoryError;
use crate::infrastructure::pool::{ConnectionManager, ConnectionPool, PoolConfig, PoolError};

pub type SqlitePool = ConnectionPool<SqliteConnectionManager>;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SqliteConnectionManager {
    path: PathBuf,
    options: SqliteConnectOptions,
}

impl SqliteConnectionManager {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(BUSY_TIMEOUT);
        Self { path, options }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ConnectionManager for SqliteConnectionManager {
    type Connection = SqliteConnection;

    async fn connect(&self) -> Result<SqliteConnection, PoolError> {
        let mut conn = self
            .options
            .connect()
            .await
            .map_err(|e| PoolError::Connect(format!("{}: {}", self.path.display(), e)))?;

        let foreign_keys: i64 = sqlx::query_scalar("PRAGMA foreign_keys")
            .fetch_one(&mut conn)
            .await
            .map_err(|e| PoolError::Connect(e.to_string()))?;
        if foreign_keys != 1 {
            let _ = conn.close().await;
            return Err(PoolError::Connect(
                "foreign key enforcement could not be enabled".to_string(),
            ));
        }

        let journal: String = sqlx::query_scalar("PRAGMA journal_mode")
            .fetch_one(&mut conn)
            .await
            .map_err(|e| PoolError::Connect(e.to_string()))?;
        if !journal.eq_ignore_ascii_case("wal") {
            warn!(path = %self.path.display(), journal_mode = %journal, "SQLite is not in WAL mode");
        }

        Ok(conn)
    }

    async fn is_valid(&self, conn: &mut SqliteConnection) -> bool {
        conn.ping().await.is_ok()
    }

    async fn close(&self, conn: SqliteConnection) {
        if let Err(e) = conn.close().await {
            debug!(error = %e, "Error closing SQLite connection");
        }
    }
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS a2a_tasks (
        id          TEXT PRIMARY KEY,
        state       TEXT NOT NULL CHECK (state IN (
                        'SUBMITTED', 'WORKING', 'INPUT_REQUIRED', 'COMPLETED',
                        'FAILED', 'CANCELED', 'REJECTED', 'TIMEOUT')),
        priority    TEXT NOT NULL CHECK (priority IN ('low', 'normal', 'high', 'urgent')),
        name        TEXT,
        description TEXT,
        session_id  TEXT,
        agent_id    TEXT,
        messages    TEXT NOT NULL DEFAULT '[]',
        artifacts   TEXT NOT NULL DEFAULT '[]',
        result      TEXT,
        error       TEXT,
        metadata    TEXT NOT NULL DEFAULT '{}',
        created_at  TEXT NOT NULL,
        updated_at  TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_a2a_tasks_state ON a2a_tasks(state)",
    "CREATE INDEX IF NOT EXISTS idx_a2a_tasks_priority ON a2a_tasks(priority)",
    "CREATE INDEX IF NOT EXISTS idx_a2a_tasks_created_at ON a2a_tasks(created_at)",
    r#"
    CREATE TABLE IF NOT EXISTS a2a_task_transitions (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        task_id     TEXT NOT NULL REFERENCES a2a_tasks(id) ON DELETE RESTRICT,
        from_state  TEXT NOT NULL,
        to_state    TEXT NOT NULL,
        reason      TEXT,
        changed_at  TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_a2a_task_transitions_task ON a2a_task_transitions(task_id)",
    r#"
    CREATE TABLE IF NOT EXISTS a2a_agents (
        agent_id       TEXT PRIMARY KEY,
        base_url       TEXT NOT NULL,
        port           INTEGER NOT NULL,
        status         TEXT NOT NULL CHECK (status IN ('active', 'stale')),
        last_heartbeat TEXT NOT NULL,
        process_pid    INTEGER,
        capabilities   TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_a2a_agents_status ON a2a_agents(status)",
];

/// Create tables and indexes if they do not exist yet.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), RepositoryError> {
    let mut conn = pool.acquire().await?;
    let mut tx = conn.begin_with("BEGIN IMMEDIATE").await?;
    for statement in SCHEMA {
        sqlx::query(*statement).execute(&mut *tx).await?;
    }
    tx.commit().await?;
    Ok(())
}

/// Open the pool for `path` and bring the schema up to date.
pub async fn open(path: impl AsRef<Path>, config: PoolConfig) -> Result<SqlitePool, RepositoryError> {
    let manager = SqliteConnectionManager::new(path.as_ref());
    let pool = ConnectionPool::new(manager, config).await?;
    run_migrations(&pool).await?;
    info!(path = %path.as_ref().display(), "SQLite store ready");
    Ok(pool)
}

pub fn encode_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_timestamp(raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Serialization(format!("bad timestamp '{}': {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connection_enforces_foreign_keys_and_wal() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SqliteConnectionManager::new(dir.path().join("store.db"));
        let mut conn = manager.connect().await.unwrap();

        let fk: i64 = sqlx::query_scalar("PRAGMA foreign_keys")
            .fetch_one(&mut conn)
            .await
            .unwrap();
        assert_eq!(fk, 1);

        let journal: String = sqlx::query_scalar("PRAGMA journal_mode")
            .fetch_one(&mut conn)
            .await
            .unwrap();
        assert_eq!(journal.to_lowercase(), "wal");
        assert!(manager.is_valid(&mut conn).await);
        manager.close(conn).await;
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent_and_enforce_references() {
        let dir = tempfile::tempdir().unwrap();
        let pool = open(dir.path().join("store.db"), PoolConfig::default())
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();

        let mut conn = pool.acquire().await.unwrap();
        let orphan = sqlx::query(
            "INSERT INTO a2a_task_transitions (task_id, from_state, to_state, changed_at)
             VALUES ('missing', 'SUBMITTED', 'WORKING', '2026-01-01T00:00:00.000000Z')",
        )
        .execute(&mut *conn)
        .await;
        assert!(orphan.is_err());
    }

    #[test]
    fn test_timestamps_sort_lexically() {
        let a = DateTime::parse_from_rfc3339("2026-01-01T00:00:00.5Z")
            .unwrap()
            .with_timezone(&Utc);
        let b = a + chrono::Duration::microseconds(1);
        let (ea, eb) = (encode_timestamp(&a), encode_timestamp(&b));
        assert!(ea < eb);
        assert_eq!(decode_timestamp(&ea).unwrap(), a);
        assert!(decode_timestamp("not a time").is_err());
    }
}
