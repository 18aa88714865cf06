//! `SQLite`-backed implementation of [`StateBackend`].
//!
//! Uses a single `Mutex<Connection>` for thread safety. Status changes run in
//! an immediate transaction so a second process sharing the file sees either
//! the old or the new state.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{NaiveDateTime, Utc};
use etlflow_types::checkpoint::CheckpointRecord;
use etlflow_types::state::{
    Execution, ExecutionFailure, ExecutionId, ExecutionStats, ExecutionStatus, PipelineId,
};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior};

use crate::backend::StateBackend;
use crate::error::{self, StateError};

/// `SQLite` datetime format (UTC, no timezone suffix).
const SQLITE_DATETIME_FMT: &str = "%Y-%m-%d %H:%M:%S";

/// Idempotent DDL for state tables.
const CREATE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS executions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    pipeline TEXT NOT NULL,
    version TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    started_at TEXT,
    finished_at TEXT,
    rows_processed INTEGER NOT NULL DEFAULT 0,
    rows_successful INTEGER NOT NULL DEFAULT 0,
    rows_failed INTEGER NOT NULL DEFAULT 0,
    current_step INTEGER,
    error_message TEXT,
    error_step INTEGER,
    execution_log TEXT,
    resumed_from INTEGER REFERENCES executions(id),
    cancel_requested INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_executions_pipeline ON executions (pipeline, id);

CREATE TABLE IF NOT EXISTS checkpoints (
    pipeline TEXT NOT NULL,
    execution_id INTEGER NOT NULL REFERENCES executions(id),
    version TEXT NOT NULL,
    step_index INTEGER NOT NULL,
    checkpoint_data TEXT NOT NULL,
    rows_processed INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    expires_at TEXT NOT NULL,
    PRIMARY KEY (execution_id, step_index)
);

CREATE INDEX IF NOT EXISTS idx_checkpoints_pipeline ON checkpoints (pipeline);
";

const EXECUTION_COLUMNS: &str = "id, pipeline, version, status, created_at, started_at, \
     finished_at, rows_processed, rows_successful, rows_failed, current_step, error_message, \
     error_step, execution_log, resumed_from, cancel_requested";

const CHECKPOINT_COLUMNS: &str = "pipeline, execution_id, version, step_index, checkpoint_data, \
     rows_processed, created_at, expires_at";

/// `SQLite`-backed state storage.
///
/// Create with [`SqliteStateBackend::open`] for file-backed persistence
/// or [`SqliteStateBackend::in_memory`] for tests.
pub struct SqliteStateBackend {
    conn: Mutex<Connection>,
}

impl SqliteStateBackend {
    /// Open or create a `SQLite` state database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] if the directory can't be created,
    /// or [`StateError::Sqlite`] if the database can't be opened.
    pub fn open(path: &Path) -> error::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(CREATE_TABLES)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory `SQLite` backend (for testing).
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Sqlite`] if the in-memory database can't
    /// be initialized.
    pub fn in_memory() -> error::Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(CREATE_TABLES)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the connection lock.
    fn lock_conn(&self) -> error::Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StateError::LockPoisoned)
    }

    /// Format current UTC time for `SQLite` storage.
    fn now_sqlite() -> String {
        Utc::now().format(SQLITE_DATETIME_FMT).to_string()
    }

    /// Convert a `SQLite` datetime string to ISO-8601.
    fn sqlite_to_iso8601(raw: &str) -> String {
        NaiveDateTime::parse_from_str(raw, SQLITE_DATETIME_FMT).map_or_else(
            |_| raw.to_string(),
            |ndt| format!("{}Z", ndt.format("%Y-%m-%dT%H:%M:%S")),
        )
    }

    /// Convert an ISO-8601 string to `SQLite` datetime format.
    fn iso8601_to_sqlite(iso: &str) -> String {
        chrono::DateTime::parse_from_rfc3339(iso).map_or_else(
            |_| iso.to_string(),
            |dt| {
                dt.with_timezone(&Utc)
                    .format(SQLITE_DATETIME_FMT)
                    .to_string()
            },
        )
    }

    fn current_status(conn: &Connection, id: ExecutionId) -> error::Result<ExecutionStatus> {
        let raw: Option<String> = conn
            .query_row(
                "SELECT status FROM executions WHERE id = ?1",
                [id.get()],
                |row| row.get(0),
            )
            .optional()?;
        let raw = raw.ok_or(StateError::ExecutionNotFound(id))?;
        ExecutionStatus::parse(&raw)
            .ok_or_else(|| StateError::Corrupt(format!("execution {id} has status '{raw}'")))
    }

    /// Check that `id` may move to `to`, returning its current status.
    fn check_transition(
        conn: &Connection,
        id: ExecutionId,
        to: ExecutionStatus,
    ) -> error::Result<ExecutionStatus> {
        let from = Self::current_status(conn, id)?;
        if from.can_transition_to(to) {
            Ok(from)
        } else {
            Err(StateError::InvalidTransition { id, from, to })
        }
    }

    fn execution_from_row(row: &Row<'_>) -> rusqlite::Result<Execution> {
        let status_raw: String = row.get(3)?;
        let status = ExecutionStatus::parse(&status_raw).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                Type::Text,
                format!("unknown execution status '{status_raw}'").into(),
            )
        })?;
        Ok(Execution {
            id: ExecutionId::new(row.get(0)?),
            pipeline: PipelineId::new(row.get::<_, String>(1)?),
            version: row.get(2)?,
            status,
            created_at: Self::sqlite_to_iso8601(&row.get::<_, String>(4)?),
            started_at: row
                .get::<_, Option<String>>(5)?
                .map(|s| Self::sqlite_to_iso8601(&s)),
            finished_at: row
                .get::<_, Option<String>>(6)?
                .map(|s| Self::sqlite_to_iso8601(&s)),
            stats: ExecutionStats {
                rows_processed: to_u64(row.get(7)?),
                rows_successful: to_u64(row.get(8)?),
                rows_failed: to_u64(row.get(9)?),
            },
            current_step: row.get::<_, Option<i64>>(10)?.map(to_u32),
            error_message: row.get(11)?,
            error_step: row.get::<_, Option<i64>>(12)?.map(to_u32),
            execution_log: row.get(13)?,
            resumed_from: row.get::<_, Option<i64>>(14)?.map(ExecutionId::new),
            cancel_requested: row.get(15)?,
        })
    }

    fn checkpoint_from_row(row: &Row<'_>) -> rusqlite::Result<CheckpointRecord> {
        Ok(CheckpointRecord {
            pipeline: PipelineId::new(row.get::<_, String>(0)?),
            execution_id: ExecutionId::new(row.get(1)?),
            version: row.get(2)?,
            step_index: to_u32(row.get(3)?),
            checkpoint_data: row.get(4)?,
            rows_processed: to_u64(row.get(5)?),
            created_at: Self::sqlite_to_iso8601(&row.get::<_, String>(6)?),
            expires_at: Self::sqlite_to_iso8601(&row.get::<_, String>(7)?),
        })
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn to_u32(value: i64) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

impl StateBackend for SqliteStateBackend {
    fn create_execution(
        &self,
        pipeline: &PipelineId,
        version: &str,
        resumed_from: Option<ExecutionId>,
    ) -> error::Result<ExecutionId> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO executions (pipeline, version, status, resumed_from) \
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                pipeline.as_str(),
                version,
                ExecutionStatus::Pending.as_str(),
                resumed_from.map(ExecutionId::get),
            ],
        )?;
        Ok(ExecutionId::new(conn.last_insert_rowid()))
    }

    fn mark_running(&self, id: ExecutionId) -> error::Result<()> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        Self::check_transition(&tx, id, ExecutionStatus::Running)?;
        tx.execute(
            "UPDATE executions SET status = ?1, started_at = ?2 WHERE id = ?3",
            rusqlite::params![ExecutionStatus::Running.as_str(), Self::now_sqlite(), id.get()],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn update_progress(
        &self,
        id: ExecutionId,
        current_step: u32,
        stats: &ExecutionStats,
    ) -> error::Result<()> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let status = Self::current_status(&tx, id)?;
        if status.is_terminal() {
            return Err(StateError::InvalidTransition {
                id,
                from: status,
                to: ExecutionStatus::Running,
            });
        }
        tx.execute(
            "UPDATE executions SET current_step = ?1, rows_processed = ?2, \
             rows_successful = ?3, rows_failed = ?4 WHERE id = ?5",
            rusqlite::params![
                current_step,
                to_i64(stats.rows_processed),
                to_i64(stats.rows_successful),
                to_i64(stats.rows_failed),
                id.get(),
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn complete_execution(
        &self,
        id: ExecutionId,
        status: ExecutionStatus,
        stats: &ExecutionStats,
        failure: Option<&ExecutionFailure>,
    ) -> error::Result<()> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let from = Self::current_status(&tx, id)?;
        if !status.is_terminal() || !from.can_transition_to(status) {
            return Err(StateError::InvalidTransition {
                id,
                from,
                to: status,
            });
        }
        tx.execute(
            "UPDATE executions SET status = ?1, finished_at = ?2, rows_processed = ?3, \
             rows_successful = ?4, rows_failed = ?5, error_message = ?6, error_step = ?7, \
             execution_log = ?8 WHERE id = ?9",
            rusqlite::params![
                status.as_str(),
                Self::now_sqlite(),
                to_i64(stats.rows_processed),
                to_i64(stats.rows_successful),
                to_i64(stats.rows_failed),
                failure.map(|f| f.message.as_str()),
                failure.and_then(|f| f.step),
                failure.map(|f| f.log.as_str()),
                id.get(),
            ],
        )?;
        tx.commit()?;
        tracing::debug!(execution_id = %id, %from, to = %status, "Execution finalized");
        Ok(())
    }

    fn request_cancel(&self, id: ExecutionId) -> error::Result<bool> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        if Self::current_status(&tx, id)?.is_terminal() {
            return Ok(false);
        }
        tx.execute(
            "UPDATE executions SET cancel_requested = 1 WHERE id = ?1",
            [id.get()],
        )?;
        tx.commit()?;
        Ok(true)
    }

    fn get_execution(&self, id: ExecutionId) -> error::Result<Option<Execution>> {
        let conn = self.lock_conn()?;
        let execution = conn
            .query_row(
                &format!("SELECT {EXECUTION_COLUMNS} FROM executions WHERE id = ?1"),
                [id.get()],
                Self::execution_from_row,
            )
            .optional()?;
        Ok(execution)
    }

    fn list_executions(
        &self,
        pipeline: Option<&PipelineId>,
        limit: usize,
    ) -> error::Result<Vec<Execution>> {
        let conn = self.lock_conn()?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = conn.prepare(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM executions \
             WHERE (?1 IS NULL OR pipeline = ?1) ORDER BY id DESC LIMIT ?2"
        ))?;
        let rows = stmt
            .query_map(
                rusqlite::params![pipeline.map(PipelineId::as_str), limit],
                Self::execution_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn save_checkpoint(&self, checkpoint: &CheckpointRecord) -> error::Result<()> {
        let conn = self.lock_conn()?;
        let created_at = Self::iso8601_to_sqlite(&checkpoint.created_at);
        let expires_at = Self::iso8601_to_sqlite(&checkpoint.expires_at);
        conn.execute(
            "INSERT INTO checkpoints \
             (pipeline, execution_id, version, step_index, checkpoint_data, rows_processed, \
              created_at, expires_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
             ON CONFLICT(execution_id, step_index) DO UPDATE SET \
             checkpoint_data = ?5, rows_processed = ?6, created_at = ?7, expires_at = ?8",
            rusqlite::params![
                checkpoint.pipeline.as_str(),
                checkpoint.execution_id.get(),
                checkpoint.version,
                checkpoint.step_index,
                checkpoint.checkpoint_data,
                to_i64(checkpoint.rows_processed),
                created_at,
                expires_at,
            ],
        )?;
        Ok(())
    }

    fn latest_checkpoint(&self, execution: ExecutionId) -> error::Result<Option<CheckpointRecord>> {
        let conn = self.lock_conn()?;
        let checkpoint = conn
            .query_row(
                &format!(
                    "SELECT {CHECKPOINT_COLUMNS} FROM checkpoints \
                     WHERE execution_id = ?1 AND expires_at > ?2 \
                     ORDER BY step_index DESC LIMIT 1"
                ),
                rusqlite::params![execution.get(), Self::now_sqlite()],
                Self::checkpoint_from_row,
            )
            .optional()?;
        Ok(checkpoint)
    }

    fn list_checkpoints(&self, pipeline: &PipelineId) -> error::Result<Vec<CheckpointRecord>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {CHECKPOINT_COLUMNS} FROM checkpoints \
             WHERE pipeline = ?1 AND expires_at > ?2 \
             ORDER BY execution_id DESC, step_index DESC"
        ))?;
        let rows = stmt
            .query_map(
                rusqlite::params![pipeline.as_str(), Self::now_sqlite()],
                Self::checkpoint_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn purge_expired_checkpoints(&self) -> error::Result<u64> {
        let conn = self.lock_conn()?;
        let purged = conn.execute(
            "DELETE FROM checkpoints WHERE expires_at <= ?1",
            [Self::now_sqlite()],
        )?;
        if purged > 0 {
            tracing::info!(purged, "Purged expired checkpoints");
        }
        Ok(purged as u64)
    }
}
