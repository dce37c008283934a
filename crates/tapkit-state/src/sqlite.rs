//! `SQLite`-backed implementation of [`StateBackend`].
//!
//! Uses a single `Mutex<Connection>` for thread safety.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{NaiveDateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use tapkit_types::state::{RejectedRecord, RunStats, RunStatus, SyncState, TapId};

use crate::backend::StateBackend;
use crate::error::{self, StateError};

/// `SQLite` datetime format (UTC, no timezone suffix).
const SQLITE_DATETIME_FMT: &str = "%Y-%m-%d %H:%M:%S";

/// Idempotent DDL for state tables.
const CREATE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS tap_state (
    tap TEXT PRIMARY KEY,
    state_json TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS sync_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tap TEXT NOT NULL,
    status TEXT NOT NULL,
    started_at TEXT NOT NULL DEFAULT (datetime('now')),
    finished_at TEXT,
    records_extracted INTEGER DEFAULT 0,
    records_emitted INTEGER DEFAULT 0,
    records_rejected INTEGER DEFAULT 0,
    error_message TEXT
);

CREATE TABLE IF NOT EXISTS rejected_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tap TEXT NOT NULL,
    run_id INTEGER NOT NULL REFERENCES sync_runs(id),
    stream TEXT NOT NULL,
    record_json TEXT NOT NULL,
    error_message TEXT NOT NULL,
    error_category TEXT NOT NULL,
    rejected_at TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_rejected_tap_run ON rejected_records (tap, run_id);
";

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
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(CREATE_TABLES)?;
        // Enforce rejected_records -> sync_runs.
        conn.pragma_update(None, "foreign_keys", true)?;
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
        conn.pragma_update(None, "foreign_keys", true)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock_conn(&self) -> error::Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StateError::LockPoisoned)
    }

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

    /// ISO-8601 timestamp of the last state write for `tap`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] on storage failure.
    pub fn state_updated_at(&self, tap: &TapId) -> error::Result<Option<String>> {
        let conn = self.lock_conn()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT updated_at FROM tap_state WHERE tap = ?1",
                [tap.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(raw.as_deref().map(Self::sqlite_to_iso8601))
    }

    #[cfg(test)]
    fn get_run_row(&self, run_id: i64) -> error::Result<(String, i64, Option<String>, Option<String>)> {
        let conn = self.lock_conn()?;
        Ok(conn.query_row(
            "SELECT status, records_emitted, finished_at, error_message FROM sync_runs WHERE id = ?1",
            [run_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )?)
    }

    #[cfg(test)]
    fn count_rejected_for_run(&self, tap: &TapId, run_id: i64) -> error::Result<i64> {
        let conn = self.lock_conn()?;
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM rejected_records WHERE tap = ?1 AND run_id = ?2",
            rusqlite::params![tap.as_str(), run_id],
            |row| row.get(0),
        )?)
    }
}

impl StateBackend for SqliteStateBackend {
    fn load_state(&self, tap: &TapId) -> error::Result<Option<SyncState>> {
        let conn = self.lock_conn()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT state_json FROM tap_state WHERE tap = ?1",
                [tap.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn save_state(&self, tap: &TapId, state: &SyncState) -> error::Result<()> {
        let json = serde_json::to_string(state)?;
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO tap_state (tap, state_json, updated_at) VALUES (?1, ?2, ?3) \
             ON CONFLICT(tap) DO UPDATE SET state_json = ?2, updated_at = ?3",
            rusqlite::params![tap.as_str(), json, Self::now_sqlite()],
        )?;
        Ok(())
    }

    fn start_run(&self, tap: &TapId) -> error::Result<i64> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO sync_runs (tap, status) VALUES (?1, ?2)",
            rusqlite::params![tap.as_str(), RunStatus::Running.as_str()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    #[allow(clippy::cast_possible_wrap)]
    fn complete_run(&self, run_id: i64, status: RunStatus, stats: &RunStats) -> error::Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "UPDATE sync_runs SET status = ?1, finished_at = datetime('now'), \
             records_extracted = ?2, records_emitted = ?3, records_rejected = ?4, \
             error_message = ?5 WHERE id = ?6",
            rusqlite::params![
                status.as_str(),
                stats.records_extracted as i64,
                stats.records_emitted as i64,
                stats.records_rejected as i64,
                stats.error_message,
                run_id,
            ],
        )?;
        Ok(())
    }

    fn insert_rejected_records(
        &self,
        tap: &TapId,
        run_id: i64,
        records: &[RejectedRecord],
    ) -> error::Result<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        let conn = self.lock_conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(StateError::context("insert_rejected_records: begin tx"))?;
        let mut stmt = tx
            .prepare(
                "INSERT INTO rejected_records \
                 (tap, run_id, stream, record_json, error_message, error_category, rejected_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )
            .map_err(StateError::context("insert_rejected_records: prepare"))?;

        let mut count = 0u64;
        for record in records {
            stmt.execute(rusqlite::params![
                tap.as_str(),
                run_id,
                record.stream,
                record.record_json,
                record.error_message,
                record.error_category.to_string(),
                record.rejected_at,
            ])
            .map_err(StateError::context("insert_rejected_records: execute"))?;
            count += 1;
        }
        drop(stmt);
        tx.commit()
            .map_err(StateError::context("insert_rejected_records: commit"))?;

        Ok(count)
    }
}
