//! Run-history database.
//!
//! A small SQLite wrapper recording one row per pipeline run: input identity
//! (path + SHA-256), outcome, the decode chain that validated, and
//! timestamps. It lives next to the run's artifacts (`runs.db` in the output
//! directory) and is append-only bookkeeping; failure to record a run never
//! fails the run itself.

use std::path::Path;

use rusqlite::{params, Connection};
use thiserror::Error;

/// Minimum schema version we know how to handle.
///
/// `0` means "no schema yet" (fresh DB).
const MIN_SUPPORTED_SCHEMA_VERSION: i32 = 0;

/// Latest schema version this crate knows about.
const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Error type for run database operations.
#[derive(Debug, Error)]
pub enum DbError {
    /// Underlying SQLite error.
    #[error("SQLite error: {0}")]
    Sql(#[from] rusqlite::Error),

    /// The database was created with a newer schema version than we support.
    ///
    /// Explicit so callers can surface a clear message instead of silently
    /// clobbering or misinterpreting data.
    #[error(
        "Unsupported schema version {found}; supported range is {min_supported}..={max_supported}"
    )]
    UnsupportedSchemaVersion { found: i32, min_supported: i32, max_supported: i32 },
}

/// Convenience result type for DB operations.
pub type DbResult<T> = Result<T, DbError>;

/// Record describing one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RunRecord {
    /// Input path as given by the caller.
    pub input_path: String,
    /// SHA-256 of the input text, for identity across moves/renames.
    pub input_hash: String,
    /// `succeeded` or `failed:<stage>`.
    pub status: String,
    /// Label of the decode chain that validated, if resolution got that far.
    pub chain: Option<String>,
    /// Whether the token layer actually decrypted.
    pub decrypted: bool,
    pub started_at: String,
    pub finished_at: String,
}

/// SQLite-backed run history.
///
/// Thin wrapper around `rusqlite::Connection` responsible for opening or
/// creating the DB file, applying schema migrations, and providing small
/// testable helpers for inserting and listing records.
pub struct RunDb {
    conn: Connection,
}

impl RunDb {
    /// Open (or create) a run database at the given path and ensure the
    /// schema exists.
    pub fn open(path: &Path) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        apply_migrations(&conn)?;
        Ok(Self { conn })
    }

    /// Expose a reference to the underlying connection for advanced callers.
    /// For most code, prefer the higher-level helpers.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Insert a run record and return its row id.
    pub fn insert_run(&self, record: &RunRecord) -> DbResult<i64> {
        self.conn.execute(
            r#"
            INSERT INTO runs (input_path, input_hash, status, chain, decrypted, started_at, finished_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                record.input_path,
                record.input_hash,
                record.status,
                record.chain,
                record.decrypted as i32,
                record.started_at,
                record.finished_at
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// List all runs (ordered by id), optionally filtered by input hash.
    pub fn list_runs(&self, input_hash: Option<&str>) -> DbResult<Vec<RunRecord>> {
        fn map_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<RunRecord> {
            let decrypted: i32 = row.get(4)?;
            Ok(RunRecord {
                input_path: row.get(0)?,
                input_hash: row.get(1)?,
                status: row.get(2)?,
                chain: row.get(3)?,
                decrypted: decrypted != 0,
                started_at: row.get(5)?,
                finished_at: row.get(6)?,
            })
        }

        let mut stmt = if input_hash.is_some() {
            self.conn.prepare(
                r#"
                SELECT input_path, input_hash, status, chain, decrypted, started_at, finished_at
                FROM runs
                WHERE input_hash = ?1
                ORDER BY id
                "#,
            )?
        } else {
            self.conn.prepare(
                r#"
                SELECT input_path, input_hash, status, chain, decrypted, started_at, finished_at
                FROM runs
                ORDER BY id
                "#,
            )?
        };

        let rows = if let Some(hash) = input_hash {
            stmt.query_map(params![hash], map_run)?
        } else {
            stmt.query_map([], map_run)?
        };

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

/// Apply schema migrations to bring the database to the latest version.
///
/// We use `PRAGMA user_version` as the schema version indicator.
///
/// Version map:
/// - 0: no schema
/// - 1: initial schema (runs)
fn apply_migrations(conn: &Connection) -> DbResult<()> {
    let current_version = current_schema_version(conn)?;

    // Reject DBs created with a newer schema than we support.
    if current_version > CURRENT_SCHEMA_VERSION {
        return Err(DbError::UnsupportedSchemaVersion {
            found: current_version,
            min_supported: MIN_SUPPORTED_SCHEMA_VERSION,
            max_supported: CURRENT_SCHEMA_VERSION,
        });
    }

    if current_version == 0 {
        conn.execute_batch(
            r#"
            BEGIN;
            CREATE TABLE IF NOT EXISTS runs (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                input_path  TEXT NOT NULL,
                input_hash  TEXT NOT NULL,
                status      TEXT NOT NULL,
                chain       TEXT,
                decrypted   INTEGER NOT NULL,
                started_at  TEXT NOT NULL,
                finished_at TEXT NOT NULL
            );

            PRAGMA user_version = 1;
            COMMIT;
            "#,
        )?;
    }

    Ok(())
}

/// Read the SQLite schema version from `PRAGMA user_version`.
fn current_schema_version(conn: &Connection) -> DbResult<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    Ok(version)
}
