//! Database migrations

use crate::error::Result;
use rusqlite::{Connection, OptionalExtension};

/// Current schema version
const CURRENT_VERSION: i32 = 3;

/// Run all pending migrations
pub fn run(conn: &mut Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        apply(conn, 1, MIGRATION_V1)?;
    }
    if version < 2 {
        apply(conn, 2, MIGRATION_V2)?;
    }
    if version < 3 {
        apply(conn, 3, MIGRATION_V3)?;
    }

    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version = conn
        .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
            row.get::<_, Option<i32>>(0)
        })
        .optional()?
        .flatten()
        .unwrap_or(0);

    Ok(version)
}

/// Version 1: the append-only change log
const MIGRATION_V1: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER PRIMARY KEY
    )",
    // AUTOINCREMENT keeps ids monotonic even after synced rows are purged
    "CREATE TABLE IF NOT EXISTS change_log (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        client_id TEXT NOT NULL UNIQUE,
        change_type TEXT NOT NULL CHECK (change_type IN ('CREATE', 'UPDATE', 'DELETE')),
        model_name TEXT NOT NULL,
        object_id TEXT,
        change_data TEXT NOT NULL,
        version_at_change INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        synced INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE INDEX IF NOT EXISTS idx_change_log_pending ON change_log(synced, id)",
    "CREATE INDEX IF NOT EXISTS idx_change_log_object ON change_log(model_name, object_id)",
];

/// Version 2: per-record attempt bookkeeping and dead-lettering
const MIGRATION_V2: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS change_attempts (
        change_id INTEGER PRIMARY KEY REFERENCES change_log(id) ON DELETE CASCADE,
        attempts INTEGER NOT NULL DEFAULT 0,
        last_error TEXT,
        last_attempt_at INTEGER NOT NULL,
        dead_lettered INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE INDEX IF NOT EXISTS idx_change_attempts_dead ON change_attempts(dead_lettered)",
];

/// Version 3: ordering holds that must outlive the process
const MIGRATION_V3: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS change_conflicts (
        change_id INTEGER PRIMARY KEY REFERENCES change_log(id) ON DELETE CASCADE,
        detected_at INTEGER NOT NULL
    )",
    // Set on records queued by a USE_MINE resolution
    "ALTER TABLE change_log ADD COLUMN supersedes INTEGER",
];

fn apply(conn: &mut Connection, version: i32, statements: &[&str]) -> Result<()> {
    let tx = conn.transaction()?;
    for stmt in statements {
        tx.execute(stmt, [])?;
    }
    tx.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    tx.commit()?;

    tracing::info!("Migrated change log schema to version {version} (latest {CURRENT_VERSION})");
    Ok(())
}
