//! Schema migration runner for the state store.
//!
//! Tracks applied migration versions in `qy_state.schema_version`. Unlike
//! opening the store, migrating is an explicit step: a store whose version is
//! 0 is uninitialized.

use crate::ddl::{latest_version, MIGRATIONS};
use crate::error::{StateError, StateResult};
use duckdb::Connection;

/// Ensure the `qy_state` schema and `schema_version` table exist.
fn ensure_version_table(conn: &Connection) -> StateResult<()> {
    conn.execute_batch(
        "CREATE SCHEMA IF NOT EXISTS qy_state;
         CREATE TABLE IF NOT EXISTS qy_state.schema_version (
             version    INTEGER NOT NULL,
             applied_at TIMESTAMP NOT NULL DEFAULT now()
         );",
    )
    .map_err(|e| {
        StateError::MigrationError(format!("failed to create schema_version table: {e}"))
    })?;
    Ok(())
}

/// Return the highest applied migration version, or 0 if none.
pub fn current_version(conn: &Connection) -> StateResult<i32> {
    let exists: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM information_schema.tables
             WHERE table_schema = 'qy_state' AND table_name = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .map_err(|e| StateError::QueryError(format!("failed to read schema_version: {e}")))?;
    if exists == 0 {
        return Ok(0);
    }

    let version: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM qy_state.schema_version",
            [],
            |row| row.get(0),
        )
        .map_err(|e| StateError::MigrationError(format!("failed to read schema version: {e}")))?;
    Ok(version)
}

/// Run all unapplied migrations against `conn`.
pub fn run_migrations(conn: &Connection) -> StateResult<()> {
    ensure_version_table(conn)?;
    let current = current_version(conn)?;
    if current > latest_version() {
        return Err(StateError::VersionMismatch {
            found: current,
            supported: latest_version(),
        });
    }

    for migration in MIGRATIONS {
        if migration.version <= current {
            continue;
        }
        log::debug!("Applying state migration v{:03}", migration.version);

        conn.execute_batch(migration.sql).map_err(|e| {
            StateError::MigrationError(format!("migration v{:03} failed: {e}", migration.version))
        })?;

        conn.execute(
            "INSERT INTO qy_state.schema_version (version) VALUES (?)",
            duckdb::params![migration.version],
        )
        .map_err(|e| {
            StateError::MigrationError(format!(
                "failed to record migration v{:03}: {e}",
                migration.version
            ))
        })?;
    }
    Ok(())
}
