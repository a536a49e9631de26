//! DuckDB-backed state store.
//!
//! [`DuckDbStateStore`] owns one DuckDB [`Connection`] behind a mutex, so
//! every write is serialized and each multi-statement update runs inside a
//! single transaction.

use crate::ddl::latest_version;
use crate::error::{StateError, StateResult};
use crate::migration::{current_version, run_migrations};
use crate::traits::{ExpiredSnapshot, PromotionResult, StateReader, StateSync};
use duckdb::Connection;
use qy_core::interval::{self, Interval};
use qy_core::time::now_ms;
use qy_core::{Environment, Snapshot, SnapshotId, SnapshotTableInfo, Timestamp};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Wrapper around a DuckDB connection to the state database.
pub struct DuckDbStateStore {
    conn: Mutex<Connection>,
}

/// Rows of the intervals table that describe one coverage set.
#[derive(Debug, Clone, Copy)]
enum IntervalGroup<'a> {
    /// Shared coverage of the physical table `(name, version)`
    Table { name: &'a str, version: &'a str },
    /// Coverage of one snapshot's development clone
    Dev { name: &'a str, identifier: &'a str },
}

impl DuckDbStateStore {
    /// Open (or create) the state database at `path`.
    ///
    /// The schema is not migrated; see [`StateSync::migrate`].
    pub fn open(path: &Path) -> StateResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StateError::ConnectionError(format!("{e}: {}", parent.display()))
            })?;
        }
        let conn = Connection::open(path)
            .map_err(|e| StateError::ConnectionError(format!("{e}: {}", path.display())))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory state database.
    pub fn open_memory() -> StateResult<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| StateError::ConnectionError(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Execute `body` within a `BEGIN` / `COMMIT` transaction, rolling back on
    /// error.
    fn transaction<F, T>(&self, body: F) -> StateResult<T>
    where
        F: FnOnce(&Connection) -> StateResult<T>,
    {
        let guard = self.lock();
        let conn: &Connection = &guard;
        conn.execute_batch("BEGIN TRANSACTION")
            .map_err(|e| StateError::TransactionError(format!("BEGIN failed: {e}")))?;

        let result = body(conn);

        match &result {
            Ok(_) => {
                if let Err(commit_err) = conn.execute_batch("COMMIT") {
                    let _ = conn.execute_batch("ROLLBACK");
                    return Err(StateError::TransactionError(format!(
                        "COMMIT failed: {commit_err}"
                    )));
                }
            }
            Err(_) => {
                let _ = conn.execute_batch("ROLLBACK");
            }
        }
        result
    }
}

// ── Environment rows ───────────────────────────────────────────────────

fn read_environment(conn: &Connection, name: &str) -> StateResult<Option<Environment>> {
    let payload = conn.query_row(
        "SELECT payload FROM qy_state.environments WHERE name = ?",
        duckdb::params![name],
        |row| row.get::<_, String>(0),
    );
    match payload {
        Ok(p) => Ok(Some(serde_json::from_str(&p)?)),
        Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(StateError::QueryError(format!("read environment '{name}': {e}"))),
    }
}

fn read_environments(conn: &Connection, expired_at: Option<Timestamp>) -> StateResult<Vec<Environment>> {
    let payloads: Vec<String> = match expired_at {
        Some(now) => {
            let mut stmt = conn.prepare(
                "SELECT payload FROM qy_state.environments
                 WHERE expiration_ts IS NOT NULL AND expiration_ts <= ?
                 ORDER BY name",
            )?;
            let rows = stmt.query_map(duckdb::params![now], |row| row.get(0))?;
            rows.collect::<Result<_, _>>()?
        }
        None => {
            let mut stmt =
                conn.prepare("SELECT payload FROM qy_state.environments ORDER BY name")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect::<Result<_, _>>()?
        }
    };
    payloads
        .iter()
        .map(|p| serde_json::from_str(p).map_err(StateError::from))
        .collect()
}

fn write_environment(conn: &Connection, environment: &Environment) -> StateResult<()> {
    conn.execute(
        "DELETE FROM qy_state.environments WHERE name = ?",
        duckdb::params![environment.name],
    )?;
    conn.execute(
        "INSERT INTO qy_state.environments (name, plan_id, expiration_ts, payload)
         VALUES (?, ?, ?, ?)",
        duckdb::params![
            environment.name,
            environment.plan_id,
            environment.expiration_ts,
            serde_json::to_string(environment)?
        ],
    )?;
    Ok(())
}

// ── Snapshot rows ──────────────────────────────────────────────────────

fn read_snapshot(conn: &Connection, id: &SnapshotId) -> StateResult<Option<Snapshot>> {
    let row = conn.query_row(
        "SELECT payload, updated_ts FROM qy_state.snapshots WHERE name = ? AND identifier = ?",
        duckdb::params![id.name.as_str(), id.identifier],
        |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
    );
    match row {
        Ok((payload, updated_ts)) => Ok(Some(hydrate(conn, &payload, updated_ts)?)),
        Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(StateError::QueryError(format!("read snapshot {id}: {e}"))),
    }
}

/// Deserialize a payload and attach its interval history.
fn hydrate(conn: &Connection, payload: &str, updated_ts: Timestamp) -> StateResult<Snapshot> {
    let mut snapshot: Snapshot = serde_json::from_str(payload)?;
    snapshot.updated_ts = updated_ts;
    snapshot.intervals = match snapshot.version.as_deref() {
        Some(version) => read_group(
            conn,
            IntervalGroup::Table {
                name: &snapshot.name,
                version,
            },
        )?,
        None => Vec::new(),
    };
    snapshot.dev_intervals = read_group(
        conn,
        IntervalGroup::Dev {
            name: &snapshot.name,
            identifier: &snapshot.identifier(),
        },
    )?;
    Ok(snapshot)
}

fn stored_version(conn: &Connection, id: &SnapshotId) -> StateResult<Option<Option<String>>> {
    let row = conn.query_row(
        "SELECT version FROM qy_state.snapshots WHERE name = ? AND identifier = ?",
        duckdb::params![id.name.as_str(), id.identifier],
        |row| row.get::<_, Option<String>>(0),
    );
    match row {
        Ok(version) => Ok(Some(version)),
        Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(StateError::QueryError(format!("read snapshot {id}: {e}"))),
    }
}

// ── Interval rows ──────────────────────────────────────────────────────

fn read_group(conn: &Connection, group: IntervalGroup<'_>) -> StateResult<Vec<Interval>> {
    let (sql, a, b) = match group {
        IntervalGroup::Table { name, version } => (
            "SELECT start_ts, end_ts FROM qy_state.intervals
             WHERE name = ? AND version = ? AND NOT is_dev",
            name,
            version,
        ),
        IntervalGroup::Dev { name, identifier } => (
            "SELECT start_ts, end_ts FROM qy_state.intervals
             WHERE name = ? AND identifier = ? AND is_dev",
            name,
            identifier,
        ),
    };
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(duckdb::params![a, b], |row| {
        Ok(Interval {
            start: row.get(0)?,
            end: row.get(1)?,
        })
    })?;
    let intervals: Vec<Interval> = rows.collect::<Result<_, _>>()?;
    Ok(interval::merge_intervals(intervals))
}

fn replace_group(
    conn: &Connection,
    group: IntervalGroup<'_>,
    identifier: &str,
    version: &str,
    intervals: &[Interval],
) -> StateResult<()> {
    let (name, is_dev) = match group {
        IntervalGroup::Table { name, version } => {
            conn.execute(
                "DELETE FROM qy_state.intervals WHERE name = ? AND version = ? AND NOT is_dev",
                duckdb::params![name, version],
            )?;
            (name, false)
        }
        IntervalGroup::Dev { name, identifier } => {
            conn.execute(
                "DELETE FROM qy_state.intervals WHERE name = ? AND identifier = ? AND is_dev",
                duckdb::params![name, identifier],
            )?;
            (name, true)
        }
    };
    for i in intervals {
        conn.execute(
            "INSERT INTO qy_state.intervals (name, identifier, version, start_ts, end_ts, is_dev)
             VALUES (?, ?, ?, ?, ?, ?)",
            duckdb::params![name, identifier, version, i.start, i.end, is_dev],
        )?;
    }
    Ok(())
}

fn update_group<F>(
    conn: &Connection,
    group: IntervalGroup<'_>,
    identifier: &str,
    version: &str,
    update: F,
) -> StateResult<()>
where
    F: FnOnce(&mut Vec<Interval>),
{
    let mut intervals = read_group(conn, group)?;
    update(&mut intervals);
    replace_group(conn, group, identifier, version, &intervals)
}

fn table_versions(conn: &Connection, name: &str) -> StateResult<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT version FROM qy_state.intervals WHERE name = ? AND NOT is_dev",
    )?;
    let rows = stmt.query_map(duckdb::params![name], |row| row.get(0))?;
    Ok(rows.collect::<Result<_, _>>()?)
}

fn dev_identifiers(conn: &Connection, name: &str) -> StateResult<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT identifier FROM qy_state.intervals WHERE name = ? AND is_dev",
    )?;
    let rows = stmt.query_map(duckdb::params![name], |row| row.get(0))?;
    Ok(rows.collect::<Result<_, _>>()?)
}

fn unversioned(id: &SnapshotId) -> StateError {
    StateError::Unversioned { id: id.to_string() }
}

impl StateReader for DuckDbStateStore {
    fn get_environment(&self, name: &str) -> StateResult<Option<Environment>> {
        read_environment(&self.lock(), name)
    }

    fn get_environments(&self) -> StateResult<Vec<Environment>> {
        read_environments(&self.lock(), None)
    }

    fn get_snapshots(&self, ids: &[SnapshotId]) -> StateResult<BTreeMap<SnapshotId, Snapshot>> {
        let conn = self.lock();
        let mut found = BTreeMap::new();
        for id in ids {
            if let Some(snapshot) = read_snapshot(&conn, id)? {
                found.insert(id.clone(), snapshot);
            }
        }
        Ok(found)
    }

    fn get_snapshots_by_version(&self, name: &str, version: &str) -> StateResult<Vec<Snapshot>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT payload, updated_ts FROM qy_state.snapshots
             WHERE name = ? AND version = ? ORDER BY identifier",
        )?;
        let rows = stmt.query_map(duckdb::params![name, version], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        let rows: Vec<(String, i64)> = rows.collect::<Result<_, _>>()?;
        rows.iter()
            .map(|(payload, updated_ts)| hydrate(&conn, payload, *updated_ts))
            .collect()
    }

    fn snapshots_exist(&self, ids: &[SnapshotId]) -> StateResult<BTreeSet<SnapshotId>> {
        let conn = self.lock();
        let mut existing = BTreeSet::new();
        for id in ids {
            if stored_version(&conn, id)?.is_some() {
                existing.insert(id.clone());
            }
        }
        Ok(existing)
    }

    fn get_versions(&self, validate: bool) -> StateResult<i32> {
        let version = current_version(&self.lock())?;
        if validate {
            if version == 0 {
                return Err(StateError::NotInitialized);
            }
            if version > latest_version() {
                return Err(StateError::VersionMismatch {
                    found: version,
                    supported: latest_version(),
                });
            }
        }
        Ok(version)
    }
}

impl StateSync for DuckDbStateStore {
    fn push_snapshots(&self, snapshots: &[Snapshot]) -> StateResult<()> {
        self.transaction(|conn| {
            for snapshot in snapshots {
                let id = snapshot.snapshot_id();
                if stored_version(conn, &id)?.is_some() {
                    return Err(StateError::SnapshotExists { id: id.to_string() });
                }

                let mut record = snapshot.clone();
                let intervals = std::mem::take(&mut record.intervals);
                let dev_intervals = std::mem::take(&mut record.dev_intervals);
                conn.execute(
                    "INSERT INTO qy_state.snapshots (name, identifier, version, updated_ts, ttl_ms, payload)
                     VALUES (?, ?, ?, ?, ?, ?)",
                    duckdb::params![
                        id.name.as_str(),
                        id.identifier,
                        record.version,
                        record.updated_ts,
                        record.ttl_ms,
                        serde_json::to_string(&record)?
                    ],
                )?;

                if let Some(version) = snapshot.version.as_deref() {
                    if !intervals.is_empty() {
                        let group = IntervalGroup::Table {
                            name: &snapshot.name,
                            version,
                        };
                        update_group(conn, group, &id.identifier, version, |existing| {
                            for i in intervals {
                                interval::add_interval(existing, i);
                            }
                        })?;
                    }
                    if !dev_intervals.is_empty() {
                        let group = IntervalGroup::Dev {
                            name: &snapshot.name,
                            identifier: &id.identifier,
                        };
                        replace_group(
                            conn,
                            group,
                            &id.identifier,
                            version,
                            &interval::merge_intervals(dev_intervals),
                        )?;
                    }
                }
                log::debug!("Pushed snapshot {}", id);
            }
            Ok(())
        })
    }

    fn promote(&self, environment: &Environment) -> StateResult<PromotionResult> {
        self.transaction(|conn| {
            let previous = read_environment(conn, &environment.name)?;
            if let Some(previous) = &previous {
                let expected = environment.previous_plan_id.as_deref();
                if previous.plan_id != environment.plan_id
                    && Some(previous.plan_id.as_str()) != expected
                {
                    return Err(StateError::PlanConflict {
                        environment: environment.name.clone(),
                        expected: environment.previous_plan_id.clone(),
                        found: previous.plan_id.clone(),
                    });
                }
            }

            let now = now_ms();
            for member in &environment.snapshots {
                let id = member.snapshot_id();
                match stored_version(conn, &id)? {
                    None => return Err(StateError::SnapshotNotFound { id: id.to_string() }),
                    Some(None) => return Err(unversioned(&id)),
                    Some(Some(_)) => {}
                }
                conn.execute(
                    "UPDATE qy_state.snapshots SET updated_ts = ? WHERE name = ? AND identifier = ?",
                    duckdb::params![now, id.name.as_str(), id.identifier],
                )?;
            }
            write_environment(conn, environment)?;

            let previous_members = previous.map(|p| p.snapshots).unwrap_or_default();
            let previous_ids: HashSet<SnapshotId> =
                previous_members.iter().map(|s| s.snapshot_id()).collect();
            let current_names: HashSet<&str> =
                environment.snapshots.iter().map(|s| s.name.as_str()).collect();

            let result = PromotionResult {
                added: environment
                    .snapshots
                    .iter()
                    .filter(|s| !previous_ids.contains(&s.snapshot_id()))
                    .cloned()
                    .collect(),
                removed: previous_members
                    .into_iter()
                    .filter(|s| !current_names.contains(s.name.as_str()))
                    .collect(),
            };
            log::info!(
                "Promoted environment '{}' ({} added, {} removed)",
                environment.name,
                result.added.len(),
                result.removed.len()
            );
            Ok(result)
        })
    }

    fn finalize(&self, environment: &Environment) -> StateResult<()> {
        self.transaction(|conn| {
            let mut stored = read_environment(conn, &environment.name)?.ok_or_else(|| {
                StateError::QueryError(format!(
                    "cannot finalize unknown environment '{}'",
                    environment.name
                ))
            })?;
            if stored.plan_id != environment.plan_id {
                return Err(StateError::PlanConflict {
                    environment: environment.name.clone(),
                    expected: Some(environment.plan_id.clone()),
                    found: stored.plan_id,
                });
            }
            stored.finalized_ts = Some(now_ms());
            write_environment(conn, &stored)
        })
    }

    fn invalidate_environment(&self, name: &str) -> StateResult<()> {
        self.transaction(|conn| {
            if let Some(mut environment) = read_environment(conn, name)? {
                environment.expiration_ts = Some(now_ms());
                write_environment(conn, &environment)?;
            }
            Ok(())
        })
    }

    fn delete_environment(&self, name: &str) -> StateResult<bool> {
        let deleted = self.lock().execute(
            "DELETE FROM qy_state.environments WHERE name = ?",
            duckdb::params![name],
        )?;
        Ok(deleted > 0)
    }

    fn get_expired_environments(&self, now: Timestamp) -> StateResult<Vec<Environment>> {
        read_environments(&self.lock(), Some(now))
    }

    fn get_expired_snapshots(&self, now: Timestamp) -> StateResult<Vec<ExpiredSnapshot>> {
        let conn = self.lock();
        let referenced: HashSet<SnapshotId> = read_environments(&conn, None)?
            .iter()
            .flat_map(|e| e.snapshot_ids())
            .collect();

        let mut stmt = conn.prepare(
            "SELECT name, identifier, version, updated_ts + ttl_ms <= ?, payload
             FROM qy_state.snapshots ORDER BY name, identifier",
        )?;
        let rows = stmt.query_map(duckdb::params![now], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, bool>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;
        let rows: Vec<_> = rows.collect::<Result<_, _>>()?;

        let mut expired = Vec::new();
        let mut surviving_tables: HashSet<(String, String)> = HashSet::new();
        for (name, identifier, version, is_expired, payload) in rows {
            let id = SnapshotId::new(name.as_str(), identifier.as_str());
            if is_expired && !referenced.contains(&id) {
                let snapshot: Snapshot = serde_json::from_str(&payload)?;
                expired.push(snapshot.table_info());
            } else if let Some(version) = version {
                surviving_tables.insert((name, version));
            }
        }

        Ok(expired
            .into_iter()
            .map(|table_info| {
                let key = (table_info.name.to_string(), table_info.version.clone());
                let drop_table = !surviving_tables.contains(&key);
                ExpiredSnapshot {
                    table_info,
                    drop_table,
                }
            })
            .collect())
    }

    fn delete_snapshots(&self, ids: &[SnapshotId]) -> StateResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.transaction(|conn| {
            for id in ids {
                conn.execute(
                    "DELETE FROM qy_state.snapshots WHERE name = ? AND identifier = ?",
                    duckdb::params![id.name.as_str(), id.identifier],
                )?;
            }
            conn.execute_batch(
                "DELETE FROM qy_state.intervals
                 WHERE NOT is_dev AND name || '@' || version NOT IN (
                     SELECT name || '@' || version FROM qy_state.snapshots WHERE version IS NOT NULL
                 );
                 DELETE FROM qy_state.intervals
                 WHERE is_dev AND name || '@' || identifier NOT IN (
                     SELECT name || '@' || identifier FROM qy_state.snapshots
                 );",
            )?;
            log::debug!("Deleted {} snapshots", ids.len());
            Ok(())
        })
    }

    fn add_interval(&self, snapshot: &Snapshot, interval: Interval, is_dev: bool) -> StateResult<()> {
        let id = snapshot.snapshot_id();
        let version = snapshot.version.as_deref().ok_or_else(|| unversioned(&id))?;
        let group = if is_dev && snapshot.is_forward_only() {
            IntervalGroup::Dev {
                name: &snapshot.name,
                identifier: &id.identifier,
            }
        } else {
            IntervalGroup::Table {
                name: &snapshot.name,
                version,
            }
        };
        self.transaction(|conn| {
            update_group(conn, group, &id.identifier, version, |existing| {
                interval::add_interval(existing, interval)
            })
        })
    }

    fn remove_interval(
        &self,
        snapshots: &[SnapshotTableInfo],
        interval: Interval,
        all_versions: bool,
    ) -> StateResult<()> {
        self.transaction(|conn| {
            for info in snapshots {
                let versions = if all_versions {
                    table_versions(conn, &info.name)?
                } else {
                    vec![info.version.clone()]
                };
                for version in &versions {
                    let group = IntervalGroup::Table {
                        name: &info.name,
                        version,
                    };
                    update_group(conn, group, &info.identifier, version, |existing| {
                        interval::remove_interval(existing, interval)
                    })?;
                }

                let identifiers = if all_versions {
                    dev_identifiers(conn, &info.name)?
                } else {
                    vec![info.identifier.clone()]
                };
                for identifier in &identifiers {
                    let group = IntervalGroup::Dev {
                        name: &info.name,
                        identifier,
                    };
                    update_group(conn, group, identifier, &info.version, |existing| {
                        interval::remove_interval(existing, interval)
                    })?;
                }
            }
            Ok(())
        })
    }

    fn migrate(&self) -> StateResult<()> {
        log::info!("Migrating state store");
        run_migrations(&self.lock())
    }
}

#[cfg(test)]
#[path = "store_test.rs"]
mod tests;
