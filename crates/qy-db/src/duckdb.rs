//! DuckDB snapshot evaluator

use crate::audit;
use crate::error::{DbError, DbResult};
use crate::render::{render_query, RenderContext};
use crate::sql_utils::{escape_sql_string, quote_ident, quote_qualified, timestamp_literal};
use crate::traits::{AuditResult, QueryResult, SnapshotEvaluator, SnapshotsByName};
use async_trait::async_trait;
use duckdb::Connection;
use qy_core::model::{AuditKind, EvaluationStrategy, ModelKind};
use qy_core::snapshot::{environment_schema, view_name};
use qy_core::time::DAY_MS;
use qy_core::{Interval, Snapshot, SnapshotTableInfo, Timestamp};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// DuckDB database backend
pub struct DuckDbBackend {
    conn: Mutex<Connection>,
}

impl DuckDbBackend {
    /// Create a new in-memory DuckDB connection
    pub fn in_memory() -> DbResult<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| DbError::ConnectionError(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create a new DuckDB connection from a file path
    pub fn from_path(path: &Path) -> DbResult<Self> {
        let conn = Connection::open(path)
            .map_err(|e| DbError::ConnectionError(format!("{e}: {}", path.display())))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create from path string (handles :memory: special case)
    pub fn new(path: &str) -> DbResult<Self> {
        if path == ":memory:" {
            Self::in_memory()
        } else {
            Self::from_path(Path::new(path))
        }
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Execute SQL synchronously
    fn execute_sync(&self, sql: &str) -> DbResult<usize> {
        log::debug!("{}", sql);
        self.lock()
            .execute(sql, [])
            .map_err(|e| DbError::ExecutionError(format!("{}: {}", e, sql)))
    }

    /// Execute statements atomically, rolling back on the first failure
    fn with_transaction(&self, statements: &[String]) -> DbResult<()> {
        let conn = self.lock();
        conn.execute_batch("BEGIN TRANSACTION")?;
        for sql in statements {
            log::debug!("{}", sql);
            if let Err(e) = conn.execute(sql, []) {
                let _ = conn.execute_batch("ROLLBACK");
                return Err(DbError::ExecutionError(format!("{}: {}", e, sql)));
            }
        }
        if let Err(e) = conn.execute_batch("COMMIT") {
            let _ = conn.execute_batch("ROLLBACK");
            return Err(DbError::ExecutionError(format!("COMMIT failed: {e}")));
        }
        Ok(())
    }

    /// Query count synchronously
    fn query_count_sync(&self, sql: &str) -> DbResult<usize> {
        let count: i64 = self
            .lock()
            .query_row(&format!("SELECT COUNT(*) FROM ({}) AS q", sql), [], |row| {
                row.get(0)
            })
            .map_err(|e| DbError::ExecutionError(format!("{}: {}", e, sql)))?;
        Ok(count.max(0) as usize)
    }

    /// Check if relation exists synchronously
    fn relation_exists_sync(&self, name: &str) -> DbResult<bool> {
        let (schema, table) = crate::sql_utils::split_qualified_name(name);
        let count: i64 = self.lock().query_row(
            "SELECT COUNT(*) FROM information_schema.tables WHERE table_schema = ? AND table_name = ?",
            duckdb::params![schema, table],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Run a query and collect every value as a string.
    fn query_rows_sync(&self, sql: &str) -> DbResult<QueryResult> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| DbError::ExecutionError(format!("{}: {}", e, sql)))?;
        // Column metadata is only available once the statement has run.
        let rows: Vec<Vec<String>> = stmt
            .query_map([], |row| {
                let col_count = row.as_ref().column_count();
                Ok((0..col_count).map(|i| value_as_string(row, i)).collect())
            })?
            .collect::<Result<Vec<_>, _>>()?;
        let columns = (0..stmt.column_count())
            .map(|i| stmt.column_name(i).map_or("?".to_string(), |v| v.to_string()))
            .collect();
        Ok(QueryResult { columns, rows })
    }

    /// Execute multiple SQL statements
    pub async fn execute_batch(&self, sql: &str) -> DbResult<()> {
        self.lock()
            .execute_batch(sql)
            .map_err(|e| DbError::ExecutionError(e.to_string()))
    }

    /// Count the rows a query returns
    pub async fn query_count(&self, sql: &str) -> DbResult<usize> {
        self.query_count_sync(sql)
    }

    /// Check if a table or view exists
    pub async fn relation_exists(&self, name: &str) -> DbResult<bool> {
        self.relation_exists_sync(name)
    }

    /// Run a query and return its rows as strings
    pub async fn query_rows(&self, sql: &str) -> DbResult<QueryResult> {
        self.query_rows_sync(sql)
    }

    fn create_schema_sync(&self, schema: &str) -> DbResult<()> {
        self.execute_sync(&format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(schema)))?;
        Ok(())
    }

    /// The query producing `snapshot`'s rows for `interval`.
    fn source_query(
        &self,
        snapshot: &Snapshot,
        interval: Interval,
        latest: Timestamp,
        snapshots: &SnapshotsByName,
        is_dev: bool,
    ) -> DbResult<String> {
        if let ModelKind::Seed { path } = &snapshot.model.kind {
            return Ok(format!(
                "SELECT * FROM read_csv_auto('{}')",
                escape_sql_string(&path.display().to_string())
            ));
        }
        let ctx = RenderContext::new(interval.start, interval.end, latest)
            .with_tables(resolve_tables(snapshots, is_dev))
            .with_this(quote_qualified(&snapshot.table_name(is_dev)));
        render_query(&snapshot.name, &snapshot.model.query, &ctx)
    }
}

/// Map each visible model to the quoted physical table it reads from.
fn resolve_tables(snapshots: &SnapshotsByName, is_dev: bool) -> BTreeMap<String, String> {
    snapshots
        .iter()
        .map(|(name, s)| (name.to_string(), quote_qualified(&s.table_name(is_dev))))
        .collect()
}

fn value_as_string(row: &duckdb::Row<'_>, idx: usize) -> String {
    if let Ok(Some(s)) = row.get::<_, Option<String>>(idx) {
        return s;
    }
    if let Ok(Some(n)) = row.get::<_, Option<i64>>(idx) {
        return n.to_string();
    }
    if let Ok(Some(f)) = row.get::<_, Option<f64>>(idx) {
        return f.to_string();
    }
    if let Ok(Some(b)) = row.get::<_, Option<bool>>(idx) {
        return b.to_string();
    }
    "null".to_string()
}

/// `WHERE`-clause restricting `column` to `interval`.
fn time_filter(column: &str, interval: Interval) -> String {
    let qc = quote_ident(column);
    format!(
        "{qc} >= {} AND {qc} < {}",
        timestamp_literal(interval.start),
        timestamp_literal(interval.end)
    )
}

#[async_trait]
impl SnapshotEvaluator for DuckDbBackend {
    async fn create(
        &self,
        snapshot: &Snapshot,
        snapshots: &SnapshotsByName,
        is_dev: bool,
    ) -> DbResult<()> {
        let target = snapshot.table_name(is_dev);
        if self.relation_exists_sync(&target)? {
            return Ok(());
        }
        self.create_schema_sync(&snapshot.physical_schema)?;
        let qt = quote_qualified(&target);
        let placeholder = Interval {
            start: 0,
            end: DAY_MS,
        };

        match snapshot.model.kind.evaluation_strategy() {
            EvaluationStrategy::CreateView => {
                let query = self.source_query(snapshot, placeholder, DAY_MS, snapshots, is_dev)?;
                self.execute_sync(&format!("CREATE OR REPLACE VIEW {qt} AS {query}"))?;
            }
            _ if is_dev
                && snapshot.is_forward_only()
                && self.relation_exists_sync(&snapshot.table_name(false))? =>
            {
                let source = quote_qualified(&snapshot.table_name(false));
                self.execute_sync(&format!("CREATE TABLE {qt} AS SELECT * FROM {source}"))?;
            }
            _ if !snapshot.model.columns.is_empty() => {
                let columns = snapshot
                    .model
                    .columns
                    .iter()
                    .map(|c| format!("{} {}", quote_ident(&c.name), c.data_type))
                    .collect::<Vec<_>>()
                    .join(", ");
                self.execute_sync(&format!("CREATE TABLE {qt} ({columns})"))?;
            }
            strategy => {
                let query = self.source_query(snapshot, placeholder, DAY_MS, snapshots, is_dev)?;
                self.execute_sync(&format!(
                    "CREATE TABLE {qt} AS SELECT * FROM ({query}) AS q LIMIT 0"
                ))
                .map_err(|e| match (strategy, e) {
                    (EvaluationStrategy::LoadSeed, DbError::ExecutionError(msg)) => {
                        DbError::SeedError(msg)
                    }
                    (_, e) => e,
                })?;
            }
        }
        log::debug!("Created {} for {}", target, snapshot.name);
        Ok(())
    }

    async fn evaluate(
        &self,
        snapshot: &Snapshot,
        interval: Interval,
        latest: Timestamp,
        snapshots: &SnapshotsByName,
        is_dev: bool,
        limit: Option<usize>,
    ) -> DbResult<Option<QueryResult>> {
        let query = self.source_query(snapshot, interval, latest, snapshots, is_dev)?;
        if let Some(limit) = limit {
            let result = self.query_rows_sync(&format!("SELECT * FROM ({query}) AS q LIMIT {limit}"))?;
            return Ok(Some(result));
        }

        self.create(snapshot, snapshots, is_dev).await?;
        let qt = quote_qualified(&snapshot.table_name(is_dev));
        match snapshot.model.kind.evaluation_strategy() {
            EvaluationStrategy::InsertOverwriteByTimeRange => {
                let column = snapshot.model.kind.time_column().unwrap_or_default();
                let filter = time_filter(column, interval);
                self.with_transaction(&[
                    format!("DELETE FROM {qt} WHERE {filter}"),
                    format!("INSERT INTO {qt} SELECT * FROM ({query}) AS q WHERE {filter}"),
                ])?;
            }
            EvaluationStrategy::ReplaceTable => {
                self.execute_sync(&format!("CREATE OR REPLACE TABLE {qt} AS {query}"))?;
            }
            EvaluationStrategy::LoadSeed => {
                self.execute_sync(&format!("CREATE OR REPLACE TABLE {qt} AS {query}"))
                    .map_err(|e| DbError::SeedError(e.to_string()))?;
            }
            EvaluationStrategy::CreateView => {
                self.execute_sync(&format!("CREATE OR REPLACE VIEW {qt} AS {query}"))?;
            }
        }
        log::debug!("Evaluated {} for {}", snapshot.name, interval);
        Ok(None)
    }

    async fn audit(
        &self,
        snapshot: &Snapshot,
        interval: Interval,
        latest: Timestamp,
        snapshots: &SnapshotsByName,
        is_dev: bool,
    ) -> DbResult<Vec<AuditResult>> {
        let qt = quote_qualified(&snapshot.table_name(is_dev));
        let relation = match snapshot.model.kind.time_column() {
            Some(column) => format!("(SELECT * FROM {qt} WHERE {})", time_filter(column, interval)),
            None => qt,
        };

        let mut results = Vec::with_capacity(snapshot.model.audits.len());
        for check in &snapshot.model.audits {
            let query = match &check.kind {
                AuditKind::Custom { query } => {
                    let ctx = RenderContext::new(interval.start, interval.end, latest)
                        .with_tables(resolve_tables(snapshots, is_dev))
                        .with_this(relation.clone());
                    render_query(&snapshot.name, query, &ctx)?
                }
                builtin => audit::generate(builtin, &relation).unwrap_or_default(),
            };
            let count = if check.skip {
                0
            } else {
                self.query_count_sync(&query)?
            };
            results.push(AuditResult {
                audit_name: check.name.clone(),
                skipped: check.skip,
                count,
                query,
                blocking: check.blocking,
            });
        }
        Ok(results)
    }

    async fn promote(
        &self,
        snapshots: &[SnapshotTableInfo],
        environment: &str,
        is_dev: bool,
    ) -> DbResult<()> {
        for info in snapshots {
            self.create_schema_sync(&environment_schema(info.name.schema(), environment))?;
            let view = quote_qualified(&view_name(&info.name, environment));
            let table = quote_qualified(&info.table_name(is_dev));
            self.execute_sync(&format!("CREATE OR REPLACE VIEW {view} AS SELECT * FROM {table}"))?;
        }
        Ok(())
    }

    async fn demote(&self, snapshots: &[SnapshotTableInfo], environment: &str) -> DbResult<()> {
        for info in snapshots {
            let view = quote_qualified(&view_name(&info.name, environment));
            self.execute_sync(&format!("DROP VIEW IF EXISTS {view}"))?;
        }
        Ok(())
    }

    async fn cleanup(&self, snapshots: &[SnapshotTableInfo]) -> DbResult<()> {
        for info in snapshots {
            let kind = if info.materialized { "TABLE" } else { "VIEW" };
            let mut targets = vec![info.table_name(false)];
            if info.forward_only {
                targets.push(info.table_name(true));
            }
            for target in targets {
                self.execute_sync(&format!("DROP {kind} IF EXISTS {}", quote_qualified(&target)))?;
            }
        }
        Ok(())
    }

    fn db_type(&self) -> &'static str {
        "duckdb"
    }
}

#[cfg(test)]
#[path = "duckdb_test.rs"]
mod tests;
