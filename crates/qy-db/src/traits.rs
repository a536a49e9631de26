//! Snapshot evaluator trait definition

use crate::error::DbResult;
use async_trait::async_trait;
use qy_core::{Interval, ModelName, Snapshot, SnapshotTableInfo, Timestamp};
use std::collections::BTreeMap;

/// Snapshots visible to a query, keyed by model name.
pub type SnapshotsByName = BTreeMap<ModelName, Snapshot>;

/// Outcome of one audit of one snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditResult {
    pub audit_name: String,
    pub skipped: bool,
    /// Offending rows found
    pub count: usize,
    pub query: String,
    pub blocking: bool,
}

impl AuditResult {
    pub fn passed(&self) -> bool {
        self.skipped || self.count == 0
    }
}

/// Rows returned by an ad-hoc evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Physical operations the engine performs on snapshots.
///
/// Implementations must be Send + Sync for async operation.
#[async_trait]
pub trait SnapshotEvaluator: Send + Sync {
    /// Create the physical object backing `snapshot`, if it does not exist.
    async fn create(
        &self,
        snapshot: &Snapshot,
        snapshots: &SnapshotsByName,
        is_dev: bool,
    ) -> DbResult<()>;

    /// Materialize `interval` of `snapshot`.
    ///
    /// With a `limit`, nothing is written and up to `limit` rows of the
    /// query's output are returned instead.
    async fn evaluate(
        &self,
        snapshot: &Snapshot,
        interval: Interval,
        latest: Timestamp,
        snapshots: &SnapshotsByName,
        is_dev: bool,
        limit: Option<usize>,
    ) -> DbResult<Option<QueryResult>>;

    /// Run the model's audits over `interval`.
    async fn audit(
        &self,
        snapshot: &Snapshot,
        interval: Interval,
        latest: Timestamp,
        snapshots: &SnapshotsByName,
        is_dev: bool,
    ) -> DbResult<Vec<AuditResult>>;

    /// Point the environment's views at the snapshots' physical tables.
    async fn promote(
        &self,
        snapshots: &[SnapshotTableInfo],
        environment: &str,
        is_dev: bool,
    ) -> DbResult<()>;

    /// Remove the environment's views of the snapshots.
    async fn demote(&self, snapshots: &[SnapshotTableInfo], environment: &str) -> DbResult<()>;

    /// Drop the snapshots' physical tables.
    async fn cleanup(&self, snapshots: &[SnapshotTableInfo]) -> DbResult<()>;

    /// Database type identifier for logging
    fn db_type(&self) -> &'static str;
}
