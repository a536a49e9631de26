//! Capability tiers of the state store.
//!
//! Read paths may be used concurrently from many callers. Every write path
//! is atomic: an environment's membership and the versions of its snapshots
//! are updated in one transaction.

use crate::error::StateResult;
use qy_core::{Environment, Interval, Snapshot, SnapshotId, SnapshotTableInfo, Timestamp};
use std::collections::{BTreeMap, BTreeSet};

/// Outcome of promoting an environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromotionResult {
    /// Members that are new or changed relative to the previous record
    pub added: Vec<SnapshotTableInfo>,
    /// Previous members whose model is no longer part of the environment
    pub removed: Vec<SnapshotTableInfo>,
}

/// A snapshot eligible for deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiredSnapshot {
    pub table_info: SnapshotTableInfo,
    /// False when a surviving snapshot still uses the same physical table
    pub drop_table: bool,
}

/// Read-only access to recorded state.
pub trait StateReader: Send + Sync {
    /// Environment record by (normalized) name.
    fn get_environment(&self, name: &str) -> StateResult<Option<Environment>>;

    /// Every environment record.
    fn get_environments(&self) -> StateResult<Vec<Environment>>;

    /// Snapshots by id, with interval history attached. Unknown ids are
    /// absent from the result.
    fn get_snapshots(&self, ids: &[SnapshotId]) -> StateResult<BTreeMap<SnapshotId, Snapshot>>;

    /// Every stored snapshot of `name` sharing `version`.
    fn get_snapshots_by_version(&self, name: &str, version: &str) -> StateResult<Vec<Snapshot>>;

    /// The subset of `ids` that is stored.
    fn snapshots_exist(&self, ids: &[SnapshotId]) -> StateResult<BTreeSet<SnapshotId>>;

    /// Schema version; 0 means uninitialized. With `validate`, an
    /// uninitialized or too-new store is an error.
    fn get_versions(&self, validate: bool) -> StateResult<i32>;
}

/// Read-write access. A writer is also a reader.
pub trait StateSync: StateReader {
    /// Record new snapshots. Fails if any of them already exists.
    fn push_snapshots(&self, snapshots: &[Snapshot]) -> StateResult<()>;

    /// Replace an environment's record.
    ///
    /// Every member must be stored and versioned. Fails when the stored
    /// record was written by a plan other than `previous_plan_id`.
    fn promote(&self, environment: &Environment) -> StateResult<PromotionResult>;

    /// Mark an environment as fully applied.
    fn finalize(&self, environment: &Environment) -> StateResult<()>;

    /// Make an environment expire immediately.
    fn invalidate_environment(&self, name: &str) -> StateResult<()>;

    /// Remove an environment record; returns whether it existed.
    fn delete_environment(&self, name: &str) -> StateResult<bool>;

    /// Environments whose expiration is at or before `now`.
    fn get_expired_environments(&self, now: Timestamp) -> StateResult<Vec<Environment>>;

    /// Delete and return the expired environments.
    fn delete_expired_environments(&self, now: Timestamp) -> StateResult<Vec<Environment>> {
        let expired = self.get_expired_environments(now)?;
        for environment in &expired {
            self.delete_environment(&environment.name)?;
        }
        Ok(expired)
    }

    /// Expired snapshots not referenced by any environment.
    fn get_expired_snapshots(&self, now: Timestamp) -> StateResult<Vec<ExpiredSnapshot>>;

    /// Delete snapshot records, and interval history no snapshot uses anymore.
    fn delete_snapshots(&self, ids: &[SnapshotId]) -> StateResult<()>;

    /// Delete and return the expired snapshots.
    fn delete_expired_snapshots(&self, now: Timestamp) -> StateResult<Vec<ExpiredSnapshot>> {
        let expired = self.get_expired_snapshots(now)?;
        let ids: Vec<SnapshotId> = expired.iter().map(|e| e.table_info.snapshot_id()).collect();
        self.delete_snapshots(&ids)?;
        Ok(expired)
    }

    /// Record a materialized interval for the snapshot's table.
    fn add_interval(&self, snapshot: &Snapshot, interval: Interval, is_dev: bool) -> StateResult<()>;

    /// Forget an interval.
    ///
    /// With `all_versions` every table of the model loses it; otherwise only
    /// the snapshots' own tables do.
    fn remove_interval(
        &self,
        snapshots: &[SnapshotTableInfo],
        interval: Interval,
        all_versions: bool,
    ) -> StateResult<()>;

    /// Bring the schema up to date.
    fn migrate(&self) -> StateResult<()>;
}
