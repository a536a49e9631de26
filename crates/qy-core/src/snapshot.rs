//! Snapshots: the versioned, deployable unit derived from one model.

use crate::error::CoreResult;
use crate::fingerprint::SnapshotFingerprint;
use crate::interval::{self, Interval};
use crate::model::Model;
use crate::model_name::ModelName;
use crate::time::{parse_start, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of the production environment.
pub const PROD: &str = "prod";

/// Suffix of the clone table forward-only changes write to in development.
const TEMP_SUFFIX: &str = "__temp";

/// How a modification affects the data of a model and its dependents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeCategory {
    /// Downstream models must be rebuilt
    Breaking,
    /// Only the changed model is rebuilt; dependents keep their data
    NonBreaking,
    /// No data change at all
    Metadata,
    /// The existing table is kept; the change applies to new intervals only
    ForwardOnly,
}

impl fmt::Display for ChangeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeCategory::Breaking => write!(f, "breaking"),
            ChangeCategory::NonBreaking => write!(f, "non-breaking"),
            ChangeCategory::Metadata => write!(f, "metadata"),
            ChangeCategory::ForwardOnly => write!(f, "forward-only"),
        }
    }
}

/// Unique identity of a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SnapshotId {
    pub name: ModelName,
    pub identifier: String,
}

impl SnapshotId {
    pub fn new(name: impl Into<ModelName>, identifier: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            identifier: identifier.into(),
        }
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.identifier)
    }
}

/// A fingerprint together with the version it resolved to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotDataVersion {
    pub fingerprint: SnapshotFingerprint,
    pub version: String,
}

/// Everything needed to address a snapshot's physical objects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SnapshotTableInfo {
    pub name: ModelName,
    pub identifier: String,
    pub version: String,
    pub physical_schema: String,
    /// False for view models, whose physical object is a view
    pub materialized: bool,
    #[serde(default)]
    pub forward_only: bool,
}

impl SnapshotTableInfo {
    pub fn snapshot_id(&self) -> SnapshotId {
        SnapshotId::new(self.name.clone(), self.identifier.clone())
    }

    pub fn table_name(&self, is_dev: bool) -> String {
        physical_table_name(
            &self.physical_schema,
            &self.name,
            &self.version,
            is_dev && self.forward_only,
        )
    }
}

fn physical_table_name(schema: &str, name: &ModelName, version: &str, temp: bool) -> String {
    let suffix = if temp { TEMP_SUFFIX } else { "" };
    format!("{}.{}__{}{}", schema, name.flattened(), version, suffix)
}

/// Schema an environment's views live in.
pub fn environment_schema(model_schema: &str, environment: &str) -> String {
    if environment == PROD {
        model_schema.to_string()
    } else {
        format!("{}__{}", model_schema, environment)
    }
}

/// Fully qualified view name of `name` in `environment`.
pub fn view_name(name: &ModelName, environment: &str) -> String {
    format!(
        "{}.{}",
        environment_schema(name.schema(), environment),
        name.table()
    )
}

/// A model frozen at one point of the graph's evolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub name: ModelName,
    pub fingerprint: SnapshotFingerprint,
    pub model: Model,
    pub physical_schema: String,
    pub parents: Vec<SnapshotId>,
    /// Assigned by categorization, `None` while uncategorized
    pub version: Option<String>,
    #[serde(default)]
    pub previous_versions: Vec<SnapshotDataVersion>,
    pub change_category: Option<ChangeCategory>,
    pub created_ts: Timestamp,
    pub updated_ts: Timestamp,
    pub ttl_ms: i64,
    #[serde(default)]
    pub intervals: Vec<Interval>,
    #[serde(default)]
    pub dev_intervals: Vec<Interval>,
}

impl Snapshot {
    /// Build a fresh, unversioned snapshot for `model`.
    pub fn from_model(
        model: &Model,
        fingerprint: SnapshotFingerprint,
        parents: Vec<SnapshotId>,
        physical_schema: &str,
        ttl_ms: i64,
        now: Timestamp,
    ) -> Self {
        Self {
            name: model.name.clone(),
            fingerprint,
            model: model.clone(),
            physical_schema: physical_schema.to_string(),
            parents,
            version: None,
            previous_versions: Vec::new(),
            change_category: None,
            created_ts: now,
            updated_ts: now,
            ttl_ms,
            intervals: Vec::new(),
            dev_intervals: Vec::new(),
        }
    }

    pub fn identifier(&self) -> String {
        self.fingerprint.to_identifier()
    }

    pub fn snapshot_id(&self) -> SnapshotId {
        SnapshotId::new(self.name.clone(), self.identifier())
    }

    /// Version derived from this snapshot's own data fingerprint.
    pub fn data_version(&self) -> String {
        self.fingerprint.to_version()
    }

    /// The version physical tables are keyed on.
    pub fn table_version(&self) -> String {
        self.version.clone().unwrap_or_else(|| self.data_version())
    }

    pub fn is_categorized(&self) -> bool {
        self.version.is_some()
    }

    pub fn is_forward_only(&self) -> bool {
        self.change_category == Some(ChangeCategory::ForwardOnly)
    }

    /// True when this snapshot owns a new physical table.
    pub fn is_new_version(&self) -> bool {
        self.version.as_deref() == Some(self.data_version().as_str())
    }

    /// Version of the most recent prior snapshot, if any.
    pub fn previous_version(&self) -> Option<&SnapshotDataVersion> {
        self.previous_versions.last()
    }

    /// Assign a category and the version it implies.
    ///
    /// `reuse_previous` selects the predecessor's version (falling back to a
    /// new version when there is no predecessor).
    pub fn categorize(&mut self, category: ChangeCategory, reuse_previous: bool) {
        let version = match (reuse_previous, self.previous_version()) {
            (true, Some(prev)) => prev.version.clone(),
            _ => self.data_version(),
        };
        self.change_category = Some(category);
        self.version = Some(version);
    }

    /// Drop a previous categorization.
    pub fn uncategorize(&mut self) {
        self.change_category = None;
        self.version = None;
    }

    pub fn table_info(&self) -> SnapshotTableInfo {
        SnapshotTableInfo {
            name: self.name.clone(),
            identifier: self.identifier(),
            version: self.table_version(),
            physical_schema: self.physical_schema.clone(),
            materialized: self.model.kind.is_materialized(),
            forward_only: self.is_forward_only(),
        }
    }

    /// Physical table name; forward-only work in dev goes to a clone table.
    pub fn table_name(&self, is_dev: bool) -> String {
        physical_table_name(
            &self.physical_schema,
            &self.name,
            &self.table_version(),
            is_dev && self.is_forward_only(),
        )
    }

    pub fn view_name(&self, environment: &str) -> String {
        view_name(&self.name, environment)
    }

    pub fn expiration_ts(&self) -> Timestamp {
        self.updated_ts.saturating_add(self.ttl_ms)
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expiration_ts() <= now
    }

    /// Coverage tracked for the given target.
    pub fn covered(&self, is_dev: bool) -> &[Interval] {
        if is_dev && self.is_forward_only() {
            &self.dev_intervals
        } else {
            &self.intervals
        }
    }

    pub fn add_interval(&mut self, new: Interval, is_dev: bool) {
        if is_dev && self.is_forward_only() {
            interval::add_interval(&mut self.dev_intervals, new);
        } else {
            interval::add_interval(&mut self.intervals, new);
        }
    }

    pub fn remove_interval(&mut self, removed: Interval) {
        interval::remove_interval(&mut self.intervals, removed);
        interval::remove_interval(&mut self.dev_intervals, removed);
    }

    /// Earliest timestamp the model has data for, if it declares one.
    pub fn model_start(&self, now: Timestamp) -> CoreResult<Option<Timestamp>> {
        self.model
            .start
            .as_deref()
            .map(|s| parse_start(s, now))
            .transpose()
    }

    /// Intervals in `[start, end)` not yet materialized.
    ///
    /// Work is bounded by `latest` and by the model's declared start; views
    /// never need backfill.
    pub fn missing_intervals(
        &self,
        start: Timestamp,
        end: Timestamp,
        latest: Timestamp,
        is_dev: bool,
    ) -> CoreResult<Vec<Interval>> {
        if !self.model.kind.is_materialized() {
            return Ok(Vec::new());
        }
        let start = match self.model_start(latest)? {
            Some(model_start) => start.max(model_start),
            None => start,
        };
        let end = end.min(latest);
        Ok(interval::missing_intervals(
            self.covered(is_dev),
            start,
            end,
            self.model.interval_unit,
        ))
    }

    /// Split missing intervals into backfill batches according to the kind.
    pub fn batches(&self, missing: &[Interval]) -> Vec<Interval> {
        let batch_size = if self.model.kind.batches_by_interval() {
            self.model.batch_size.or(Some(1))
        } else {
            None
        };
        interval::chunk(missing, self.model.interval_unit, batch_size)
    }
}

#[cfg(test)]
#[path = "snapshot_test.rs"]
mod tests;
