//! Named, independently deployable sets of snapshots.

use crate::error::{CoreError, CoreResult};
use crate::snapshot::{SnapshotId, SnapshotTableInfo, PROD};
use crate::time::Timestamp;
use serde::{Deserialize, Serialize};

/// Lowercase and validate an environment name.
pub fn normalize_name(name: &str) -> CoreResult<String> {
    let name = name.trim().to_lowercase();
    if name.is_empty() {
        return Err(CoreError::EmptyName {
            context: "environment name".into(),
        });
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(CoreError::ConfigInvalid {
            message: format!("Invalid environment name '{}': use letters, digits and '_'", name),
        });
    }
    Ok(name)
}

/// An environment record as persisted by the state store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    pub name: String,
    /// Member snapshots, sorted by model name
    pub snapshots: Vec<SnapshotTableInfo>,
    pub start_at: Timestamp,
    pub end_at: Option<Timestamp>,
    pub plan_id: String,
    pub previous_plan_id: Option<String>,
    /// `None` for environments that never expire
    pub expiration_ts: Option<Timestamp>,
    /// Set once every member is promoted and the views are in place
    #[serde(default)]
    pub finalized_ts: Option<Timestamp>,
}

impl Environment {
    pub fn is_dev(&self) -> bool {
        self.name != PROD
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expiration_ts.is_some_and(|ts| ts <= now)
    }

    pub fn snapshot_ids(&self) -> Vec<SnapshotId> {
        self.snapshots.iter().map(|s| s.snapshot_id()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&SnapshotTableInfo> {
        self.snapshots.iter().find(|s| s.name == name)
    }
}
