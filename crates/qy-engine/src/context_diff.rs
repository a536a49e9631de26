//! Difference between a candidate snapshot set and a deployed environment.

use crate::error::EngineResult;
use qy_core::environment::normalize_name;
use qy_core::{ModelName, Snapshot, SnapshotDataVersion, SnapshotId, SnapshotTableInfo};
use qy_state::{StateError, StateReader};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// How a modified model differs from the deployed one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModificationKind {
    /// The model's own data-affecting definition changed
    Direct,
    /// Only upstream data changed
    Indirect,
    /// Only descriptive fields changed
    Metadata,
}

impl fmt::Display for ModificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModificationKind::Direct => write!(f, "directly modified"),
            ModificationKind::Indirect => write!(f, "indirectly modified"),
            ModificationKind::Metadata => write!(f, "metadata updated"),
        }
    }
}

/// Added, removed and modified models of one environment.
///
/// Never cached: state may change between two requests.
#[derive(Debug, Clone)]
pub struct ContextDiff {
    pub environment: String,
    /// Environment a new environment is seeded from
    pub create_from: String,
    pub is_new_environment: bool,
    /// Plan that wrote the environment's current record
    pub previous_plan_id: Option<String>,
    /// Candidate snapshots; stored instances replace equal candidates
    pub snapshots: BTreeMap<ModelName, Snapshot>,
    pub added: BTreeSet<ModelName>,
    pub removed: BTreeMap<ModelName, SnapshotTableInfo>,
    /// Reference snapshot of every modified model
    pub modified: BTreeMap<ModelName, Snapshot>,
    /// Candidates the state store does not know yet
    pub new_snapshot_ids: BTreeSet<SnapshotId>,
}

impl ContextDiff {
    /// Compare `candidates` with what `environment` holds.
    ///
    /// A missing environment is compared with `create_from` instead, or
    /// with nothing when that does not exist either.
    pub fn create<S: StateReader + ?Sized>(
        environment: &str,
        candidates: BTreeMap<ModelName, Snapshot>,
        create_from: &str,
        state: &S,
    ) -> EngineResult<Self> {
        let environment = normalize_name(environment)?;
        let create_from = normalize_name(create_from)?;

        let existing = state.get_environment(&environment)?;
        let is_new_environment = existing.is_none();
        let previous_plan_id = existing.as_ref().map(|env| env.plan_id.clone());
        let reference = match existing {
            Some(env) => Some(env),
            None => state.get_environment(&create_from)?,
        };
        let reference: BTreeMap<ModelName, SnapshotTableInfo> = reference
            .map(|env| {
                env.snapshots
                    .into_iter()
                    .map(|info| (info.name.clone(), info))
                    .collect()
            })
            .unwrap_or_default();

        let mut ids: Vec<SnapshotId> = candidates.values().map(Snapshot::snapshot_id).collect();
        ids.extend(reference.values().map(SnapshotTableInfo::snapshot_id));
        let stored = state.get_snapshots(&ids)?;

        let mut diff = Self {
            environment,
            create_from,
            is_new_environment,
            previous_plan_id,
            snapshots: BTreeMap::new(),
            added: BTreeSet::new(),
            removed: BTreeMap::new(),
            modified: BTreeMap::new(),
            new_snapshot_ids: BTreeSet::new(),
        };

        for (name, candidate) in candidates {
            let id = candidate.snapshot_id();
            let mut snapshot = match stored.get(&id) {
                Some(existing) => existing.clone(),
                None => {
                    diff.new_snapshot_ids.insert(id.clone());
                    candidate
                }
            };

            match reference.get(&name) {
                None => {
                    diff.added.insert(name.clone());
                }
                Some(info) if info.identifier == id.identifier => {}
                Some(info) => {
                    let previous = stored.get(&info.snapshot_id()).cloned().ok_or_else(|| {
                        StateError::SnapshotNotFound {
                            id: info.snapshot_id().to_string(),
                        }
                    })?;
                    if diff.new_snapshot_ids.contains(&id) {
                        snapshot.previous_versions = previous.previous_versions.clone();
                        snapshot.previous_versions.push(SnapshotDataVersion {
                            fingerprint: previous.fingerprint.clone(),
                            version: previous.table_version(),
                        });
                    }
                    diff.modified.insert(name.clone(), previous);
                }
            }
            diff.snapshots.insert(name, snapshot);
        }

        for (name, info) in reference {
            if !diff.snapshots.contains_key(&name) {
                diff.removed.insert(name, info);
            }
        }

        log::debug!(
            "Diff for '{}': {} added, {} removed, {} modified",
            diff.environment,
            diff.added.len(),
            diff.removed.len(),
            diff.modified.len()
        );
        Ok(diff)
    }

    pub fn has_changes(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty() || !self.modified.is_empty()
    }

    pub fn is_dev(&self) -> bool {
        self.environment != qy_core::PROD
    }

    /// How `name` was modified, if it was.
    pub fn modified_kind(&self, name: &str) -> Option<ModificationKind> {
        let old = self.modified.get(name)?;
        let new = self.snapshots.get(name)?;
        let (new, old) = (&new.fingerprint, &old.fingerprint);
        Some(if new.data_changed(old) {
            ModificationKind::Direct
        } else if new.parent_data_hash != old.parent_data_hash {
            ModificationKind::Indirect
        } else {
            ModificationKind::Metadata
        })
    }

    pub fn directly_modified(&self, name: &str) -> bool {
        self.modified_kind(name) == Some(ModificationKind::Direct)
    }

    pub fn indirectly_modified(&self, name: &str) -> bool {
        self.modified_kind(name) == Some(ModificationKind::Indirect)
    }

    pub fn metadata_updated(&self, name: &str) -> bool {
        self.modified_kind(name) == Some(ModificationKind::Metadata)
    }

    /// Candidates that must be pushed to the state store.
    pub fn new_snapshots(&self) -> impl Iterator<Item = &Snapshot> {
        self.snapshots
            .values()
            .filter(|s| self.new_snapshot_ids.contains(&s.snapshot_id()))
    }

    /// Human-readable listing of the changes.
    pub fn summary(&self) -> String {
        if !self.has_changes() {
            return format!("No changes to '{}'", self.environment);
        }
        let mut lines = Vec::new();
        if self.is_new_environment {
            lines.push(format!(
                "New environment '{}' created from '{}'",
                self.environment, self.create_from
            ));
        } else {
            lines.push(format!("Differences from '{}':", self.environment));
        }
        for name in &self.added {
            lines.push(format!("  + {}", name));
        }
        for name in self.removed.keys() {
            lines.push(format!("  - {}", name));
        }
        for name in self.modified.keys() {
            let kind = self
                .modified_kind(name)
                .map(|k| k.to_string())
                .unwrap_or_default();
            let category = self
                .snapshots
                .get(name)
                .and_then(|s| s.change_category)
                .map_or("uncategorized".to_string(), |c| c.to_string());
            lines.push(format!("  ~ {} ({}, {})", name, kind, category));
        }
        lines.join("\n")
    }
}

#[cfg(test)]
#[path = "context_diff_test.rs"]
mod tests;
