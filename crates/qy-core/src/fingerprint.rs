//! Content-addressed snapshot identity.
//!
//! A fingerprint is a pure function of a model's definition and the
//! fingerprints of its upstream models. It splits into a *data* component
//! (anything that changes what rows the model produces) and a *metadata*
//! component (ownership, documentation, audits), each mirrored for parents.

use crate::checksum::hash_parts;
use crate::error::{CoreError, CoreResult};
use crate::model::Model;
use crate::model_name::ModelName;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, OnceLock};

/// Hex digits kept for identifiers and versions.
const SHORT_HASH_LEN: usize = 16;

/// Composite content hash of a model at a point in the graph's evolution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SnapshotFingerprint {
    pub data_hash: String,
    pub metadata_hash: String,
    pub parent_data_hash: String,
    pub parent_metadata_hash: String,
}

impl SnapshotFingerprint {
    /// Short identifier covering every component.
    pub fn to_identifier(&self) -> String {
        short(hash_parts([
            &self.data_hash,
            &self.metadata_hash,
            &self.parent_data_hash,
            &self.parent_metadata_hash,
        ]))
    }

    /// Short version string covering only the data components.
    ///
    /// Snapshots sharing a version share a physical table.
    pub fn to_version(&self) -> String {
        short(hash_parts([&self.data_hash, &self.parent_data_hash]))
    }

    /// True when the model's own data-affecting definition differs.
    pub fn data_changed(&self, other: &SnapshotFingerprint) -> bool {
        self.data_hash != other.data_hash
    }

    /// True when the model's own metadata differs.
    pub fn metadata_changed(&self, other: &SnapshotFingerprint) -> bool {
        self.metadata_hash != other.metadata_hash
    }

    /// True when only upstream components differ.
    pub fn is_indirect_change(&self, other: &SnapshotFingerprint) -> bool {
        !self.data_changed(other)
            && !self.metadata_changed(other)
            && (self.parent_data_hash != other.parent_data_hash
                || self.parent_metadata_hash != other.parent_metadata_hash)
    }
}

fn short(hash: String) -> String {
    hash[..SHORT_HASH_LEN].to_string()
}

/// Hash of everything that determines the rows a model produces.
pub fn data_hash(model: &Model) -> CoreResult<String> {
    let kind = serde_json::to_string(&model.kind)?;
    let mut parts: Vec<String> = vec![
        model.name.to_string(),
        kind,
        model.query.trim().to_string(),
        model.dialect.clone(),
        model.interval_unit.to_string(),
        model.start.clone().unwrap_or_default(),
    ];
    parts.extend(
        model
            .columns
            .iter()
            .map(|c| format!("{} {}", c.name, c.data_type)),
    );
    parts.extend(model.external_deps.iter().cloned());
    Ok(hash_parts(parts))
}

/// Hash of cosmetic and operational fields that never change data.
pub fn metadata_hash(model: &Model) -> CoreResult<String> {
    let audits = serde_json::to_string(&model.audits)?;
    let mut tags = model.tags.clone();
    tags.sort();
    let mut parts: Vec<String> = vec![
        model.owner.clone().unwrap_or_default(),
        model.description.clone().unwrap_or_default(),
        audits,
        model.batch_size.map(|b| b.to_string()).unwrap_or_default(),
    ];
    parts.extend(tags);
    Ok(hash_parts(parts))
}

/// Fingerprint `model` given its upstream models' fingerprints.
///
/// Fails with [`CoreError::UnresolvedDependency`] when an upstream model is
/// missing from `upstream`.
pub fn fingerprint(
    model: &Model,
    upstream: &BTreeMap<ModelName, SnapshotFingerprint>,
) -> CoreResult<SnapshotFingerprint> {
    let parents = resolve_parents(model, |dep| upstream.get(dep).cloned())?;
    compose(model, &parents)
}

fn resolve_parents<F>(model: &Model, mut lookup: F) -> CoreResult<Vec<SnapshotFingerprint>>
where
    F: FnMut(&ModelName) -> Option<SnapshotFingerprint>,
{
    model
        .depends_on
        .iter()
        .map(|dep| {
            lookup(dep).ok_or_else(|| CoreError::UnresolvedDependency {
                model: model.name.to_string(),
                dependency: dep.to_string(),
            })
        })
        .collect()
}

/// `parents` must be in `depends_on` order, which is sorted by name.
fn compose(model: &Model, parents: &[SnapshotFingerprint]) -> CoreResult<SnapshotFingerprint> {
    let parent_data_hash = hash_parts(
        parents
            .iter()
            .flat_map(|p| [p.data_hash.as_str(), p.parent_data_hash.as_str()]),
    );
    let parent_metadata_hash = hash_parts(
        parents
            .iter()
            .flat_map(|p| [p.metadata_hash.as_str(), p.parent_metadata_hash.as_str()]),
    );
    Ok(SnapshotFingerprint {
        data_hash: data_hash(model)?,
        metadata_hash: metadata_hash(model)?,
        parent_data_hash,
        parent_metadata_hash,
    })
}

/// Memoization table for fingerprints within one diff/plan cycle.
///
/// The first fingerprint stored for a model name is the one every caller
/// sees, including threads that raced to compute it.
#[derive(Debug, Default)]
pub struct FingerprintCache {
    entries: Mutex<HashMap<ModelName, Arc<OnceLock<SnapshotFingerprint>>>>,
}

impl FingerprintCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached fingerprint for `name`, if already computed.
    pub fn get(&self, name: &str) -> Option<SnapshotFingerprint> {
        self.entries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(name)
            .and_then(|cell| cell.get().cloned())
    }

    /// Number of computed fingerprints.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .values()
            .filter(|cell| cell.get().is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cell(&self, name: &ModelName) -> Arc<OnceLock<SnapshotFingerprint>> {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        Arc::clone(entries.entry(name.clone()).or_default())
    }

    /// Fingerprint `name`, recursing through its upstream models.
    pub fn fingerprint(
        &self,
        name: &str,
        models: &BTreeMap<ModelName, Model>,
    ) -> CoreResult<SnapshotFingerprint> {
        let mut visiting = HashSet::new();
        self.fingerprint_inner(name, models, &mut visiting)
    }

    fn fingerprint_inner(
        &self,
        name: &str,
        models: &BTreeMap<ModelName, Model>,
        visiting: &mut HashSet<ModelName>,
    ) -> CoreResult<SnapshotFingerprint> {
        if let Some(fp) = self.get(name) {
            return Ok(fp);
        }
        let model = models.get(name).ok_or_else(|| CoreError::ModelNotFound {
            name: name.to_string(),
        })?;
        if !visiting.insert(model.name.clone()) {
            return Err(CoreError::CircularDependency {
                cycle: format!("{} -> ... -> {}", model.name, model.name),
            });
        }

        let mut parents = Vec::with_capacity(model.depends_on.len());
        for dep in &model.depends_on {
            if !models.contains_key(dep) {
                return Err(CoreError::UnresolvedDependency {
                    model: model.name.to_string(),
                    dependency: dep.to_string(),
                });
            }
            parents.push(self.fingerprint_inner(dep, models, visiting)?);
        }
        visiting.remove(&model.name);

        let cell = self.cell(&model.name);
        if let Some(fp) = cell.get() {
            return Ok(fp.clone());
        }
        let fp = compose(model, &parents)?;
        Ok(cell.get_or_init(|| fp).clone())
    }

    /// Fingerprint every model in the set.
    pub fn fingerprint_all(
        &self,
        models: &BTreeMap<ModelName, Model>,
    ) -> CoreResult<BTreeMap<ModelName, SnapshotFingerprint>> {
        models
            .keys()
            .map(|name| Ok((name.clone(), self.fingerprint(name, models)?)))
            .collect()
    }
}

#[cfg(test)]
#[path = "fingerprint_test.rs"]
mod tests;
