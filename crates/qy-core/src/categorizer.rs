//! Automatic categorization of modified models.
//!
//! Compares the declared schema and kind of two versions of a model. Purely
//! additive changes (new columns appended at the end) are non-breaking;
//! anything else is breaking or left for an explicit decision depending on
//! the configured mode.

use crate::model::Model;
use crate::snapshot::ChangeCategory;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// How aggressively modifications are categorized without user input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutoCategorizationMode {
    /// Every modification gets a category; inconclusive means breaking
    Full,
    /// Only provably non-breaking modifications are categorized
    #[default]
    Semi,
    /// Nothing is categorized automatically
    Off,
}

/// Categorizer settings per model language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CategorizerConfig {
    #[serde(default)]
    pub sql: AutoCategorizationMode,
}

impl CategorizerConfig {
    pub fn all(mode: AutoCategorizationMode) -> Self {
        Self { sql: mode }
    }
}

/// A single schema-level difference between two model versions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaChange {
    ColumnAdded { column: String },
    ColumnRemoved { column: String },
    TypeChanged {
        column: String,
        old_type: String,
        new_type: String,
    },
    ColumnMoved { column: String },
    KindChanged { old: String, new: String },
}

impl SchemaChange {
    pub fn is_breaking(&self) -> bool {
        !matches!(self, SchemaChange::ColumnAdded { .. })
    }
}

impl fmt::Display for SchemaChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaChange::ColumnAdded { column } => write!(f, "Column '{}' was added", column),
            SchemaChange::ColumnRemoved { column } => {
                write!(f, "Column '{}' was removed", column)
            }
            SchemaChange::TypeChanged {
                column,
                old_type,
                new_type,
            } => write!(
                f,
                "Column '{}' type changed from '{}' to '{}'",
                column, old_type, new_type
            ),
            SchemaChange::ColumnMoved { column } => write!(f, "Column '{}' was moved", column),
            SchemaChange::KindChanged { old, new } => {
                write!(f, "Kind changed from '{}' to '{}'", old, new)
            }
        }
    }
}

/// Schema-level differences from `old` to `new`.
pub fn schema_changes(old: &Model, new: &Model) -> Vec<SchemaChange> {
    let mut changes = Vec::new();

    if old.kind != new.kind {
        changes.push(SchemaChange::KindChanged {
            old: old.kind.to_string(),
            new: new.kind.to_string(),
        });
    }

    let new_types: HashMap<&str, &str> = new
        .columns
        .iter()
        .map(|c| (c.name.as_str(), c.data_type.as_str()))
        .collect();

    for (position, column) in old.columns.iter().enumerate() {
        match new_types.get(column.name.as_str()) {
            None => changes.push(SchemaChange::ColumnRemoved {
                column: column.name.clone(),
            }),
            Some(new_type) if !new_type.eq_ignore_ascii_case(&column.data_type) => {
                changes.push(SchemaChange::TypeChanged {
                    column: column.name.clone(),
                    old_type: column.data_type.clone(),
                    new_type: new_type.to_string(),
                })
            }
            Some(_) => {
                if new.columns.get(position).map(|c| &c.name) != Some(&column.name) {
                    changes.push(SchemaChange::ColumnMoved {
                        column: column.name.clone(),
                    });
                }
            }
        }
    }

    let old_names: Vec<&str> = old.columns.iter().map(|c| c.name.as_str()).collect();
    for column in &new.columns {
        if !old_names.contains(&column.name.as_str()) {
            changes.push(SchemaChange::ColumnAdded {
                column: column.name.clone(),
            });
        }
    }

    changes
}

/// Categorize a directly modified model, or `None` when undecided.
pub fn categorize(old: &Model, new: &Model, mode: AutoCategorizationMode) -> Option<ChangeCategory> {
    if mode == AutoCategorizationMode::Off {
        return None;
    }

    let changes = schema_changes(old, new);
    let additive = !changes.is_empty() && changes.iter().all(|c| !c.is_breaking());

    // Without a column change there is no evidence either way.
    if additive {
        Some(ChangeCategory::NonBreaking)
    } else if mode == AutoCategorizationMode::Full {
        Some(ChangeCategory::Breaking)
    } else {
        None
    }
}

#[cfg(test)]
#[path = "categorizer_test.rs"]
mod tests;
