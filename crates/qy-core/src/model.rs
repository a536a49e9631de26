//! Model representation
//!
//! A [`Model`] is an immutable definition supplied by the loader. Edits never
//! mutate a model in place; they produce a new value with the same name.

use crate::error::{CoreError, CoreResult};
use crate::interval::IntervalUnit;
use crate::model_name::ModelName;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

/// The kind of a model and, through it, how the model is materialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModelKind {
    /// Table filled interval by interval, keyed on `time_column`
    Incremental { time_column: String },
    /// Table rebuilt from scratch on every evaluation
    Full,
    /// Table loaded from a CSV file
    Seed { path: PathBuf },
    /// Plain view over upstream tables
    View,
}

/// How an evaluator materializes a given kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationStrategy {
    /// Delete the interval's rows, then insert the query output for it
    InsertOverwriteByTimeRange,
    /// Replace the whole table with the query output
    ReplaceTable,
    /// Replace the whole table with the seed file contents
    LoadSeed,
    /// Replace the view definition
    CreateView,
}

impl ModelKind {
    /// Evaluation strategy for this kind.
    pub fn evaluation_strategy(&self) -> EvaluationStrategy {
        match self {
            ModelKind::Incremental { .. } => EvaluationStrategy::InsertOverwriteByTimeRange,
            ModelKind::Full => EvaluationStrategy::ReplaceTable,
            ModelKind::Seed { .. } => EvaluationStrategy::LoadSeed,
            ModelKind::View => EvaluationStrategy::CreateView,
        }
    }

    /// True when the kind produces a physical table (as opposed to a view).
    pub fn is_materialized(&self) -> bool {
        !matches!(self, ModelKind::View)
    }

    /// True when backfill work is split along the model's interval unit.
    ///
    /// Other kinds recompute everything at once, so their missing intervals
    /// collapse into a single task.
    pub fn batches_by_interval(&self) -> bool {
        matches!(self, ModelKind::Incremental { .. })
    }

    /// Time column for incremental kinds.
    pub fn time_column(&self) -> Option<&str> {
        match self {
            ModelKind::Incremental { time_column } => Some(time_column),
            _ => None,
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelKind::Incremental { .. } => write!(f, "incremental"),
            ModelKind::Full => write!(f, "full"),
            ModelKind::Seed { .. } => write!(f, "seed"),
            ModelKind::View => write!(f, "view"),
        }
    }
}

/// A single column of a model's declared schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
        }
    }
}

/// Built-in and custom data audits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditKind {
    /// No NULLs in any of the columns
    NotNull { columns: Vec<String> },
    /// No duplicate combinations of the columns
    UniqueValues { columns: Vec<String> },
    /// Column values restricted to a fixed set
    AcceptedValues { column: String, values: Vec<String> },
    /// Query returning offending rows; `{{ this }}` refers to the audited table
    Custom { query: String },
}

/// An audit attached to a model. Failing rows are reported, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Audit {
    pub name: String,
    #[serde(flatten)]
    pub kind: AuditKind,
    /// Skipped audits are reported but not executed
    #[serde(default)]
    pub skip: bool,
    /// Failures of blocking audits mark the run as failed
    #[serde(default)]
    pub blocking: bool,
}

/// Represents a declarative model in the project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    /// Namespaced model name (`schema.table`)
    pub name: ModelName,

    /// Materialization kind
    pub kind: ModelKind,

    /// Query template (ignored for seeds)
    #[serde(default)]
    pub query: String,

    /// Upstream models as resolved by the loader
    #[serde(default)]
    pub depends_on: BTreeSet<ModelName>,

    /// Upstream tables not managed by Quarry
    #[serde(default)]
    pub external_deps: BTreeSet<String>,

    /// Ordered output schema
    #[serde(default)]
    pub columns: Vec<Column>,

    /// Cadence of the model's intervals
    #[serde(default)]
    pub interval_unit: IntervalUnit,

    /// Earliest date the model has data for
    #[serde(default)]
    pub start: Option<String>,

    /// Interval units per backfill task
    #[serde(default)]
    pub batch_size: Option<usize>,

    /// SQL dialect of the query
    #[serde(default = "default_dialect")]
    pub dialect: String,

    #[serde(default)]
    pub audits: Vec<Audit>,

    #[serde(default)]
    pub owner: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub tags: Vec<String>,

    /// Owning project; set by the loader
    #[serde(default)]
    pub project: String,

    /// Source file the model was loaded from
    #[serde(default)]
    pub path: PathBuf,
}

fn default_dialect() -> String {
    "duckdb".to_string()
}

impl Model {
    /// Create a model with defaults for every optional field.
    pub fn new(name: impl Into<ModelName>, kind: ModelKind, query: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            query: query.into(),
            depends_on: BTreeSet::new(),
            external_deps: BTreeSet::new(),
            columns: Vec::new(),
            interval_unit: IntervalUnit::default(),
            start: None,
            batch_size: None,
            dialect: default_dialect(),
            audits: Vec::new(),
            owner: None,
            description: None,
            tags: Vec::new(),
            project: String::new(),
            path: PathBuf::new(),
        }
    }

    /// Builder: add upstream dependencies.
    pub fn with_depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ModelName>,
    {
        self.depends_on.extend(deps.into_iter().map(Into::into));
        self
    }

    /// Builder: set the ordered output schema.
    pub fn with_columns<I, N, T>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = (N, T)>,
        N: Into<String>,
        T: Into<String>,
    {
        self.columns = columns
            .into_iter()
            .map(|(n, t)| Column::new(n, t))
            .collect();
        self
    }

    /// Builder: set the earliest data date.
    pub fn with_start(mut self, start: impl Into<String>) -> Self {
        self.start = Some(start.into());
        self
    }

    /// Validate the fields the core relies on.
    pub fn validate(&self) -> CoreResult<()> {
        if self.name.is_empty() {
            return Err(CoreError::EmptyName {
                context: "model name".into(),
            });
        }
        if self.depends_on.contains(&self.name) {
            return Err(CoreError::CircularDependency {
                cycle: format!("{} -> {}", self.name, self.name),
            });
        }
        if let ModelKind::Incremental { time_column } = &self.kind {
            if time_column.is_empty() {
                return Err(CoreError::ConfigInvalid {
                    message: format!("Incremental model '{}' requires a time_column", self.name),
                });
            }
        }
        if !matches!(self.kind, ModelKind::Seed { .. }) && self.query.trim().is_empty() {
            return Err(CoreError::ConfigInvalid {
                message: format!("Model '{}' has an empty query", self.name),
            });
        }
        Ok(())
    }
}
