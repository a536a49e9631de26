//! Error types for the engine.

use crate::scheduler::RunReport;
use qy_core::CoreError;
use qy_db::DbError;
use qy_state::StateError;
use thiserror::Error;

/// Conditions that stop a plan from being built or applied.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// Modifications still need a category (P002).
    #[error("[P002] Changes to {} need a category before the plan can be applied", names.join(", "))]
    Uncategorized { names: Vec<String> },

    /// The new version would cover less than the one it replaces (P003).
    #[error("[P003] Plan would leave a gap in '{model}': {gaps} previously materialized but not backfilled")]
    Gaps { model: String, gaps: String },

    /// Model unit tests failed (P004).
    #[error("[P004] {failed} model test(s) failed")]
    FailingTests { failed: usize },
}

/// Engine errors.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Inconsistent request, rejected before touching state (P001).
    #[error("[P001] {0}")]
    Config(String),

    #[error(transparent)]
    Plan(#[from] PlanError),

    /// Some backfill batches failed or were skipped (P005).
    #[error("[P005] Backfill did not complete: {}", .0.summary())]
    Backfill(Box<RunReport>),

    /// An optional external tool is not installed (P006).
    #[error("[P006] Missing optional dependency: {0}")]
    MissingDependency(String),

    /// Filesystem or process failure (P007).
    #[error("[P007] IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Db(#[from] DbError),
}

/// Result type alias for [`EngineError`].
pub type EngineResult<T> = Result<T, EngineError>;
