//! qy-engine - Versioning and deployment engine for Quarry
//!
//! Compares a project's models against what an environment has deployed
//! ([`ContextDiff`]), turns the difference into an actionable [`Plan`],
//! applies it with DAG-ordered concurrent backfills ([`PlanEvaluator`],
//! [`Scheduler`]) and garbage-collects what expired ([`Janitor`]). The
//! [`Context`] ties these together for one project.

pub mod console;
pub mod context;
pub mod context_diff;
pub mod error;
pub mod janitor;
pub mod plan;
pub mod plan_evaluator;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod test_utils;

pub use console::{Console, LogConsole, NoopConsole};
pub use context::Context;
pub use context_diff::{ContextDiff, ModificationKind};
pub use error::{EngineError, EngineResult, PlanError};
pub use janitor::{Janitor, JanitorReport};
pub use plan::{ModelTestRunner, Plan, PlanOptions, TestSummary};
pub use plan_evaluator::PlanEvaluator;
pub use scheduler::{Batch, BatchFailure, RunReport, Scheduler, SnapshotAuditResult};
