//! qy-db - Execution adapter for Quarry
//!
//! This crate provides the [`SnapshotEvaluator`] trait the engine drives to
//! materialize snapshots, and its DuckDB implementation.

pub mod audit;
pub mod duckdb;
pub mod error;
pub mod render;
pub mod sql_utils;
pub mod traits;

pub use duckdb::DuckDbBackend;
pub use error::{DbError, DbResult};
pub use render::RenderContext;
pub use traits::{AuditResult, QueryResult, SnapshotEvaluator, SnapshotsByName};
