//! qy-core - Core library for Quarry
//!
//! This crate provides the model definitions, content-addressed snapshot
//! identity, interval arithmetic, configuration parsing, and project loading
//! shared by every other Quarry component.

pub mod categorizer;
pub mod checksum;
pub mod config;
pub mod dag;
pub mod environment;
pub mod error;
pub mod fingerprint;
pub mod interval;
pub mod model;
pub mod model_name;
pub mod project;
pub mod snapshot;
pub mod time;

pub use categorizer::{categorize, AutoCategorizationMode, CategorizerConfig, SchemaChange};
pub use checksum::compute_checksum;
pub use config::Config;
pub use dag::ModelDag;
pub use environment::Environment;
pub use error::{CoreError, CoreResult};
pub use fingerprint::{FingerprintCache, SnapshotFingerprint};
pub use interval::{Interval, IntervalUnit};
pub use model::{Audit, AuditKind, Column, EvaluationStrategy, Model, ModelKind};
pub use model_name::ModelName;
pub use project::{Project, ProjectModels};
pub use snapshot::{
    ChangeCategory, Snapshot, SnapshotDataVersion, SnapshotId, SnapshotTableInfo, PROD,
};
pub use time::Timestamp;
