//! State store for Quarry.
//!
//! Records which snapshots exist, which environments reference them, and
//! which time ranges of each physical table have been materialized. The
//! [`StateReader`] / [`StateSync`] traits describe the two capability tiers;
//! [`DuckDbStateStore`] is the DuckDB-backed implementation.

pub mod ddl;
pub mod error;
pub mod migration;
pub mod store;
pub mod traits;

pub use error::{StateError, StateResult};
pub use store::DuckDbStateStore;
pub use traits::{ExpiredSnapshot, PromotionResult, StateReader, StateSync};
