//! Error types for the state store.

use thiserror::Error;

/// State store errors.
#[derive(Error, Debug)]
pub enum StateError {
    /// Failed to open or create the state database (S001).
    #[error("[S001] State store connection failed: {0}")]
    ConnectionError(String),

    /// Schema migration failed (S002).
    #[error("[S002] State store migration failed: {0}")]
    MigrationError(String),

    /// SQL execution error inside the state database (S003).
    #[error("[S003] State store query failed: {0}")]
    QueryError(String),

    /// Transaction management error (S004).
    #[error("[S004] State store transaction failed: {0}")]
    TransactionError(String),

    /// The store has never been migrated (S005).
    #[error("[S005] State store is not initialized; run `qy migrate` first")]
    NotInitialized,

    /// The store was written by a newer release (S006).
    #[error("[S006] State store schema version {found} is newer than supported version {supported}")]
    VersionMismatch { found: i32, supported: i32 },

    /// A referenced snapshot does not exist (S007).
    #[error("[S007] Snapshot not found: {id}")]
    SnapshotNotFound { id: String },

    /// A snapshot was promoted before it was assigned a version (S008).
    #[error("[S008] Snapshot {id} has no version and cannot be promoted")]
    Unversioned { id: String },

    /// A snapshot with the same identity was already pushed (S009).
    #[error("[S009] Snapshot already exists: {id}")]
    SnapshotExists { id: String },

    /// Another plan was applied to the environment in the meantime (S010).
    #[error("[S010] Environment '{environment}' was changed by plan '{found}'; expected previous plan {expected:?}. Re-run the plan")]
    PlanConflict {
        environment: String,
        expected: Option<String>,
        found: String,
    },

    /// Stored payload could not be (de)serialized (S011).
    #[error("[S011] State payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid core value (S012).
    #[error("[S012] {0}")]
    Core(#[from] qy_core::CoreError),

    /// DuckDB driver error with preserved source chain (S013).
    #[error("[S013] DuckDB error")]
    DuckDb(#[source] duckdb::Error),
}

/// Result type alias for [`StateError`].
pub type StateResult<T> = Result<T, StateError>;

impl From<duckdb::Error> for StateError {
    fn from(err: duckdb::Error) -> Self {
        StateError::DuckDb(err)
    }
}
