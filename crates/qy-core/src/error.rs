//! Error types for qy-core

use thiserror::Error;

/// Core error type for Quarry
#[derive(Error, Debug)]
pub enum CoreError {
    /// E001: Configuration file not found
    #[error("[E001] Config file not found: {path}")]
    ConfigNotFound { path: String },

    /// E002: Invalid configuration value
    #[error("[E002] Invalid config: {message}")]
    ConfigInvalid { message: String },

    /// E003: Model not found
    #[error("[E003] Model not found: {name}")]
    ModelNotFound { name: String },

    /// E004: Upstream dependency cannot be resolved within the supplied model set
    #[error("[E004] Model '{model}' depends on '{dependency}', which is not part of the model set")]
    UnresolvedDependency { model: String, dependency: String },

    /// E005: Circular dependency detected
    #[error("[E005] Circular dependency detected: {cycle}")]
    CircularDependency { cycle: String },

    /// E006: Duplicate model name
    #[error("[E006] Duplicate model name: {name}")]
    DuplicateModel { name: String },

    /// E007: Empty name where a non-empty one is required
    #[error("[E007] Empty name in {context}")]
    EmptyName { context: String },

    /// E008: Invalid time expression
    #[error("[E008] Invalid time '{value}': expected YYYY-MM-DD, YYYY-MM-DDTHH:MM:SS, now, today or yesterday")]
    InvalidTime { value: String },

    /// E009: Invalid interval bounds
    #[error("[E009] Invalid interval: start {start} is not before end {end}")]
    InvalidInterval { start: i64, end: i64 },

    /// E010: Model definition file could not be parsed
    #[error("[E010] Failed to parse model file {path}: {details}")]
    ModelParseError { path: String, details: String },

    /// E011: IO error
    #[error("[E011] IO error: {0}")]
    Io(#[from] std::io::Error),

    /// E012: IO error with file path context
    #[error("[E012] Failed to read '{path}': {source}")]
    IoWithPath {
        path: String,
        source: std::io::Error,
    },

    /// E013: YAML parse error
    #[error("[E013] YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for CoreError
pub type CoreResult<T> = Result<T, CoreError>;
