//! Configuration types and parsing for quarry.yml

use crate::categorizer::CategorizerConfig;
use crate::error::{CoreError, CoreResult};
use crate::snapshot::PROD;
use crate::time::days_to_ms;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable consulted when no environment is given explicitly.
pub const ENVIRONMENT_VAR: &str = "QY_ENVIRONMENT";

/// Main project configuration from quarry.yml
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Project name
    pub name: String,

    /// Directories containing model YAML files
    #[serde(default = "default_model_paths")]
    pub model_paths: Vec<String>,

    /// Schema holding versioned physical tables
    #[serde(default = "default_physical_schema")]
    pub physical_schema: String,

    /// Days an unreferenced snapshot is kept before the janitor removes it
    #[serde(default = "default_ttl_days")]
    pub snapshot_ttl_days: u32,

    /// Days a development environment lives after its last plan
    #[serde(default = "default_ttl_days")]
    pub environment_ttl_days: u32,

    /// Environment used when none is given
    #[serde(default = "default_environment")]
    pub default_environment: String,

    /// Upper bound on concurrently executing backfill tasks
    #[serde(default = "default_concurrent_tasks")]
    pub concurrent_tasks: usize,

    /// Automatic change categorization
    #[serde(default)]
    pub auto_categorize_changes: CategorizerConfig,

    /// Where the state store lives
    #[serde(default)]
    pub state: StateConfig,

    /// Where models are materialized
    #[serde(default)]
    pub warehouse: WarehouseConfig,
}

/// State store location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StateConfig {
    /// DuckDB file path, relative to the project root, or `:memory:`
    #[serde(default = "default_state_path")]
    pub path: String,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: default_state_path(),
        }
    }
}

/// Warehouse connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WarehouseConfig {
    /// DuckDB file path, relative to the project root, or `:memory:`
    #[serde(default = "default_warehouse_path")]
    pub path: String,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            path: default_warehouse_path(),
        }
    }
}

const MEMORY_PATH: &str = ":memory:";

fn default_model_paths() -> Vec<String> {
    vec!["models".to_string()]
}

fn default_physical_schema() -> String {
    "quarry".to_string()
}

fn default_ttl_days() -> u32 {
    7
}

fn default_environment() -> String {
    PROD.to_string()
}

fn default_concurrent_tasks() -> usize {
    4
}

fn default_state_path() -> String {
    ".quarry/state.duckdb".to_string()
}

fn default_warehouse_path() -> String {
    "warehouse.duckdb".to_string()
}

impl Config {
    /// Configuration with every default, for a project called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model_paths: default_model_paths(),
            physical_schema: default_physical_schema(),
            snapshot_ttl_days: default_ttl_days(),
            environment_ttl_days: default_ttl_days(),
            default_environment: default_environment(),
            concurrent_tasks: default_concurrent_tasks(),
            auto_categorize_changes: CategorizerConfig::default(),
            state: StateConfig::default(),
            warehouse: WarehouseConfig::default(),
        }
    }

    /// Load configuration from a file path
    pub fn load(path: &Path) -> CoreResult<Self> {
        if !path.exists() {
            return Err(CoreError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| CoreError::IoWithPath {
            path: path.display().to_string(),
            source: e,
        })?;
        let config: Config = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a project directory
    pub fn load_from_dir(dir: &Path) -> CoreResult<Self> {
        let yml_path = dir.join("quarry.yml");
        let yaml_path = dir.join("quarry.yaml");

        if yml_path.exists() {
            Self::load(&yml_path)
        } else if yaml_path.exists() {
            Self::load(&yaml_path)
        } else {
            Err(CoreError::ConfigNotFound {
                path: yml_path.display().to_string(),
            })
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> CoreResult<()> {
        if self.name.trim().is_empty() {
            return Err(CoreError::ConfigInvalid {
                message: "Project name cannot be empty".to_string(),
            });
        }
        if self.model_paths.is_empty() {
            return Err(CoreError::ConfigInvalid {
                message: "At least one model_paths entry must be specified".to_string(),
            });
        }
        if self.physical_schema.trim().is_empty() {
            return Err(CoreError::ConfigInvalid {
                message: "physical_schema cannot be empty".to_string(),
            });
        }
        if self.concurrent_tasks == 0 {
            return Err(CoreError::ConfigInvalid {
                message: "concurrent_tasks must be at least 1".to_string(),
            });
        }
        crate::environment::normalize_name(&self.default_environment)?;
        Ok(())
    }

    /// Get absolute model paths relative to a project root
    pub fn model_paths_absolute(&self, root: &Path) -> Vec<PathBuf> {
        self.model_paths.iter().map(|p| root.join(p)).collect()
    }

    /// State store path relative to `root`, or `None` for an in-memory store.
    pub fn state_path_absolute(&self, root: &Path) -> Option<PathBuf> {
        resolve_db_path(&self.state.path, root)
    }

    /// Warehouse path relative to `root`, or `None` for an in-memory database.
    pub fn warehouse_path_absolute(&self, root: &Path) -> Option<PathBuf> {
        resolve_db_path(&self.warehouse.path, root)
    }

    pub fn snapshot_ttl_ms(&self) -> i64 {
        days_to_ms(self.snapshot_ttl_days)
    }

    pub fn environment_ttl_ms(&self) -> i64 {
        days_to_ms(self.environment_ttl_days)
    }

    /// Resolve the environment from a CLI flag or `QY_ENVIRONMENT`.
    ///
    /// Priority: CLI flag > QY_ENVIRONMENT env var > `default_environment`
    pub fn resolve_environment(&self, cli_environment: Option<&str>) -> CoreResult<String> {
        let raw = cli_environment
            .map(String::from)
            .or_else(|| std::env::var(ENVIRONMENT_VAR).ok())
            .unwrap_or_else(|| self.default_environment.clone());
        crate::environment::normalize_name(&raw)
    }
}

fn resolve_db_path(path: &str, root: &Path) -> Option<PathBuf> {
    if path == MEMORY_PATH {
        None
    } else {
        Some(root.join(path))
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
