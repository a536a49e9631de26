//! Project discovery and loading
//!
//! A project is a `quarry.yml` plus one YAML file per model. The loaded model
//! set is an immutable generation: reloading produces a new [`ProjectModels`]
//! value instead of mutating the current one.

use crate::config::Config;
use crate::dag::ModelDag;
use crate::error::{CoreError, CoreResult};
use crate::model::{Model, ModelKind};
use crate::model_name::ModelName;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// One immutable generation of a project's models and their graph.
#[derive(Debug, Clone, Default)]
pub struct ProjectModels {
    models: BTreeMap<ModelName, Model>,
    dag: ModelDag,
}

impl ProjectModels {
    /// Assemble a generation, resolving which declared dependencies are
    /// models and which are external tables.
    pub fn new(models: Vec<Model>) -> CoreResult<Self> {
        let mut by_name: BTreeMap<ModelName, Model> = BTreeMap::new();
        for model in models {
            model.validate()?;
            if by_name.contains_key(&model.name) {
                return Err(CoreError::DuplicateModel {
                    name: model.name.to_string(),
                });
            }
            by_name.insert(model.name.clone(), model);
        }

        let names: Vec<ModelName> = by_name.keys().cloned().collect();
        for model in by_name.values_mut() {
            let (internal, external): (Vec<_>, Vec<_>) = std::mem::take(&mut model.depends_on)
                .into_iter()
                .partition(|dep| names.binary_search(dep).is_ok());
            model.depends_on = internal.into_iter().collect();
            model
                .external_deps
                .extend(external.into_iter().map(ModelName::into_inner));
        }

        let dag = ModelDag::from_models(by_name.values())?;
        Ok(Self {
            models: by_name,
            dag,
        })
    }

    pub fn get(&self, name: &str) -> Option<&Model> {
        self.models.get(name)
    }

    pub fn models(&self) -> &BTreeMap<ModelName, Model> {
        &self.models
    }

    pub fn dag(&self) -> &ModelDag {
        &self.dag
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Models in dependency order.
    pub fn topological(&self) -> CoreResult<Vec<&Model>> {
        self.dag
            .topological_order()?
            .iter()
            .map(|name| {
                self.models.get(name).ok_or_else(|| CoreError::ModelNotFound {
                    name: name.to_string(),
                })
            })
            .collect()
    }
}

/// Represents a Quarry project on disk
#[derive(Debug)]
pub struct Project {
    /// Project root directory
    pub root: PathBuf,

    /// Project configuration
    pub config: Config,

    /// Models discovered in the project
    pub models: ProjectModels,
}

impl Project {
    /// Load a project from a directory
    pub fn load(path: &Path) -> CoreResult<Self> {
        let root = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()?.join(path)
        };

        let config = Config::load_from_dir(&root)?;
        let models = Self::discover_models(&root, &config)?;
        log::debug!("Loaded {} models from {}", models.len(), root.display());

        Ok(Self {
            root,
            config,
            models,
        })
    }

    /// Re-read the model files, producing a new generation.
    pub fn reload_models(&self) -> CoreResult<ProjectModels> {
        Self::discover_models(&self.root, &self.config)
    }

    fn discover_models(root: &Path, config: &Config) -> CoreResult<ProjectModels> {
        let mut models = Vec::new();
        for model_path in config.model_paths_absolute(root) {
            if !model_path.exists() {
                continue;
            }
            discover_models_recursive(&model_path, &config.name, &mut models)?;
        }
        ProjectModels::new(models)
    }
}

fn discover_models_recursive(dir: &Path, project: &str, models: &mut Vec<Model>) -> CoreResult<()> {
    let mut entries = std::fs::read_dir(dir)
        .map_err(|e| CoreError::IoWithPath {
            path: dir.display().to_string(),
            source: e,
        })?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| CoreError::IoWithPath {
            path: dir.display().to_string(),
            source: e,
        })?;
    entries.sort_by_key(|e| e.path());

    for entry in entries {
        let path = entry.path();
        if path.is_dir() {
            discover_models_recursive(&path, project, models)?;
        } else if path.extension().is_some_and(|e| e == "yml" || e == "yaml") {
            models.push(load_model_file(&path, project)?);
        }
    }
    Ok(())
}

/// Parse a single model file.
///
/// An empty `query` is read from a `.sql` file with the same stem, and seed
/// paths are resolved against the model file's directory.
pub fn load_model_file(path: &Path, project: &str) -> CoreResult<Model> {
    let content = std::fs::read_to_string(path).map_err(|e| CoreError::IoWithPath {
        path: path.display().to_string(),
        source: e,
    })?;
    let mut model: Model =
        serde_yaml::from_str(&content).map_err(|e| CoreError::ModelParseError {
            path: path.display().to_string(),
            details: e.to_string(),
        })?;

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    if model.query.trim().is_empty() {
        let sql_path = path.with_extension("sql");
        if sql_path.exists() {
            model.query = std::fs::read_to_string(&sql_path).map_err(|e| {
                CoreError::IoWithPath {
                    path: sql_path.display().to_string(),
                    source: e,
                }
            })?;
        }
    }
    if let ModelKind::Seed { path: seed_path } = &mut model.kind {
        if seed_path.is_relative() {
            *seed_path = dir.join(&*seed_path);
        }
    }

    model.project = project.to_string();
    model.path = path.to_path_buf();
    Ok(model)
}

#[cfg(test)]
#[path = "project_test.rs"]
mod tests;
