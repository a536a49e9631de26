//! Orchestration façade over one project.
//!
//! A [`Context`] holds one immutable generation of the project's models and
//! the collaborators every operation needs: the state store, the warehouse
//! evaluator, and the console progress is reported to.

use crate::console::Console;
use crate::context_diff::ContextDiff;
use crate::error::{EngineError, EngineResult};
use crate::janitor::{Janitor, JanitorReport};
use crate::plan::{ModelTestRunner, Plan, PlanOptions};
use crate::plan_evaluator::PlanEvaluator;
use crate::scheduler::{Batch, RunReport, Scheduler, SnapshotAuditResult};
use qy_core::time::{day_start, now_ms, parse_end, parse_latest, parse_start};
use qy_core::{
    Config, CoreError, Environment, FingerprintCache, Interval, Model, ModelName, Project,
    ProjectModels, Snapshot, SnapshotId, Timestamp, PROD,
};
use qy_db::{DuckDbBackend, QueryResult, SnapshotEvaluator, SnapshotsByName};
use qy_state::{DuckDbStateStore, StateError, StateSync};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::Arc;

/// Build unversioned candidate snapshots for every model.
pub fn candidate_snapshots(
    models: &BTreeMap<ModelName, Model>,
    physical_schema: &str,
    ttl_ms: i64,
    now: Timestamp,
) -> EngineResult<BTreeMap<ModelName, Snapshot>> {
    let fingerprints = FingerprintCache::new().fingerprint_all(models)?;
    models
        .iter()
        .map(|(name, model)| {
            let fingerprint =
                fingerprints
                    .get(name)
                    .cloned()
                    .ok_or_else(|| CoreError::ModelNotFound {
                        name: name.to_string(),
                    })?;
            let parents = model
                .depends_on
                .iter()
                .filter_map(|dep| {
                    fingerprints
                        .get(dep)
                        .map(|fp| SnapshotId::new(dep.clone(), fp.to_identifier()))
                })
                .collect();
            let snapshot =
                Snapshot::from_model(model, fingerprint, parents, physical_schema, ttl_ms, now);
            Ok((name.clone(), snapshot))
        })
        .collect()
}

/// Entry point for every lifecycle operation of one project.
pub struct Context {
    config: Config,
    models: Arc<ProjectModels>,
    state: Arc<dyn StateSync>,
    evaluator: Arc<dyn SnapshotEvaluator>,
    console: Arc<dyn Console>,
    test_runner: Option<Arc<dyn ModelTestRunner>>,
}

impl Context {
    /// Create a context, initializing the state store on first use.
    pub fn new(
        config: Config,
        models: ProjectModels,
        state: Arc<dyn StateSync>,
        evaluator: Arc<dyn SnapshotEvaluator>,
        console: Arc<dyn Console>,
    ) -> EngineResult<Self> {
        if state.get_versions(false)? == 0 {
            log::info!("Initializing state store");
            state.migrate()?;
        }
        Ok(Self {
            config,
            models: Arc::new(models),
            state,
            evaluator,
            console,
            test_runner: None,
        })
    }

    /// Open the DuckDB state store and warehouse a project is configured for.
    pub fn open(project: Project, console: Arc<dyn Console>) -> EngineResult<Self> {
        let state: Arc<dyn StateSync> = match project.config.state_path_absolute(&project.root) {
            Some(path) => Arc::new(DuckDbStateStore::open(&path)?),
            None => Arc::new(DuckDbStateStore::open_memory()?),
        };
        let evaluator: Arc<dyn SnapshotEvaluator> =
            match project.config.warehouse_path_absolute(&project.root) {
                Some(path) => Arc::new(DuckDbBackend::from_path(&path)?),
                None => Arc::new(DuckDbBackend::in_memory()?),
            };
        Self::new(project.config, project.models, state, evaluator, console)
    }

    pub fn with_test_runner(mut self, runner: Arc<dyn ModelTestRunner>) -> Self {
        self.test_runner = Some(runner);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The current model generation.
    pub fn models(&self) -> Arc<ProjectModels> {
        Arc::clone(&self.models)
    }

    pub fn state(&self) -> &Arc<dyn StateSync> {
        &self.state
    }

    pub fn evaluator(&self) -> &Arc<dyn SnapshotEvaluator> {
        &self.evaluator
    }

    /// Swap in a new model generation.
    pub fn reload(&mut self, models: ProjectModels) {
        log::debug!("Reloaded {} models", models.len());
        self.models = Arc::new(models);
    }

    /// Snapshots of the current models; stored instances replace equal
    /// candidates.
    pub fn snapshots(&self) -> EngineResult<BTreeMap<ModelName, Snapshot>> {
        let candidates = candidate_snapshots(
            self.models.models(),
            &self.config.physical_schema,
            self.config.snapshot_ttl_ms(),
            now_ms(),
        )?;
        let ids: Vec<SnapshotId> = candidates.values().map(Snapshot::snapshot_id).collect();
        let stored = self.state.get_snapshots(&ids)?;
        Ok(candidates
            .into_iter()
            .map(|(name, candidate)| {
                let snapshot = stored
                    .get(&candidate.snapshot_id())
                    .cloned()
                    .unwrap_or(candidate);
                (name, snapshot)
            })
            .collect())
    }

    /// Compare the project with `environment`.
    pub fn diff(
        &self,
        environment: Option<&str>,
        create_from: Option<&str>,
    ) -> EngineResult<ContextDiff> {
        let environment = self.config.resolve_environment(environment)?;
        let diff = ContextDiff::create(
            &environment,
            self.snapshots()?,
            create_from.unwrap_or(PROD),
            &*self.state,
        )?;
        self.console.show_diff(&diff);
        Ok(diff)
    }

    /// Build a plan for `environment`.
    ///
    /// Categorizer mode and environment TTL come from the configuration.
    pub fn plan(&self, environment: Option<&str>, mut options: PlanOptions) -> EngineResult<Plan> {
        let environment = self.config.resolve_environment(environment)?;
        options.categorizer = self.config.auto_categorize_changes;
        options.environment_ttl_ms = self.config.environment_ttl_ms();
        options.validate(&environment)?;

        let diff = ContextDiff::create(
            &environment,
            self.snapshots()?,
            options.create_from.as_deref().unwrap_or(PROD),
            &*self.state,
        )?;
        self.console.show_diff(&diff);
        Plan::new(diff, &*self.state, options, self.test_runner.as_deref())
    }

    /// Apply `plan`; nothing happens when it neither changes nor backfills
    /// anything.
    pub async fn apply(&self, plan: &Plan) -> EngineResult<RunReport> {
        if !plan.has_changes() && !plan.requires_backfill() {
            self.console.log_status_update(&format!(
                "Environment '{}' is up to date",
                plan.environment_name()
            ));
            return Ok(RunReport::default());
        }

        let evaluator = PlanEvaluator::new(
            Arc::clone(&self.state),
            Arc::clone(&self.evaluator),
            Arc::clone(&self.console),
            self.config.concurrent_tasks,
        );
        let report = evaluator.evaluate(plan).await?;
        self.console.log_success(&format!(
            "Environment '{}' updated: {}",
            plan.environment_name(),
            report.summary()
        ));
        Ok(report)
    }

    /// Backfill whatever an environment's snapshots are missing, then sweep
    /// expired objects unless `skip_janitor` is set.
    pub async fn run(
        &self,
        environment: Option<&str>,
        start: Option<&str>,
        end: Option<&str>,
        latest: Option<&str>,
        skip_janitor: bool,
    ) -> EngineResult<RunReport> {
        let record = self.environment(environment)?;
        let now = now_ms();
        let start = match start {
            Some(value) => parse_start(value, now)?,
            None => record.start_at,
        };
        let end = match end {
            Some(value) => parse_end(value, now)?,
            None => day_start(now),
        };
        let latest = match latest {
            Some(value) => parse_latest(value, now)?,
            None => end,
        };

        let scheduler = Scheduler::new(
            self.environment_snapshots(&record)?,
            Arc::clone(&self.state),
            Arc::clone(&self.evaluator),
            Arc::clone(&self.console),
            self.config.concurrent_tasks,
        );
        let report = scheduler
            .run(&record.name, start, end, latest, record.is_dev())
            .await?;
        if !report.is_success() {
            return Err(EngineError::Backfill(Box::new(report)));
        }

        if !skip_janitor {
            self.janitor().await?;
        }
        Ok(report)
    }

    /// Run the audits of an environment's models over `[start, end)`.
    ///
    /// An empty `models` selects every model.
    pub async fn audit(
        &self,
        environment: Option<&str>,
        start: &str,
        end: &str,
        models: &[String],
    ) -> EngineResult<Vec<SnapshotAuditResult>> {
        let record = self.environment(environment)?;
        let now = now_ms();
        let interval = Interval::new(parse_start(start, now)?, parse_end(end, now)?)?;
        let snapshots = self.environment_snapshots(&record)?;

        let mut results = Vec::new();
        for (name, snapshot) in &snapshots {
            if !models.is_empty() && !models.iter().any(|m| name == m) {
                continue;
            }
            if !snapshot.model.kind.is_materialized() {
                continue;
            }
            let audits = self
                .evaluator
                .audit(snapshot, interval, interval.end, &snapshots, record.is_dev())
                .await?;
            results.extend(audits.into_iter().map(|result| SnapshotAuditResult {
                batch: Batch {
                    name: name.clone(),
                    interval,
                },
                result,
            }));
        }
        Ok(results)
    }

    /// Render and run a model's query without writing anything.
    pub async fn evaluate(
        &self,
        model: &str,
        start: &str,
        end: &str,
        latest: Option<&str>,
        limit: usize,
    ) -> EngineResult<QueryResult> {
        let now = now_ms();
        let interval = Interval::new(parse_start(start, now)?, parse_end(end, now)?)?;
        let latest = match latest {
            Some(value) => parse_latest(value, now)?,
            None => interval.end,
        };
        let snapshots: SnapshotsByName = self.snapshots()?;
        let snapshot = snapshots.get(model).ok_or_else(|| CoreError::ModelNotFound {
            name: model.to_string(),
        })?;
        let result = self
            .evaluator
            .evaluate(snapshot, interval, latest, &snapshots, false, Some(limit))
            .await?;
        Ok(result.unwrap_or_default())
    }

    /// Physical table an environment reads `model` from.
    pub fn table(&self, model: &str, environment: Option<&str>) -> EngineResult<String> {
        let record = self.environment(environment)?;
        record
            .get(model)
            .map(|info| info.table_name(record.is_dev()))
            .ok_or_else(|| {
                CoreError::ModelNotFound {
                    name: model.to_string(),
                }
                .into()
            })
    }

    /// Remove expired environments and snapshots.
    pub async fn janitor(&self) -> EngineResult<JanitorReport> {
        Janitor::new(
            Arc::clone(&self.state),
            Arc::clone(&self.evaluator),
            Arc::clone(&self.console),
        )
        .run(now_ms())
        .await
    }

    /// Expire an environment now; the next janitor sweep tears it down.
    pub fn invalidate_environment(&self, environment: &str) -> EngineResult<()> {
        let record = self.environment(Some(environment))?;
        if record.name == PROD {
            return Err(EngineError::Config(
                "Cannot invalidate the production environment".into(),
            ));
        }
        self.state.invalidate_environment(&record.name)?;
        log::info!("Invalidated environment '{}'", record.name);
        Ok(())
    }

    pub fn migrate(&self) -> EngineResult<()> {
        self.state.migrate()?;
        Ok(())
    }

    /// The model graph in Graphviz DOT format.
    pub fn dag_dot(&self) -> String {
        self.models.dag().to_dot()
    }

    /// Render the model graph to `path` with Graphviz `dot`.
    pub fn render_dag(&self, path: &Path, format: &str) -> EngineResult<()> {
        let mut child = Command::new("dot")
            .arg(format!("-T{}", format))
            .arg("-o")
            .arg(path)
            .stdin(Stdio::piped())
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => EngineError::MissingDependency(
                    "Graphviz `dot` is required to render the DAG".into(),
                ),
                _ => EngineError::Io(e),
            })?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(self.dag_dot().as_bytes())?;
        }
        let status = child.wait()?;
        if !status.success() {
            return Err(EngineError::Io(std::io::Error::other(format!(
                "dot exited with {}",
                status
            ))));
        }
        Ok(())
    }

    fn environment(&self, environment: Option<&str>) -> EngineResult<Environment> {
        let name = self.config.resolve_environment(environment)?;
        self.state.get_environment(&name)?.ok_or_else(|| {
            EngineError::Config(format!(
                "Environment '{}' does not exist; create it with a plan",
                name
            ))
        })
    }

    fn environment_snapshots(&self, environment: &Environment) -> EngineResult<SnapshotsByName> {
        let stored = self.state.get_snapshots(&environment.snapshot_ids())?;
        environment
            .snapshots
            .iter()
            .map(|info| {
                let snapshot = stored.get(&info.snapshot_id()).cloned().ok_or_else(|| {
                    StateError::SnapshotNotFound {
                        id: info.snapshot_id().to_string(),
                    }
                })?;
                Ok((info.name.clone(), snapshot))
            })
            .collect()
    }
}

#[cfg(test)]
#[path = "context_test.rs"]
mod tests;
