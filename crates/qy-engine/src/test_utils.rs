//! Shared fixtures for engine tests.
//!
//! Every harness runs against an in-memory state store and an in-memory
//! DuckDB warehouse, so tests never touch the filesystem.

use crate::console::NoopConsole;
use crate::context::{candidate_snapshots, Context};
use crate::plan::PlanOptions;
use qy_core::time::{parse_start, DAY_MS};
use qy_core::{ChangeCategory, Config, Model, ModelKind, ModelName, ProjectModels, Snapshot, Timestamp};
use qy_db::sql_utils::quote_qualified;
use qy_db::{DuckDbBackend, SnapshotEvaluator, SnapshotsByName};
use qy_state::{DuckDbStateStore, StateSync};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Reference time every plan in the tests is built at.
pub(crate) const NOW: &str = "2024-02-01";

pub(crate) fn ts(value: &str) -> Timestamp {
    parse_start(value, 0).unwrap()
}

pub(crate) fn full(name: &str, query: &str) -> Model {
    Model::new(name, ModelKind::Full, query)
}

/// Incremental model producing one row per day of its interval.
pub(crate) fn daily(name: &str, value: i64) -> Model {
    Model::new(
        name,
        ModelKind::Incremental {
            time_column: "ds".into(),
        },
        format!("SELECT CAST('{{{{ start_ds }}}}' AS DATE) AS ds, {} AS v", value),
    )
    .with_start("2024-01-01")
}

/// Plan options over `[start, end]` (both inclusive days) at [`NOW`].
pub(crate) fn options(start: &str, end: &str) -> PlanOptions {
    PlanOptions {
        start: Some(start.into()),
        end: Some(end.into()),
        now: Some(ts(NOW)),
        ..PlanOptions::default()
    }
}

/// Categorized snapshots of `models`, as a plan would produce them.
pub(crate) fn breaking_snapshots(models: Vec<Model>) -> SnapshotsByName {
    let project = ProjectModels::new(models).unwrap();
    let mut snapshots: BTreeMap<ModelName, Snapshot> =
        candidate_snapshots(project.models(), "quarry", DAY_MS, ts(NOW)).unwrap();
    for snapshot in snapshots.values_mut() {
        snapshot.categorize(ChangeCategory::Breaking, false);
    }
    snapshots
}

pub(crate) fn state_store() -> Arc<DuckDbStateStore> {
    let store = DuckDbStateStore::open_memory().unwrap();
    store.migrate().unwrap();
    Arc::new(store)
}

pub(crate) fn warehouse() -> Arc<DuckDbBackend> {
    Arc::new(DuckDbBackend::in_memory().unwrap())
}

/// A context plus typed handles on its collaborators.
pub(crate) struct Harness {
    pub context: Context,
    pub state: Arc<DuckDbStateStore>,
    pub warehouse: Arc<DuckDbBackend>,
}

impl Harness {
    pub fn new(models: Vec<Model>) -> Self {
        Self::with_config(Config::new("test"), models)
    }

    pub fn with_config(config: Config, models: Vec<Model>) -> Self {
        let state = Arc::new(DuckDbStateStore::open_memory().unwrap());
        let warehouse = warehouse();
        let state_sync: Arc<dyn StateSync> = state.clone();
        let evaluator: Arc<dyn SnapshotEvaluator> = warehouse.clone();
        let context = Context::new(
            config,
            ProjectModels::new(models).unwrap(),
            state_sync,
            evaluator,
            Arc::new(NoopConsole),
        )
        .unwrap();
        Self {
            context,
            state,
            warehouse,
        }
    }

    pub fn reload(&mut self, models: Vec<Model>) {
        self.context.reload(ProjectModels::new(models).unwrap());
    }

    pub async fn count(&self, relation: &str) -> usize {
        self.warehouse
            .query_count(&format!("SELECT * FROM {}", quote_qualified(relation)))
            .await
            .unwrap()
    }

    pub async fn exists(&self, relation: &str) -> bool {
        self.warehouse.relation_exists(relation).await.unwrap()
    }
}
