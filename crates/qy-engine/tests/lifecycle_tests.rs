//! End-to-end lifecycle scenarios: plan, apply, change, promote, sweep.

use qy_core::time::parse_start;
use qy_core::{ChangeCategory, Config, Model, ModelKind, ModelName, ProjectModels, Timestamp, PROD};
use qy_db::sql_utils::quote_qualified;
use qy_db::{DuckDbBackend, SnapshotEvaluator};
use qy_engine::{Context, EngineError, Janitor, NoopConsole, PlanOptions, RunReport};
use qy_state::{DuckDbStateStore, StateError, StateReader, StateSync};
use std::sync::Arc;

fn ts(value: &str) -> Timestamp {
    parse_start(value, 0).unwrap()
}

fn model_a() -> Model {
    Model::new("db.a", ModelKind::Full, "SELECT 1 AS id")
}

fn model_b(query: &str) -> Model {
    Model::new("db.b", ModelKind::Full, query).with_depends_on(["db.a"])
}

fn options() -> PlanOptions {
    PlanOptions {
        start: Some("2024-01-01".into()),
        end: Some("2024-01-01".into()),
        now: Some(ts("2024-02-01")),
        ..PlanOptions::default()
    }
}

struct Project {
    context: Context,
    state: Arc<DuckDbStateStore>,
    warehouse: Arc<DuckDbBackend>,
}

impl Project {
    fn new(models: Vec<Model>) -> Self {
        let state = Arc::new(DuckDbStateStore::open_memory().unwrap());
        let warehouse = Arc::new(DuckDbBackend::in_memory().unwrap());
        let context = Context::new(
            Config::new("lifecycle"),
            ProjectModels::new(models).unwrap(),
            state.clone(),
            warehouse.clone(),
            Arc::new(NoopConsole),
        )
        .unwrap();
        Self {
            context,
            state,
            warehouse,
        }
    }

    fn edit(&mut self, models: Vec<Model>) {
        self.context.reload(ProjectModels::new(models).unwrap());
    }

    async fn ids(&self, view: &str) -> Vec<Vec<String>> {
        self.warehouse
            .query_rows(&format!("SELECT id FROM {}", quote_qualified(view)))
            .await
            .unwrap()
            .rows
    }

    async fn exists(&self, relation: &str) -> bool {
        self.warehouse.relation_exists(relation).await.unwrap()
    }

    fn janitor(&self) -> Janitor {
        Janitor::new(
            Arc::clone(self.context.state()),
            Arc::clone(self.context.evaluator()),
            Arc::new(NoopConsole),
        )
    }
}

fn names(set: impl IntoIterator<Item = impl AsRef<str>>) -> Vec<String> {
    set.into_iter().map(|n| n.as_ref().to_string()).collect()
}

// ── Develop, change, promote, sweep ─────────────────────────────────────

#[tokio::test]
async fn test_full_lifecycle() {
    let mut project = Project::new(vec![model_a(), model_b("SELECT id FROM {{ ref('db.a') }}")]);

    // Initial plan into dev adds both models.
    let plan = project.context.plan(Some("dev"), options()).unwrap();
    assert_eq!(names(&plan.context_diff.added), ["db.a", "db.b"]);
    assert!(plan.context_diff.is_new_environment);
    project.context.apply(&plan).await.unwrap();
    assert_eq!(project.ids("db__dev.b").await, [["1"]]);

    // Nothing changed: the next plan is empty and applying it is a no-op.
    let unchanged = project.context.plan(Some("dev"), options()).unwrap();
    assert!(!unchanged.has_changes());
    assert!(!unchanged.requires_backfill());
    assert_eq!(
        project.context.apply(&unchanged).await.unwrap(),
        RunReport::default()
    );

    // Editing B's query touches B alone; A's snapshot is reused.
    let deployed_a = project
        .state
        .get_environment("dev")
        .unwrap()
        .unwrap()
        .get("db.a")
        .unwrap()
        .clone();
    project.edit(vec![model_a(), model_b("SELECT id + 1 AS id FROM {{ ref('db.a') }}")]);
    let mut plan = project.context.plan(Some("dev"), options()).unwrap();
    assert_eq!(names(plan.context_diff.modified.keys()), ["db.b"]);
    assert!(plan.context_diff.added.is_empty());
    let a = &plan.context_diff.snapshots["db.a"];
    assert_eq!(a.identifier(), deployed_a.identifier);
    assert!(!plan.context_diff.new_snapshot_ids.contains(&a.snapshot_id()));
    assert_eq!(plan.uncategorized(), [ModelName::from("db.b")]);

    plan.set_choice("db.b", ChangeCategory::Breaking, &*project.state)
        .unwrap();
    project.context.apply(&plan).await.unwrap();
    assert_eq!(project.ids("db__dev.b").await, [["2"]]);

    // Applying the same plan again converges on the same state.
    project.context.apply(&plan).await.unwrap();
    assert_eq!(project.ids("db__dev.b").await, [["2"]]);
    let dev = project.state.get_environment("dev").unwrap().unwrap();
    assert_eq!(dev.plan_id, plan.plan_id);
    assert!(dev.finalized_ts.is_some());

    // Promoting to production reuses the dev tables without backfill.
    let promote = project.context.plan(Some(PROD), options()).unwrap();
    assert!(promote.new_snapshots().is_empty());
    assert!(!promote.requires_backfill());
    let report = project.context.apply(&promote).await.unwrap();
    assert!(report.completed.is_empty());
    assert_eq!(project.ids("db.b").await, [["2"]]);
    let prod = project.state.get_environment(PROD).unwrap().unwrap();
    assert_eq!(prod.snapshots, dev.snapshots);
    assert_eq!(prod.expiration_ts, None);

    // Once dev expires, the janitor drops it and B's first version.
    let report = project.janitor().run(ts("2100-01-01")).await.unwrap();
    assert_eq!(report.environments, ["dev"]);
    assert_eq!(report.snapshots.len(), 1);
    assert_eq!(report.snapshots[0].name, "db.b");
    assert!(!project.exists("db__dev.b").await);
    assert_eq!(project.ids("db.b").await, [["2"]]);
    for info in &prod.snapshots {
        assert!(project.exists(&info.table_name(false)).await);
    }
}

// ── Concurrent plans ────────────────────────────────────────────────────

#[tokio::test]
async fn test_stale_plan_is_rejected() {
    let mut project = Project::new(vec![model_a()]);
    let first = project.context.plan(Some(PROD), options()).unwrap();
    project.context.apply(&first).await.unwrap();

    project.edit(vec![Model::new("db.a", ModelKind::Full, "SELECT 1 AS id, 2 AS extra")]);
    let mut forward_only = options();
    forward_only.forward_only = true;
    let left = project.context.plan(Some(PROD), forward_only.clone()).unwrap();
    let right = project.context.plan(Some(PROD), forward_only).unwrap();
    assert_ne!(left.plan_id, right.plan_id);

    project.context.apply(&left).await.unwrap();
    let err = project.context.apply(&right).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::State(StateError::PlanConflict { .. })
    ));
    let prod = project.state.get_environment(PROD).unwrap().unwrap();
    assert_eq!(prod.plan_id, left.plan_id);
}

// ── Incremental history ─────────────────────────────────────────────────

#[tokio::test]
async fn test_incremental_model_keeps_history_across_runs() {
    let events = Model::new(
        "db.events",
        ModelKind::Incremental {
            time_column: "ds".into(),
        },
        "SELECT CAST('{{ start_ds }}' AS DATE) AS ds, 1 AS v",
    )
    .with_start("2024-01-01");
    let project = Project::new(vec![events]);

    let mut first = options();
    first.end = Some("2024-01-03".into());
    let plan = project.context.plan(Some(PROD), first).unwrap();
    assert_eq!(plan.batches()["db.events"].len(), 3);
    let report = project.context.apply(&plan).await.unwrap();
    assert_eq!(report.completed.len(), 3);

    let report = project
        .context
        .run(Some(PROD), None, Some("2024-01-05"), None, true)
        .await
        .unwrap();
    assert_eq!(report.completed.len(), 2);
    assert_eq!(
        project
            .warehouse
            .query_count("SELECT * FROM db.events")
            .await
            .unwrap(),
        5
    );

    // Restating recomputes the requested range without duplicating rows.
    let mut restate = options();
    restate.end = Some("2024-01-02".into());
    restate.restate_models = vec!["db.events".into()];
    let plan = project.context.plan(Some(PROD), restate).unwrap();
    assert!(!plan.has_changes());
    assert_eq!(plan.missing_intervals()["db.events"].len(), 2);
    project.context.apply(&plan).await.unwrap();
    assert_eq!(
        project
            .warehouse
            .query_count("SELECT * FROM db.events")
            .await
            .unwrap(),
        5
    );
}

#[tokio::test]
async fn test_state_survives_reopening_files() {
    let dir = tempfile::tempdir().unwrap();
    let state_path = dir.path().join("state.duckdb");
    let warehouse_path = dir.path().join("warehouse.duckdb");

    let open = || {
        let state: Arc<dyn StateSync> = Arc::new(DuckDbStateStore::open(&state_path).unwrap());
        let warehouse: Arc<dyn SnapshotEvaluator> =
            Arc::new(DuckDbBackend::from_path(&warehouse_path).unwrap());
        Context::new(
            Config::new("files"),
            ProjectModels::new(vec![model_a()]).unwrap(),
            state,
            warehouse,
            Arc::new(NoopConsole),
        )
        .unwrap()
    };

    {
        let context = open();
        let plan = context.plan(Some(PROD), options()).unwrap();
        context.apply(&plan).await.unwrap();
    }

    let context = open();
    let plan = context.plan(Some(PROD), options()).unwrap();
    assert!(!plan.has_changes());
    assert!(!plan.requires_backfill());
    assert!(context.state().get_environment(PROD).unwrap().is_some());
}
