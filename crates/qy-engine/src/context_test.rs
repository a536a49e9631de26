use super::*;
use crate::test_utils::{daily, full, options, Harness};
use qy_core::{Audit, AuditKind};
use qy_state::StateReader;

fn a() -> Model {
    full("db.a", "SELECT 1 AS id")
}

fn b() -> Model {
    full("db.b", "SELECT id FROM {{ ref('db.a') }}").with_depends_on(["db.a"])
}

fn audited_events() -> Model {
    let mut events = daily("db.events", 1);
    events.audits = vec![Audit {
        name: "v_not_null".into(),
        kind: AuditKind::NotNull {
            columns: vec!["v".into()],
        },
        skip: false,
        blocking: true,
    }];
    events
}

async fn deployed(models: Vec<Model>, end: &str) -> Harness {
    let harness = Harness::new(models);
    let plan = harness
        .context
        .plan(Some(PROD), options("2024-01-01", end))
        .unwrap();
    harness.context.apply(&plan).await.unwrap();
    harness
}

#[test]
fn test_new_context_initializes_state() {
    let harness = Harness::new(vec![a()]);
    assert!(harness.context.state().get_versions(false).unwrap() > 0);
    assert_eq!(harness.context.models().len(), 1);
    assert_eq!(harness.context.config().name, "test");
}

#[test]
fn test_plan_needs_models() {
    let harness = Harness::new(Vec::new());
    let err = harness
        .context
        .plan(Some("dev"), options("2024-01-01", "2024-01-01"))
        .unwrap_err();
    assert!(matches!(err, EngineError::Config(_)));
}

#[tokio::test]
async fn test_snapshots_prefer_stored_instances() {
    let harness = Harness::new(vec![a(), b()]);
    assert!(harness
        .context
        .snapshots()
        .unwrap()
        .values()
        .all(|s| !s.is_categorized()));

    let plan = harness
        .context
        .plan(Some("dev"), options("2024-01-01", "2024-01-01"))
        .unwrap();
    harness.context.apply(&plan).await.unwrap();

    let snapshots = harness.context.snapshots().unwrap();
    assert!(snapshots.values().all(Snapshot::is_categorized));
    assert_eq!(snapshots["db.a"].intervals.len(), 1);
}

#[tokio::test]
async fn test_apply_of_unchanged_environment_is_a_noop() {
    let harness = deployed(vec![a(), b()], "2024-01-01").await;
    let before = harness.state.get_environment(PROD).unwrap().unwrap();

    let plan = harness
        .context
        .plan(Some(PROD), options("2024-01-01", "2024-01-01"))
        .unwrap();
    assert!(!plan.has_changes());
    assert!(!plan.requires_backfill());

    let report = harness.context.apply(&plan).await.unwrap();
    assert_eq!(report, RunReport::default());
    let after = harness.state.get_environment(PROD).unwrap().unwrap();
    assert_eq!(after.plan_id, before.plan_id);
}

#[tokio::test]
async fn test_environment_matching_production_is_not_created() {
    let harness = deployed(vec![a(), b()], "2024-01-01").await;

    let plan = harness
        .context
        .plan(Some("dev"), options("2024-01-01", "2024-01-01"))
        .unwrap();
    assert!(plan.context_diff.is_new_environment);
    assert!(!plan.has_changes());
    assert!(!plan.requires_backfill());

    let report = harness.context.apply(&plan).await.unwrap();
    assert_eq!(report, RunReport::default());
    assert!(harness.state.get_environment("dev").unwrap().is_none());
    assert!(!harness.exists("db__dev.a").await);
}

#[tokio::test]
async fn test_invalidated_environment_is_removed_by_the_janitor() {
    let mut harness = deployed(vec![a(), b()], "2024-01-01").await;
    harness.reload(vec![a()]);
    let plan = harness
        .context
        .plan(Some("dev"), options("2024-01-01", "2024-01-01"))
        .unwrap();
    harness.context.apply(&plan).await.unwrap();
    assert!(harness.exists("db__dev.a").await);

    let err = harness.context.invalidate_environment(PROD).unwrap_err();
    assert!(matches!(err, EngineError::Config(_)));
    let err = harness.context.invalidate_environment("missing").unwrap_err();
    assert!(matches!(err, EngineError::Config(_)));

    harness.context.invalidate_environment("dev").unwrap();
    let report = harness.context.janitor().await.unwrap();

    assert_eq!(report.environments, vec!["dev".to_string()]);
    assert!(harness.state.get_environment("dev").unwrap().is_none());
    assert!(!harness.exists("db__dev.a").await);
    assert!(harness.state.get_environment(PROD).unwrap().is_some());
    assert_eq!(harness.count("db.b").await, 1);
}

#[tokio::test]
async fn test_run_requires_an_existing_environment() {
    let harness = Harness::new(vec![a()]);
    let err = harness
        .context
        .run(Some("dev"), None, None, None, true)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Config(_)));
}

#[tokio::test]
async fn test_run_backfills_only_new_intervals() {
    let harness = deployed(vec![daily("db.events", 1)], "2024-01-02").await;
    assert_eq!(harness.count("db.events").await, 2);

    let report = harness
        .context
        .run(Some(PROD), Some("2024-01-01"), Some("2024-01-04"), None, true)
        .await
        .unwrap();
    assert_eq!(report.completed.len(), 2);
    assert_eq!(harness.count("db.events").await, 4);

    let again = harness
        .context
        .run(Some(PROD), Some("2024-01-01"), Some("2024-01-04"), None, true)
        .await
        .unwrap();
    assert!(again.completed.is_empty());
}

#[tokio::test]
async fn test_audit_checks_environment_models() {
    let harness = deployed(vec![audited_events(), a()], "2024-01-02").await;

    let results = harness
        .context
        .audit(Some(PROD), "2024-01-01", "2024-01-02", &[])
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].batch.name, "db.events");
    assert!(results[0].result.passed());

    let none = harness
        .context
        .audit(Some(PROD), "2024-01-01", "2024-01-02", &["db.a".to_string()])
        .await
        .unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn test_evaluate_returns_rows_without_writing() {
    let harness = Harness::new(vec![a()]);
    let result = harness
        .context
        .evaluate("db.a", "2024-01-01", "2024-01-01", None, 10)
        .await
        .unwrap();
    assert_eq!(result.columns, vec!["id".to_string()]);
    assert_eq!(result.rows, vec![vec!["1".to_string()]]);

    let snapshots = harness.context.snapshots().unwrap();
    assert!(!harness.exists(&snapshots["db.a"].table_name(false)).await);

    let err = harness
        .context
        .evaluate("db.missing", "2024-01-01", "2024-01-01", None, 10)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Core(CoreError::ModelNotFound { .. })));
}

#[tokio::test]
async fn test_table_resolves_the_physical_table() {
    let harness = deployed(vec![a()], "2024-01-01").await;
    let environment = harness.state.get_environment(PROD).unwrap().unwrap();

    let table = harness.context.table("db.a", Some(PROD)).unwrap();
    assert_eq!(table, environment.get("db.a").unwrap().table_name(false));
    assert!(harness.exists(&table).await);

    assert!(harness.context.table("db.zzz", Some(PROD)).is_err());
    assert!(matches!(
        harness.context.table("db.a", Some("dev")),
        Err(EngineError::Config(_))
    ));
}

#[test]
fn test_dag_dot_lists_models_and_edges() {
    let harness = Harness::new(vec![a(), b()]);
    let dot = harness.context.dag_dot();
    assert!(dot.starts_with("digraph {"));
    assert!(dot.contains("\"db.a\""));
    assert!(dot.contains("\"db.b\""));
    assert!(dot.contains("->"));
}
