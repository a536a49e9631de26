use super::*;
use crate::error::EngineError;
use crate::test_utils::{daily, full, options, ts, Harness, NOW};
use qy_core::Config;

const A_QUERY: &str = "SELECT 1 AS id";
const B_QUERY: &str = "SELECT id FROM {{ ref('db.a') }}";

fn a(query: &str) -> Model {
    full("db.a", query).with_columns([("id", "INTEGER")])
}

fn b(query: &str) -> Model {
    full("db.b", query).with_depends_on(["db.a"])
}

fn full_categorizer() -> Config {
    let mut config = Config::new("test");
    config.auto_categorize_changes = CategorizerConfig::all(AutoCategorizationMode::Full);
    config
}

/// Harness whose production environment already holds `models`.
async fn deployed(config: Config, models: Vec<Model>, start: &str, end: &str) -> Harness {
    let harness = Harness::with_config(config, models);
    let plan = harness.context.plan(Some(PROD), options(start, end)).unwrap();
    harness.context.apply(&plan).await.unwrap();
    harness
}

struct FailingTests;

impl ModelTestRunner for FailingTests {
    fn run_tests(&self, models: &[&Model]) -> EngineResult<TestSummary> {
        Ok(TestSummary {
            passed: 0,
            failed: models.len(),
        })
    }
}

#[test]
fn test_added_models_are_breaking_and_need_backfill() {
    let harness = Harness::new(vec![a(A_QUERY), b(B_QUERY)]);
    let plan = harness
        .context
        .plan(Some("dev"), options("2024-01-01", "2024-01-01"))
        .unwrap();

    assert!(plan.is_dev());
    assert!(plan.has_changes());
    assert!(plan.uncategorized().is_empty());
    for snapshot in plan.new_snapshots() {
        assert_eq!(snapshot.change_category, Some(ChangeCategory::Breaking));
        assert!(snapshot.is_new_version());
    }

    assert_eq!(plan.start, ts("2024-01-01"));
    assert_eq!(plan.end, ts("2024-01-02"));
    assert_eq!(plan.latest, plan.end);
    assert_eq!(plan.missing_intervals().len(), 2);
    assert_eq!(
        plan.batches()["db.b"],
        vec![Interval::new(ts("2024-01-01"), ts("2024-01-02")).unwrap()]
    );

    let environment = plan.environment();
    assert_eq!(environment.name, "dev");
    assert_eq!(environment.plan_id, plan.plan_id);
    assert_eq!(environment.end_at, Some(ts("2024-01-02")));
    assert_eq!(environment.expiration_ts, Some(ts(NOW) + 7 * DAY_MS));
    assert_eq!(
        environment
            .snapshots
            .iter()
            .map(|s| s.name.as_str())
            .collect::<Vec<_>>(),
        vec!["db.a", "db.b"]
    );
}

#[test]
fn test_default_range_starts_at_earliest_model_start() {
    let harness = Harness::new(vec![daily("db.events", 1)]);
    let plan = harness
        .context
        .plan(
            Some(PROD),
            PlanOptions {
                now: Some(ts(NOW)),
                ..PlanOptions::default()
            },
        )
        .unwrap();

    assert_eq!(plan.start, ts("2024-01-01"));
    assert_eq!(plan.end, ts(NOW));
    assert_eq!(plan.missing_intervals()["db.events"].len(), 31);
    assert_eq!(plan.batches()["db.events"].len(), 31);
    assert_eq!(plan.environment().expiration_ts, None);
    assert_eq!(plan.environment().end_at, None);
}

#[test]
fn test_start_must_precede_end() {
    let harness = Harness::new(vec![a(A_QUERY)]);
    let err = harness
        .context
        .plan(Some("dev"), options("2024-01-05", "2024-01-01"))
        .unwrap_err();
    assert!(matches!(err, EngineError::Core(CoreError::InvalidInterval { .. })));
}

#[test]
fn test_skip_backfill_in_production_requires_no_gaps() {
    let harness = Harness::new(vec![a(A_QUERY)]);
    let mut skip = options("2024-01-01", "2024-01-01");
    skip.skip_backfill = true;

    let err = harness.context.plan(Some(PROD), skip.clone()).unwrap_err();
    assert!(matches!(err, EngineError::Config(_)));

    let plan = harness.context.plan(Some("dev"), skip).unwrap();
    assert!(plan.skip_backfill());
    assert!(!plan.requires_backfill());
}

#[test]
fn test_failing_model_tests_block_the_plan() {
    let harness = Harness::new(vec![a(A_QUERY)]);
    let state = harness.context.state();
    let diff = harness.context.diff(Some("dev"), None).unwrap();

    let err = Plan::new(
        diff.clone(),
        &**state,
        options("2024-01-01", "2024-01-01"),
        Some(&FailingTests),
    )
    .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Plan(PlanError::FailingTests { failed: 1 })
    ));

    let mut skipped = options("2024-01-01", "2024-01-01");
    skipped.skip_tests = true;
    assert!(Plan::new(diff, &**state, skipped, Some(&FailingTests)).is_ok());
}

#[tokio::test]
async fn test_inconclusive_direct_change_waits_for_a_choice() {
    let mut harness = deployed(
        Config::new("test"),
        vec![a(A_QUERY), b(B_QUERY)],
        "2024-01-01",
        "2024-01-01",
    )
    .await;
    harness.reload(vec![a(A_QUERY), b("SELECT id + 1 AS id FROM {{ ref('db.a') }}")]);

    let mut plan = harness
        .context
        .plan(Some(PROD), options("2024-01-01", "2024-01-01"))
        .unwrap();
    assert_eq!(plan.uncategorized(), vec![ModelName::from("db.b")]);
    assert!(!plan.requires_backfill());

    let err = harness.context.apply(&plan).await.unwrap_err();
    assert!(matches!(err, EngineError::Plan(PlanError::Uncategorized { .. })));

    let state = harness.context.state();
    let err = plan
        .set_choice("db.a", ChangeCategory::Breaking, &**state)
        .unwrap_err();
    assert!(matches!(err, EngineError::Config(_)));
    let err = plan
        .set_choice("db.b", ChangeCategory::Metadata, &**state)
        .unwrap_err();
    assert!(matches!(err, EngineError::Config(_)));

    plan.set_choice("db.b", ChangeCategory::Breaking, &**state)
        .unwrap();
    assert!(plan.uncategorized().is_empty());
    assert!(plan.requires_backfill());
    assert!(plan.missing_intervals().contains_key("db.b"));
    assert!(!plan.missing_intervals().contains_key("db.a"));
}

#[tokio::test]
async fn test_full_mode_categorizes_query_changes_as_breaking() {
    let mut harness = deployed(
        full_categorizer(),
        vec![a(A_QUERY), b(B_QUERY)],
        "2024-01-01",
        "2024-01-01",
    )
    .await;
    harness.reload(vec![a("SELECT 2 AS id"), b(B_QUERY)]);

    let plan = harness
        .context
        .plan(Some(PROD), options("2024-01-01", "2024-01-01"))
        .unwrap();
    let snapshots = &plan.context_diff.snapshots;
    assert_eq!(snapshots["db.a"].change_category, Some(ChangeCategory::Breaking));
    // Breaking parents force the child onto a new table too.
    assert_eq!(snapshots["db.b"].change_category, Some(ChangeCategory::Breaking));
    assert!(snapshots["db.b"].is_new_version());
    assert_eq!(plan.missing_intervals().len(), 2);
}

#[tokio::test]
async fn test_additive_change_keeps_child_table() {
    let mut harness = deployed(
        Config::new("test"),
        vec![a(A_QUERY), b(B_QUERY)],
        "2024-01-01",
        "2024-01-01",
    )
    .await;
    let old_b = harness
        .context
        .state()
        .get_environment(PROD)
        .unwrap()
        .unwrap()
        .get("db.b")
        .unwrap()
        .clone();

    let widened = full("db.a", "SELECT 1 AS id, 'x' AS label")
        .with_columns([("id", "INTEGER"), ("label", "VARCHAR")]);
    harness.reload(vec![widened, b(B_QUERY)]);

    let plan = harness
        .context
        .plan(Some(PROD), options("2024-01-01", "2024-01-01"))
        .unwrap();
    let snapshots = &plan.context_diff.snapshots;
    assert_eq!(
        snapshots["db.a"].change_category,
        Some(ChangeCategory::NonBreaking)
    );
    assert!(snapshots["db.a"].is_new_version());

    let new_b = &snapshots["db.b"];
    assert_eq!(new_b.change_category, Some(ChangeCategory::NonBreaking));
    assert_ne!(new_b.identifier(), old_b.identifier);
    assert_eq!(new_b.table_version(), old_b.version);
    // The shared table's coverage carries over, so only the parent rebuilds.
    assert_eq!(
        plan.missing_intervals().keys().map(|n| n.as_str()).collect::<Vec<_>>(),
        vec!["db.a"]
    );
}

#[tokio::test]
async fn test_forward_only_reuses_every_table() {
    let mut harness = deployed(
        full_categorizer(),
        vec![a(A_QUERY), b(B_QUERY)],
        "2024-01-01",
        "2024-01-01",
    )
    .await;
    harness.reload(vec![a("SELECT 3 AS id"), b(B_QUERY)]);

    let mut forward_only = options("2024-01-01", "2024-01-01");
    forward_only.forward_only = true;
    let plan = harness.context.plan(Some(PROD), forward_only).unwrap();

    assert!(plan.forward_only());
    for snapshot in plan.new_snapshots() {
        assert_eq!(snapshot.change_category, Some(ChangeCategory::ForwardOnly));
        assert!(!snapshot.is_new_version());
    }
    assert!(!plan.requires_backfill());
}

#[tokio::test]
async fn test_no_gaps_rejects_lost_history() {
    let mut harness = deployed(
        full_categorizer(),
        vec![daily("db.events", 1)],
        "2024-01-01",
        "2024-01-03",
    )
    .await;
    harness.reload(vec![daily("db.events", 2)]);

    let mut narrow = options("2024-01-01", "2024-01-02");
    narrow.no_gaps = true;
    let err = harness.context.plan(Some(PROD), narrow).unwrap_err();
    match err {
        EngineError::Plan(PlanError::Gaps { model, .. }) => assert_eq!(model, "db.events"),
        other => panic!("expected a gap error, got {other:?}"),
    }

    let mut wide = options("2024-01-01", "2024-01-03");
    wide.no_gaps = true;
    let plan = harness.context.plan(Some(PROD), wide).unwrap();
    assert!(plan.no_gaps());
    assert_eq!(plan.missing_intervals()["db.events"].len(), 3);
}

#[tokio::test]
async fn test_restating_an_external_table_covers_downstream() {
    let source = full("db.a", A_QUERY).with_depends_on(["raw.ids"]);
    let events = daily("db.events", 1);
    let harness = deployed(
        Config::new("test"),
        vec![source, b(B_QUERY), events],
        "2024-01-01",
        "2024-01-02",
    )
    .await;

    let mut restate = options("2024-01-01", "2024-01-02");
    restate.restate_models = vec!["raw.ids".into()];
    let plan = harness.context.plan(Some(PROD), restate).unwrap();

    assert!(!plan.has_changes());
    let range = Interval::new(ts("2024-01-01"), ts("2024-01-03")).unwrap();
    assert_eq!(
        plan.restatements().clone(),
        BTreeMap::from([
            (ModelName::from("db.a"), range),
            (ModelName::from("db.b"), range),
        ])
    );
    assert!(plan.requires_backfill());
    assert!(!plan.missing_intervals().contains_key("db.events"));
}

#[test]
fn test_unknown_restatement_is_rejected() {
    let harness = Harness::new(vec![a(A_QUERY)]);
    let mut restate = options("2024-01-01", "2024-01-01");
    restate.restate_models = vec!["db.unknown".into()];
    let err = harness.context.plan(Some("dev"), restate).unwrap_err();
    assert!(matches!(err, EngineError::Config(_)));
}
