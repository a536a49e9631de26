use super::*;

fn deps(entries: &[(&str, &[&str])]) -> BTreeMap<ModelName, BTreeSet<ModelName>> {
    entries
        .iter()
        .map(|(name, ds)| {
            (
                ModelName::new(*name),
                ds.iter().map(|d| ModelName::new(*d)).collect(),
            )
        })
        .collect()
}

fn pos(order: &[ModelName], name: &str) -> usize {
    order.iter().position(|m| m == name).unwrap()
}

#[test]
fn test_build_dag() {
    let dag = ModelDag::build(&deps(&[
        ("stg_orders", &[]),
        ("fct_orders", &["stg_orders", "stg_customers"]),
        ("stg_customers", &[]),
    ]))
    .unwrap();
    let order = dag.topological_order().unwrap();

    assert!(pos(&order, "fct_orders") > pos(&order, "stg_orders"));
    assert!(pos(&order, "fct_orders") > pos(&order, "stg_customers"));
}

#[test]
fn test_circular_dependency() {
    let result = ModelDag::build(&deps(&[("a", &["b"]), ("b", &["c"]), ("c", &["a"])]));
    assert!(matches!(
        result.unwrap_err(),
        CoreError::CircularDependency { .. }
    ));
}

#[test]
fn test_external_dependencies_are_ignored() {
    let dag = ModelDag::build(&deps(&[("stg", &["raw.events"])])).unwrap();
    assert_eq!(dag.len(), 1);
    assert!(!dag.contains("raw.events"));
    assert!(dag.dependencies("stg").is_empty());
}

#[test]
fn test_upstream_and_downstream() {
    let dag = ModelDag::build(&deps(&[
        ("raw", &[]),
        ("stg", &["raw"]),
        ("fct", &["stg"]),
        ("other", &[]),
    ]))
    .unwrap();

    let up = dag.upstream("fct");
    assert_eq!(up.len(), 2);
    assert!(up.contains("raw") && up.contains("stg"));

    let down = dag.downstream("raw");
    assert_eq!(down.len(), 2);
    assert!(down.contains("stg") && down.contains("fct"));

    assert!(dag.upstream("other").is_empty());
    assert!(dag.downstream("missing").is_empty());
}

#[test]
fn test_direct_neighbors() {
    let dag = ModelDag::build(&deps(&[("a", &[]), ("b", &["a"]), ("c", &["b"])])).unwrap();
    assert_eq!(dag.dependencies("b"), vec![ModelName::new("a")]);
    assert_eq!(dag.dependents("b"), vec![ModelName::new("c")]);
}

#[test]
fn test_to_dot_contains_nodes() {
    let dag = ModelDag::build(&deps(&[("a", &[]), ("b", &["a"])])).unwrap();
    let dot = dag.to_dot();
    assert!(dot.starts_with("digraph"));
    assert!(dot.contains("\"a\";"));
    assert!(dot.contains("\"a\" -> \"b\";"));
}
