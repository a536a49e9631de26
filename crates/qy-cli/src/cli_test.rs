use super::*;
use clap::CommandFactory;

#[test]
fn verify_cli_args() {
    // Catches short flag conflicts and duplicate args across the tree.
    Cli::command().debug_assert();
}

#[test]
fn test_plan_arguments() {
    let cli = Cli::try_parse_from([
        "qy",
        "-p",
        "/tmp/project",
        "plan",
        "dev",
        "--start",
        "2024-01-01",
        "-r",
        "db.a",
        "--restate-model",
        "db.b",
        "--choice",
        "db.c=non-breaking",
        "--auto-apply",
    ])
    .unwrap();

    assert_eq!(cli.global.project_dir, "/tmp/project");
    let Commands::Plan(args) = cli.command else {
        panic!("expected plan");
    };
    assert_eq!(args.environment.as_deref(), Some("dev"));
    assert_eq!(args.start.as_deref(), Some("2024-01-01"));
    assert_eq!(args.restate_models, vec!["db.a", "db.b"]);
    assert_eq!(
        args.choices,
        vec![("db.c".to_string(), ChangeCategory::NonBreaking)]
    );
    assert!(args.auto_apply);
    assert!(!args.forward_only);
}

#[test]
fn test_global_flags_follow_the_subcommand() {
    let cli = Cli::try_parse_from(["qy", "janitor", "--verbose", "-c", "other.yml"]).unwrap();
    assert!(cli.global.verbose);
    assert_eq!(cli.global.config.as_deref(), Some("other.yml"));
    assert!(matches!(cli.command, Commands::Janitor));
}

#[test]
fn test_invalidate_requires_an_environment() {
    assert!(Cli::try_parse_from(["qy", "invalidate"]).is_err());
    let cli = Cli::try_parse_from(["qy", "invalidate", "dev"]).unwrap();
    assert!(matches!(cli.command, Commands::Invalidate(ref args) if args.environment == "dev"));
}

#[test]
fn test_audit_and_evaluate_require_a_range() {
    assert!(Cli::try_parse_from(["qy", "audit", "--start", "2024-01-01"]).is_err());
    assert!(Cli::try_parse_from(["qy", "evaluate", "db.a"]).is_err());

    let cli = Cli::try_parse_from([
        "qy", "evaluate", "db.a", "-s", "2024-01-01", "-e", "2024-01-02",
    ])
    .unwrap();
    let Commands::Evaluate(args) = cli.command else {
        panic!("expected evaluate");
    };
    assert_eq!(args.model, "db.a");
    assert_eq!(args.limit, 20);
}

#[test]
fn test_dag_defaults_to_svg() {
    let cli = Cli::try_parse_from(["qy", "dag", "--output", "graph.svg"]).unwrap();
    let Commands::Dag(args) = cli.command else {
        panic!("expected dag");
    };
    assert_eq!(args.output.as_deref(), Some("graph.svg"));
    assert_eq!(args.format, "svg");
}

#[test]
fn test_parse_choice() {
    assert_eq!(
        parse_choice("db.a=breaking").unwrap(),
        ("db.a".to_string(), ChangeCategory::Breaking)
    );
    assert_eq!(
        parse_choice("db.a=Forward_Only").unwrap().1,
        ChangeCategory::ForwardOnly
    );
    assert!(parse_choice("db.a").is_err());
    assert!(parse_choice("=breaking").is_err());
    assert!(parse_choice("db.a=metadata").is_err());
}
