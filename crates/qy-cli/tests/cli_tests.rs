//! End-to-end tests of the `qy` binary against the sample project

use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn copy_dir(from: &Path, to: &Path) {
    fs::create_dir_all(to).unwrap();
    for entry in fs::read_dir(from).unwrap() {
        let entry = entry.unwrap();
        let target = to.join(entry.file_name());
        if entry.file_type().unwrap().is_dir() {
            copy_dir(&entry.path(), &target);
        } else {
            fs::copy(entry.path(), target).unwrap();
        }
    }
}

/// A private copy of the fixture so state and warehouse files stay local.
fn sample_project() -> TempDir {
    let dir = TempDir::new().unwrap();
    copy_dir(
        &Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/sample_project"),
        dir.path(),
    );
    dir
}

fn qy(project: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_qy"))
        .arg("--project-dir")
        .arg(project)
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

const RANGE: [&str; 4] = ["--start", "2024-01-01", "--end", "2024-01-03"];

fn deploy(project: &Path) -> Output {
    let mut args = vec!["plan", "prod", "--auto-apply"];
    args.extend(RANGE);
    qy(project, &args)
}

// ── Plan and apply ──────────────────────────────────────────────────────

#[test]
fn test_plan_applies_and_then_reports_no_changes() {
    let project = sample_project();

    let output = deploy(project.path());
    assert!(output.status.success(), "{:?}", output);
    let text = stdout(&output);
    assert!(text.contains("+ shop.orders"), "{text}");
    assert!(text.contains("+ shop.daily"), "{text}");
    assert!(text.contains("shop.orders: 3 batch(es)"), "{text}");

    let mut args = vec!["plan", "prod"];
    args.extend(RANGE);
    let output = qy(project.path(), &args);
    assert!(output.status.success(), "{:?}", output);
    assert!(stdout(&output).contains("No changes to plan"));
}

#[test]
fn test_plan_without_auto_apply_changes_nothing() {
    let project = sample_project();
    let mut args = vec!["plan", "dev"];
    args.extend(RANGE);
    let output = qy(project.path(), &args);
    assert!(output.status.success(), "{:?}", output);
    assert!(stdout(&output).contains("Plan was not applied"));

    let output = qy(project.path(), &["info"]);
    assert!(stdout(&output).contains("Environments: none"));
}

#[test]
fn test_unknown_restatement_exits_with_failure() {
    let project = sample_project();
    let mut args = vec!["plan", "prod", "--restate-model", "shop.nope", "--auto-apply"];
    args.extend(RANGE);
    let output = qy(project.path(), &args);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("shop.nope"));
}

// ── Inspecting a deployed project ───────────────────────────────────────

#[test]
fn test_inspection_commands_after_deploy() {
    let project = sample_project();
    assert!(deploy(project.path()).status.success());

    let output = qy(project.path(), &["info"]);
    assert!(output.status.success(), "{:?}", output);
    let text = stdout(&output);
    assert!(text.contains("Project: shop"), "{text}");
    assert!(text.contains("prod: 2 model(s), finalized"), "{text}");

    let output = qy(
        project.path(),
        &["evaluate", "shop.daily", "-s", "2024-01-01", "-e", "2024-01-03"],
    );
    assert!(output.status.success(), "{:?}", output);
    let text = stdout(&output);
    assert!(text.contains("ds"), "{text}");
    assert!(text.contains("(3 row(s))"), "{text}");

    let output = qy(project.path(), &["audit", "-s", "2024-01-01", "-e", "2024-01-03"]);
    assert!(output.status.success(), "{:?}", output);
    assert!(stdout(&output).contains("[PASS] ds_present on shop.orders"));

    let output = qy(project.path(), &["diff", "prod"]);
    assert!(output.status.success(), "{:?}", output);
    assert!(stdout(&output).contains("No changes to 'prod'"));

    let output = qy(project.path(), &["dag"]);
    assert!(output.status.success(), "{:?}", output);
    assert!(stdout(&output).contains("digraph"));

    let output = qy(project.path(), &["janitor"]);
    assert!(output.status.success(), "{:?}", output);
    assert!(stdout(&output).contains("Nothing has expired"));
}

#[test]
fn test_production_cannot_be_invalidated() {
    let project = sample_project();
    assert!(deploy(project.path()).status.success());

    let output = qy(project.path(), &["invalidate", "prod"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("production"));

    let output = qy(project.path(), &["info"]);
    assert!(stdout(&output).contains("prod: 2 model(s), finalized"));
}

#[test]
fn test_run_without_environment_fails() {
    let project = sample_project();
    let output = qy(project.path(), &["run", "dev", "--skip-janitor"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("does not exist"));
}
