use super::*;
use std::fs;
use tempfile::TempDir;

fn global(dir: &Path, config: Option<&Path>) -> GlobalArgs {
    GlobalArgs {
        verbose: false,
        project_dir: dir.display().to_string(),
        config: config.map(|p| p.display().to_string()),
    }
}

fn sample_project() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("quarry.yml"), "name: shop\n").unwrap();
    fs::create_dir_all(dir.path().join("models")).unwrap();
    fs::write(
        dir.path().join("models/a.yml"),
        "name: shop.a\nkind:\n  type: full\nquery: SELECT 1 AS id\n",
    )
    .unwrap();
    dir
}

#[test]
fn test_load_project_from_directory() {
    let dir = sample_project();
    let project = load_project(&global(dir.path(), None)).unwrap();
    assert_eq!(project.config.name, "shop");
    assert_eq!(project.models.len(), 1);
}

#[test]
fn test_config_override_keeps_project_root() {
    let dir = sample_project();
    let other = dir.path().join("other.yml");
    fs::write(&other, "name: other\nmodel_paths: [models]\n").unwrap();

    let project = load_project(&global(dir.path(), Some(&other))).unwrap();
    assert_eq!(project.config.name, "other");
    assert_eq!(project.root, dir.path());
    assert!(project.models.get("shop.a").is_some());
}

#[test]
fn test_missing_project_fails() {
    let dir = TempDir::new().unwrap();
    let err = load_project(&global(dir.path(), None)).unwrap_err();
    assert!(err.to_string().contains("Failed to load project"));
}

#[test]
fn test_open_context_creates_state_files() {
    let dir = sample_project();
    let context = open_context(&global(dir.path(), None)).unwrap();
    assert_eq!(context.models().len(), 1);
    assert!(dir.path().join(".quarry/state.duckdb").exists());
}

#[test]
fn test_is_yes() {
    assert!(is_yes("y"));
    assert!(is_yes("YES"));
    assert!(!is_yes(""));
    assert!(!is_yes("no"));
}
