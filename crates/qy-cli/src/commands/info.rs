//! Info command implementation

use anyhow::Result;
use qy_core::time::to_ts;

use crate::cli::GlobalArgs;
use crate::commands::common::{context_for, load_project};

pub(crate) async fn execute(global: &GlobalArgs) -> Result<()> {
    let project = load_project(global)?;
    let state_path = project
        .config
        .state_path_absolute(&project.root)
        .map_or(":memory:".to_string(), |p| p.display().to_string());
    let warehouse_path = project
        .config
        .warehouse_path_absolute(&project.root)
        .map_or(":memory:".to_string(), |p| p.display().to_string());

    println!("Project: {}", project.config.name);
    println!("Root: {}", project.root.display());
    println!("Models: {}", project.models.len());

    let context = context_for(project)?;
    println!(
        "State store: {} (schema version {})",
        state_path,
        context.state().get_versions(false)?
    );
    println!(
        "Warehouse: {} ({})",
        warehouse_path,
        context.evaluator().db_type()
    );

    let environments = context.state().get_environments()?;
    if environments.is_empty() {
        println!("Environments: none");
        return Ok(());
    }
    println!("Environments:");
    for environment in environments {
        let status = match environment.finalized_ts {
            Some(ts) => format!("finalized {}", to_ts(ts)),
            None => "not finalized".to_string(),
        };
        let expires = environment
            .expiration_ts
            .map(|ts| format!(", expires {}", to_ts(ts)))
            .unwrap_or_default();
        println!(
            "  {}: {} model(s), {}{}",
            environment.name,
            environment.snapshots.len(),
            status,
            expires
        );
    }
    Ok(())
}
