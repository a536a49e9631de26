//! Janitor command implementation

use anyhow::Result;

use crate::cli::GlobalArgs;
use crate::commands::common::open_context;

pub(crate) async fn execute(global: &GlobalArgs) -> Result<()> {
    let context = open_context(global)?;
    let report = context.janitor().await?;
    if report.is_empty() {
        println!("Nothing has expired");
        return Ok(());
    }
    for name in &report.environments {
        println!("  - environment {}", name);
    }
    for id in &report.snapshots {
        println!("  - snapshot {}", id);
    }
    println!(
        "Removed {} environment(s), {} snapshot(s) and {} table(s)",
        report.environments.len(),
        report.snapshots.len(),
        report.dropped_tables.len()
    );
    Ok(())
}
