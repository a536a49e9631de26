//! Migrate command implementation

use anyhow::{Context as _, Result};

use crate::cli::GlobalArgs;
use crate::commands::common::open_context;

pub(crate) async fn execute(global: &GlobalArgs) -> Result<()> {
    let context = open_context(global)?;
    context.migrate().context("State migration failed")?;
    let version = context.state().get_versions(false)?;
    println!("State store is at schema version {}", version);
    Ok(())
}
