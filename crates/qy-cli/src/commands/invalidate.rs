//! Invalidate command implementation

use anyhow::{Context as _, Result};

use crate::cli::{GlobalArgs, InvalidateArgs};
use crate::commands::common::open_context;

pub(crate) async fn execute(args: &InvalidateArgs, global: &GlobalArgs) -> Result<()> {
    let context = open_context(global)?;
    context
        .invalidate_environment(&args.environment)
        .with_context(|| format!("Cannot invalidate '{}'", args.environment))?;
    println!(
        "Environment '{}' expired; run the janitor to remove it",
        args.environment
    );
    Ok(())
}
