//! Diff command implementation

use anyhow::Result;

use crate::cli::{DiffArgs, GlobalArgs};
use crate::commands::common::open_context;

/// Execute the diff command; the console prints the summary.
pub(crate) async fn execute(args: &DiffArgs, global: &GlobalArgs) -> Result<()> {
    let context = open_context(global)?;
    context.diff(args.environment.as_deref(), None)?;
    Ok(())
}
