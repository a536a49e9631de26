//! Run command implementation

use anyhow::Result;

use crate::cli::{GlobalArgs, RunArgs};
use crate::commands::common::open_context;

/// Execute the run command
pub(crate) async fn execute(args: &RunArgs, global: &GlobalArgs) -> Result<()> {
    let context = open_context(global)?;
    let report = context
        .run(
            args.environment.as_deref(),
            args.start.as_deref(),
            args.end.as_deref(),
            args.latest.as_deref(),
            args.skip_janitor,
        )
        .await?;
    if report.completed.is_empty() {
        println!("No intervals were due");
    }
    Ok(())
}
