//! Dag command implementation

use anyhow::Result;
use std::path::Path;

use crate::cli::{DagArgs, GlobalArgs};
use crate::commands::common::open_context;

/// Print the DOT graph, or render it with Graphviz when `--output` is set.
pub(crate) async fn execute(args: &DagArgs, global: &GlobalArgs) -> Result<()> {
    let context = open_context(global)?;
    match &args.output {
        Some(path) => {
            context.render_dag(Path::new(path), &args.format)?;
            println!("Wrote {}", path);
        }
        None => println!("{}", context.dag_dot()),
    }
    Ok(())
}
