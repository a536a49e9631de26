//! Evaluate command implementation

use anyhow::Result;

use crate::cli::{EvaluateArgs, GlobalArgs};
use crate::commands::common::open_context;

pub(crate) async fn execute(args: &EvaluateArgs, global: &GlobalArgs) -> Result<()> {
    let context = open_context(global)?;
    let result = context
        .evaluate(
            &args.model,
            &args.start,
            &args.end,
            args.latest.as_deref(),
            args.limit,
        )
        .await?;

    print_table(&result.columns, &result.rows);
    Ok(())
}

/// Left-aligned columns padded to the widest cell.
fn print_table(columns: &[String], rows: &[Vec<String>]) {
    let mut widths: Vec<usize> = columns.iter().map(|c| c.chars().count()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if let Some(width) = widths.get_mut(i) {
                *width = (*width).max(cell.chars().count());
            }
        }
    }

    let line = |cells: &[String]| {
        cells
            .iter()
            .zip(&widths)
            .map(|(cell, width)| format!("{:<width$}", cell, width = *width))
            .collect::<Vec<_>>()
            .join(" | ")
    };
    println!("{}", line(columns));
    println!(
        "{}",
        widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("-+-")
    );
    for row in rows {
        println!("{}", line(row));
    }
    println!("({} row(s))", rows.len());
}
