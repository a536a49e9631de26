//! Audit command implementation

use anyhow::Result;

use crate::cli::{AuditArgs, GlobalArgs};
use crate::commands::common::{open_context, ExitCode};

/// Execute the audit command; exits 1 when a blocking audit finds rows.
pub(crate) async fn execute(args: &AuditArgs, global: &GlobalArgs) -> Result<()> {
    let context = open_context(global)?;
    let results = context
        .audit(
            args.environment.as_deref(),
            &args.start,
            &args.end,
            &args.models,
        )
        .await?;

    let mut blocking_failures = 0;
    for audit in &results {
        let status = if audit.result.skipped {
            "SKIP"
        } else if audit.result.passed() {
            "PASS"
        } else if audit.result.blocking {
            blocking_failures += 1;
            "FAIL"
        } else {
            "WARN"
        };
        println!(
            "  [{}] {} on {}",
            status, audit.result.audit_name, audit.batch.name
        );
        if !audit.result.passed() {
            println!("         {} row(s): {}", audit.result.count, audit.result.query);
        }
    }

    let failed = results.iter().filter(|a| !a.result.passed()).count();
    println!(
        "{} audit(s) run, {} failed",
        results.len(),
        failed
    );
    if blocking_failures > 0 {
        return Err(ExitCode(1).into());
    }
    Ok(())
}
