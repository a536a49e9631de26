//! Plan command implementation

use anyhow::{Context as _, Result};
use qy_core::time::to_ts;
use qy_core::ModelName;
use qy_engine::{Plan, PlanOptions};
use std::io::IsTerminal;

use crate::cli::{parse_category, GlobalArgs, PlanArgs};
use crate::commands::common::{self, open_context};

/// Execute the plan command
pub(crate) async fn execute(args: &PlanArgs, global: &GlobalArgs) -> Result<()> {
    let context = open_context(global)?;
    let options = PlanOptions {
        start: args.start.clone(),
        end: args.end.clone(),
        latest: args.latest.clone(),
        create_from: args.create_from.clone(),
        restate_models: args.restate_models.clone(),
        no_gaps: args.no_gaps,
        skip_backfill: args.skip_backfill,
        forward_only: args.forward_only,
        auto_categorization_enabled: !args.no_auto_categorization,
        skip_tests: args.skip_tests,
        ..PlanOptions::default()
    };
    let mut plan = context.plan(args.environment.as_deref(), options)?;

    for (model, category) in &args.choices {
        plan.set_choice(model, *category, &**context.state())
            .with_context(|| format!("Cannot categorize '{}'", model))?;
    }

    let interactive = !args.auto_apply && std::io::stdin().is_terminal();
    if interactive {
        for name in plan.uncategorized() {
            choose_category(&mut plan, &name, &context)?;
        }
    }

    print_plan(&plan);

    if !plan.has_changes() && !plan.requires_backfill() {
        println!(
            "No changes to plan: project files match the '{}' environment",
            plan.environment_name()
        );
        return Ok(());
    }

    let apply = args.auto_apply || (interactive && common::confirm("Apply - Backfill Tables")?);
    if !apply {
        println!("Plan was not applied. Re-run with --auto-apply to apply it.");
        return Ok(());
    }

    context.apply(&plan).await?;
    Ok(())
}

fn choose_category(plan: &mut Plan, name: &ModelName, context: &qy_engine::Context) -> Result<()> {
    loop {
        let prompt = format!(
            "Categorize '{}': [b]reaking, [n]on-breaking or [f]orward-only:",
            name
        );
        let Some(answer) = common::prompt_line(&prompt)? else {
            return Ok(());
        };
        match parse_category(&answer) {
            Ok(category) => {
                plan.set_choice(name, category, &**context.state())?;
                return Ok(());
            }
            Err(message) => eprintln!("{}", message),
        }
    }
}

fn print_plan(plan: &Plan) {
    println!(
        "Plan {} for '{}' [{} - {})",
        plan.plan_id,
        plan.environment_name(),
        to_ts(plan.start),
        to_ts(plan.end)
    );

    for name in plan.context_diff.modified.keys() {
        let category = plan
            .context_diff
            .snapshots
            .get(name)
            .and_then(|s| s.change_category)
            .map_or("uncategorized".to_string(), |c| c.to_string());
        println!("  ~ {}: {}", name, category);
    }

    let missing = plan.missing_intervals();
    if missing.is_empty() {
        return;
    }
    println!("Models needing backfill:");
    for (name, intervals) in missing {
        let (Some(first), Some(last)) = (intervals.first(), intervals.last()) else {
            continue;
        };
        println!(
            "  {}: {} batch(es) [{} - {})",
            name,
            intervals.len(),
            to_ts(first.start),
            to_ts(last.end)
        );
    }
}
