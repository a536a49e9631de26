//! CLI argument definitions using clap derive API

use clap::{Args, Parser, Subcommand};
use qy_core::ChangeCategory;

/// Quarry - plan, apply and run versioned SQL models
#[derive(Parser, Debug)]
#[command(name = "qy")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Global options
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Global arguments available to all commands
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to project directory
    #[arg(short = 'p', long, global = true, default_value = ".", env = "QUARRY_PROJECT_DIR")]
    pub project_dir: String,

    /// Override config file path
    #[arg(short, long, global = true)]
    pub config: Option<String>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compare the project with an environment and apply the difference
    Plan(PlanArgs),

    /// Backfill intervals that became due since the last run
    Run(RunArgs),

    /// Show what changed between the project and an environment
    Diff(DiffArgs),

    /// Remove expired environments and snapshots
    Janitor,

    /// Expire an environment so the next janitor run removes it
    Invalidate(InvalidateArgs),

    /// Upgrade the state store schema
    Migrate,

    /// Run model audits over a time range
    Audit(AuditArgs),

    /// Render and run a model's query without writing anything
    Evaluate(EvaluateArgs),

    /// Show project, state and warehouse details
    Info,

    /// Print or render the model dependency graph
    Dag(DagArgs),
}

/// Arguments for the plan command
#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Target environment (default from config)
    pub environment: Option<String>,

    /// Start of the backfill range
    #[arg(short, long)]
    pub start: Option<String>,

    /// End of the backfill range (inclusive day)
    #[arg(short, long)]
    pub end: Option<String>,

    /// Point in time models treat as "latest"
    #[arg(long)]
    pub latest: Option<String>,

    /// Environment a new environment is based on
    #[arg(long)]
    pub create_from: Option<String>,

    /// Recompute a model and its downstream models (repeatable)
    #[arg(short, long = "restate-model")]
    pub restate_models: Vec<String>,

    /// Fail if the plan would leave previously materialized data uncovered
    #[arg(long)]
    pub no_gaps: bool,

    /// Create environment views without backfilling (dev only)
    #[arg(long)]
    pub skip_backfill: bool,

    /// Treat every change as forward-only
    #[arg(long)]
    pub forward_only: bool,

    /// Never categorize changes automatically
    #[arg(long)]
    pub no_auto_categorization: bool,

    /// Category for a modified model, as MODEL=breaking|non-breaking|forward-only (repeatable)
    #[arg(long = "choice", value_parser = parse_choice)]
    pub choices: Vec<(String, ChangeCategory)>,

    /// Apply without asking for confirmation
    #[arg(long)]
    pub auto_apply: bool,

    /// Skip model unit tests
    #[arg(long)]
    pub skip_tests: bool,
}

/// Arguments for the run command
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Target environment (default from config)
    pub environment: Option<String>,

    /// Start of the range (default: the environment's start)
    #[arg(short, long)]
    pub start: Option<String>,

    /// End of the range (default: today)
    #[arg(short, long)]
    pub end: Option<String>,

    /// Point in time models treat as "latest"
    #[arg(long)]
    pub latest: Option<String>,

    /// Do not remove expired objects afterwards
    #[arg(long)]
    pub skip_janitor: bool,
}

/// Arguments for the diff command
#[derive(Args, Debug)]
pub struct DiffArgs {
    /// Environment to compare against (default from config)
    pub environment: Option<String>,
}

/// Arguments for the invalidate command
#[derive(Args, Debug)]
pub struct InvalidateArgs {
    /// Environment to expire
    pub environment: String,
}

/// Arguments for the audit command
#[derive(Args, Debug)]
pub struct AuditArgs {
    /// Start of the audited range
    #[arg(short, long)]
    pub start: String,

    /// End of the audited range (inclusive day)
    #[arg(short, long)]
    pub end: String,

    /// Models to audit (repeatable, default: all)
    #[arg(short, long = "model")]
    pub models: Vec<String>,

    /// Environment whose tables are audited (default from config)
    #[arg(long)]
    pub environment: Option<String>,
}

/// Arguments for the evaluate command
#[derive(Args, Debug)]
pub struct EvaluateArgs {
    /// Model to evaluate
    pub model: String,

    /// Start of the rendered interval
    #[arg(short, long)]
    pub start: String,

    /// End of the rendered interval (inclusive day)
    #[arg(short, long)]
    pub end: String,

    /// Point in time the model treats as "latest"
    #[arg(long)]
    pub latest: Option<String>,

    /// Maximum number of rows to show
    #[arg(short, long, default_value = "20")]
    pub limit: usize,
}

/// Arguments for the dag command
#[derive(Args, Debug)]
pub struct DagArgs {
    /// Render to this file with Graphviz instead of printing DOT
    #[arg(short, long)]
    pub output: Option<String>,

    /// Graphviz output format
    #[arg(short, long, default_value = "svg")]
    pub format: String,
}

/// Parse `MODEL=CATEGORY`.
pub(crate) fn parse_choice(value: &str) -> Result<(String, ChangeCategory), String> {
    let (model, category) = value
        .split_once('=')
        .ok_or_else(|| format!("expected MODEL=CATEGORY, got '{}'", value))?;
    if model.is_empty() {
        return Err(format!("missing model name in '{}'", value));
    }
    Ok((model.to_string(), parse_category(category)?))
}

/// Categories a user may pick for a direct modification.
pub(crate) fn parse_category(value: &str) -> Result<ChangeCategory, String> {
    match value.trim().to_ascii_lowercase().replace('_', "-").as_str() {
        "breaking" | "b" => Ok(ChangeCategory::Breaking),
        "non-breaking" | "n" => Ok(ChangeCategory::NonBreaking),
        "forward-only" | "f" => Ok(ChangeCategory::ForwardOnly),
        other => Err(format!(
            "unknown category '{}' (expected breaking, non-breaking or forward-only)",
            other
        )),
    }
}

#[cfg(test)]
#[path = "cli_test.rs"]
mod tests;
