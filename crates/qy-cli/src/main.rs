//! Quarry CLI - plan, apply and run versioned SQL models

use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;
mod console;

use cli::Cli;
use commands::common::ExitCode;
use commands::{audit, dag, diff, evaluate, info, invalidate, janitor, migrate, plan, run};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.global.verbose);

    if let Err(err) = dispatch(&cli).await {
        match err.downcast_ref::<ExitCode>() {
            Some(ExitCode(code)) => std::process::exit(*code),
            None => {
                eprintln!("Error: {:#}", err);
                std::process::exit(1);
            }
        }
    }
}

async fn dispatch(cli: &Cli) -> Result<()> {
    match &cli.command {
        cli::Commands::Plan(args) => plan::execute(args, &cli.global).await,
        cli::Commands::Run(args) => run::execute(args, &cli.global).await,
        cli::Commands::Diff(args) => diff::execute(args, &cli.global).await,
        cli::Commands::Janitor => janitor::execute(&cli.global).await,
        cli::Commands::Invalidate(args) => invalidate::execute(args, &cli.global).await,
        cli::Commands::Migrate => migrate::execute(&cli.global).await,
        cli::Commands::Audit(args) => audit::execute(args, &cli.global).await,
        cli::Commands::Evaluate(args) => evaluate::execute(args, &cli.global).await,
        cli::Commands::Info => info::execute(&cli.global).await,
        cli::Commands::Dag(args) => dag::execute(args, &cli.global).await,
    }
}

/// Level comes from `RUST_LOG`; `--verbose` raises it to debug.
fn init_logging(verbose: bool) {
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    if verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.format_timestamp(None).init();
}
