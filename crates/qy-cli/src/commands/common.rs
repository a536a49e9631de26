//! Shared utilities for CLI commands

use anyhow::{Context as _, Result};
use qy_core::{Config, Project};
use qy_engine::Context;
use std::fmt;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cli::GlobalArgs;
use crate::console::TerminalConsole;

/// Error type representing a non-zero process exit code.
///
/// Use `return Err(ExitCode(N).into())` instead of `std::process::exit(N)`
/// so that destructors run before the process ends.
#[derive(Debug)]
pub(crate) struct ExitCode(pub(crate) i32);

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The command already reported what went wrong.
        write!(f, "")
    }
}

impl std::error::Error for ExitCode {}

/// Load the project, honoring a `--config` override.
pub(crate) fn load_project(global: &GlobalArgs) -> Result<Project> {
    let root = absolute(Path::new(&global.project_dir))?;
    let Some(config_path) = &global.config else {
        return Project::load(&root).context("Failed to load project");
    };

    let config = Config::load(Path::new(config_path))
        .with_context(|| format!("Failed to load config file {}", config_path))?;
    let mut project = Project {
        root,
        config,
        models: Default::default(),
    };
    project.models = project
        .reload_models()
        .context("Failed to load project models")?;
    Ok(project)
}

/// Open the project's state store and warehouse behind a terminal console.
pub(crate) fn open_context(global: &GlobalArgs) -> Result<Context> {
    context_for(load_project(global)?)
}

pub(crate) fn context_for(project: Project) -> Result<Context> {
    log::debug!(
        "Opening project '{}' at {}",
        project.config.name,
        project.root.display()
    );
    Context::open(project, Arc::new(TerminalConsole::new()))
        .context("Failed to open state store or warehouse")
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    Ok(std::env::current_dir()
        .context("Failed to resolve the working directory")?
        .join(path))
}

/// Print `prompt` and read one trimmed line; `None` at end of input.
pub(crate) fn prompt_line(prompt: &str) -> Result<Option<String>> {
    print!("{} ", prompt);
    std::io::stdout().flush()?;
    let mut line = String::new();
    let read = std::io::stdin().lock().read_line(&mut line)?;
    if read == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

/// Ask a yes/no question; anything but `y`/`yes` declines.
pub(crate) fn confirm(prompt: &str) -> Result<bool> {
    Ok(prompt_line(&format!("{} [y/n]:", prompt))?
        .is_some_and(|answer| is_yes(&answer)))
}

pub(crate) fn is_yes(answer: &str) -> bool {
    matches!(answer.to_ascii_lowercase().as_str(), "y" | "yes")
}

#[cfg(test)]
#[path = "common_test.rs"]
mod tests;
