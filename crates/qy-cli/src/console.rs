//! Terminal rendering of engine progress.

use indicatif::{ProgressBar, ProgressStyle};
use qy_core::{ModelName, SnapshotTableInfo};
use qy_engine::{Batch, Console, ContextDiff, RunReport};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Prints diffs and results, with progress bars while batches and views
/// are processed.
#[derive(Default)]
pub(crate) struct TerminalConsole {
    evaluation: Mutex<Option<ProgressBar>>,
    promotion: Mutex<Option<ProgressBar>>,
}

impl TerminalConsole {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn start(slot: &Mutex<Option<ProgressBar>>, total: usize, message: String) {
        if total == 0 {
            return;
        }
        let pb = ProgressBar::new(total as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        pb.set_message(message);
        *slot.lock().unwrap_or_else(|p| p.into_inner()) = Some(pb);
    }

    fn with_bar(slot: &Mutex<Option<ProgressBar>>, f: impl FnOnce(&ProgressBar)) {
        if let Some(pb) = slot.lock().unwrap_or_else(|p| p.into_inner()).as_ref() {
            f(pb);
        }
    }

    fn finish(slot: &Mutex<Option<ProgressBar>>) {
        if let Some(pb) = slot.lock().unwrap_or_else(|p| p.into_inner()).take() {
            pb.finish_and_clear();
        }
    }
}

impl Console for TerminalConsole {
    fn show_diff(&self, diff: &ContextDiff) {
        println!("{}", diff.summary());
    }

    fn start_evaluation_progress(&self, batches: &BTreeMap<ModelName, usize>, environment: &str) {
        let total = batches.values().sum();
        Self::start(
            &self.evaluation,
            total,
            format!("Evaluating models for '{}'", environment),
        );
    }

    fn update_snapshot_progress(&self, batch: &Batch, success: bool) {
        Self::with_bar(&self.evaluation, |pb| {
            if success {
                pb.set_message(batch.name.to_string());
            }
            pb.inc(1);
        });
    }

    fn stop_evaluation_progress(&self, report: &RunReport) {
        Self::finish(&self.evaluation);
        println!("{}", report.summary());
        for failure in &report.failed {
            println!("  ✗ {}: {}", failure.batch, failure.error);
        }
        for failure in &report.promotion_failures {
            println!("  ✗ views of {}: {}", failure.batch.name, failure.error);
        }
        for batch in &report.skipped {
            println!("  - {} skipped", batch);
        }
        for audit in report.failed_audits() {
            let severity = if audit.result.blocking { "error" } else { "warning" };
            println!(
                "  ! audit {} on {} found {} row(s) ({})",
                audit.result.audit_name, audit.batch, audit.result.count, severity
            );
        }
    }

    fn start_promotion_progress(&self, environment: &str, count: usize) {
        Self::start(
            &self.promotion,
            count,
            format!("Updating views of '{}'", environment),
        );
    }

    fn update_promotion_progress(&self, _snapshot: &SnapshotTableInfo, _promoted: bool) {
        Self::with_bar(&self.promotion, |pb| pb.inc(1));
    }

    fn stop_promotion_progress(&self, success: bool) {
        Self::finish(&self.promotion);
        if !success {
            eprintln!("Environment views were only partially updated");
        }
    }

    fn log_status_update(&self, message: &str) {
        println!("{}", message);
    }

    fn log_success(&self, message: &str) {
        println!("✓ {}", message);
    }

    fn log_error(&self, message: &str) {
        eprintln!("✗ {}", message);
    }
}
