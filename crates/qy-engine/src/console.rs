//! Progress reporting collaborator.
//!
//! Every operation that reports progress receives a [`Console`] handle
//! explicitly. All methods default to doing nothing, so an implementation
//! only overrides what it displays.

use crate::context_diff::ContextDiff;
use crate::scheduler::{Batch, RunReport};
use qy_core::{ModelName, SnapshotTableInfo};
use std::collections::BTreeMap;

/// Receives lifecycle events from the engine.
pub trait Console: Send + Sync {
    /// A diff was computed for display.
    fn show_diff(&self, _diff: &ContextDiff) {}

    /// Backfill is about to run `batches` per snapshot.
    fn start_evaluation_progress(&self, _batches: &BTreeMap<ModelName, usize>, _environment: &str) {}

    /// One batch finished.
    fn update_snapshot_progress(&self, _batch: &Batch, _success: bool) {}

    fn stop_evaluation_progress(&self, _report: &RunReport) {}

    /// Views of `count` snapshots are about to be created.
    fn start_promotion_progress(&self, _environment: &str, _count: usize) {}

    fn update_promotion_progress(&self, _snapshot: &SnapshotTableInfo, _promoted: bool) {}

    fn stop_promotion_progress(&self, _success: bool) {}

    fn log_status_update(&self, _message: &str) {}

    fn log_success(&self, _message: &str) {}

    fn log_error(&self, _message: &str) {}
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopConsole;

impl Console for NoopConsole {}

/// Forwards events to the `log` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogConsole;

impl Console for LogConsole {
    fn show_diff(&self, diff: &ContextDiff) {
        for line in diff.summary().lines() {
            log::info!("{}", line);
        }
    }

    fn start_evaluation_progress(&self, batches: &BTreeMap<ModelName, usize>, environment: &str) {
        let total: usize = batches.values().sum();
        log::info!(
            "Evaluating {} batch(es) of {} snapshot(s) for '{}'",
            total,
            batches.len(),
            environment
        );
    }

    fn update_snapshot_progress(&self, batch: &Batch, success: bool) {
        if success {
            log::debug!("Evaluated {}", batch);
        } else {
            log::warn!("Failed to evaluate {}", batch);
        }
    }

    fn stop_evaluation_progress(&self, report: &RunReport) {
        log::info!("{}", report.summary());
    }

    fn start_promotion_progress(&self, environment: &str, count: usize) {
        log::info!("Promoting {} snapshot(s) into '{}'", count, environment);
    }

    fn update_promotion_progress(&self, snapshot: &SnapshotTableInfo, promoted: bool) {
        let action = if promoted { "Promoted" } else { "Demoted" };
        log::debug!("{} {}", action, snapshot.name);
    }

    fn log_status_update(&self, message: &str) {
        log::info!("{}", message);
    }

    fn log_success(&self, message: &str) {
        log::info!("{}", message);
    }

    fn log_error(&self, message: &str) {
        log::error!("{}", message);
    }
}
