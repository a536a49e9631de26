//! Expiration sweep over environments and snapshots.

use crate::console::Console;
use crate::error::EngineResult;
use qy_core::{SnapshotId, SnapshotTableInfo, Timestamp};
use qy_db::SnapshotEvaluator;
use qy_state::StateSync;
use std::sync::Arc;

/// What a sweep removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JanitorReport {
    pub environments: Vec<String>,
    pub snapshots: Vec<SnapshotId>,
    /// Physical tables that were dropped
    pub dropped_tables: Vec<String>,
}

impl JanitorReport {
    pub fn is_empty(&self) -> bool {
        self.environments.is_empty() && self.snapshots.is_empty()
    }
}

/// Removes expired environments, then expired unreferenced snapshots.
///
/// Physical objects are always removed before the state records that
/// point at them.
pub struct Janitor {
    state: Arc<dyn StateSync>,
    evaluator: Arc<dyn SnapshotEvaluator>,
    console: Arc<dyn Console>,
}

impl Janitor {
    pub fn new(
        state: Arc<dyn StateSync>,
        evaluator: Arc<dyn SnapshotEvaluator>,
        console: Arc<dyn Console>,
    ) -> Self {
        Self {
            state,
            evaluator,
            console,
        }
    }

    pub async fn run(&self, now: Timestamp) -> EngineResult<JanitorReport> {
        let mut report = JanitorReport::default();

        for environment in self.state.get_expired_environments(now)? {
            self.console.log_status_update(&format!(
                "Removing expired environment '{}'",
                environment.name
            ));
            self.evaluator
                .demote(&environment.snapshots, &environment.name)
                .await?;
        }
        report.environments = self
            .state
            .delete_expired_environments(now)?
            .into_iter()
            .map(|environment| environment.name)
            .collect();

        let droppable: Vec<SnapshotTableInfo> = self
            .state
            .get_expired_snapshots(now)?
            .into_iter()
            .filter(|e| e.drop_table)
            .map(|e| e.table_info)
            .collect();
        if !droppable.is_empty() {
            self.evaluator.cleanup(&droppable).await?;
            report.dropped_tables = droppable.iter().map(|info| info.table_name(false)).collect();
        }
        report.snapshots = self
            .state
            .delete_expired_snapshots(now)?
            .iter()
            .map(|e| e.table_info.snapshot_id())
            .collect();

        log::info!(
            "Janitor removed {} environment(s) and {} snapshot(s)",
            report.environments.len(),
            report.snapshots.len()
        );
        Ok(report)
    }
}

#[cfg(test)]
#[path = "janitor_test.rs"]
mod tests;
