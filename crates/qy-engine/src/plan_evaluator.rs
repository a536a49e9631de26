//! Applies a plan: records snapshots, creates tables, backfills, promotes.

use crate::console::Console;
use crate::error::{EngineError, EngineResult, PlanError};
use crate::plan::Plan;
use crate::scheduler::{RunReport, Scheduler};
use qy_core::{ModelDag, Snapshot, SnapshotId, SnapshotTableInfo, PROD};
use qy_db::{SnapshotEvaluator, SnapshotsByName};
use qy_state::StateSync;
use std::sync::Arc;

/// Drives the application of plans against one state store and warehouse.
pub struct PlanEvaluator {
    state: Arc<dyn StateSync>,
    evaluator: Arc<dyn SnapshotEvaluator>,
    console: Arc<dyn Console>,
    max_workers: usize,
}

impl PlanEvaluator {
    pub fn new(
        state: Arc<dyn StateSync>,
        evaluator: Arc<dyn SnapshotEvaluator>,
        console: Arc<dyn Console>,
        max_workers: usize,
    ) -> Self {
        Self {
            state,
            evaluator,
            console,
            max_workers,
        }
    }

    /// Apply `plan`.
    ///
    /// Snapshots whose work finished stay promoted when another batch
    /// fails; the environment is only finalized once everything succeeded.
    pub async fn evaluate(&self, plan: &Plan) -> EngineResult<RunReport> {
        let uncategorized = plan.uncategorized();
        if !uncategorized.is_empty() {
            return Err(PlanError::Uncategorized {
                names: uncategorized.iter().map(|n| n.to_string()).collect(),
            }
            .into());
        }

        let environment = plan.environment();
        let is_dev = plan.is_dev();
        let snapshots: SnapshotsByName = plan.context_diff.snapshots.clone();

        self.push(plan)?;
        self.create_tables(plan, &snapshots).await?;
        self.restate(plan)?;

        let promotion = self.state.promote(&environment)?;
        log::info!(
            "Environment '{}': {} snapshot(s) added, {} removed",
            environment.name,
            promotion.added.len(),
            promotion.removed.len()
        );

        let batches = plan.batches();
        let ready: Vec<SnapshotTableInfo> = environment
            .snapshots
            .iter()
            .filter(|info| !batches.contains_key(&info.name))
            .cloned()
            .collect();
        self.console
            .start_promotion_progress(&environment.name, environment.snapshots.len());
        self.evaluator.promote(&ready, &environment.name, is_dev).await?;
        for info in &ready {
            self.console.update_promotion_progress(info, true);
        }

        let scheduler = Scheduler::new(
            snapshots,
            Arc::clone(&self.state),
            Arc::clone(&self.evaluator),
            Arc::clone(&self.console),
            self.max_workers,
        )
        .with_promotion(environment.name.clone());
        let report = scheduler
            .run_batches(&environment.name, batches, plan.latest, is_dev)
            .await?;

        if !report.is_success() {
            self.console.stop_promotion_progress(false);
            return Err(EngineError::Backfill(Box::new(report)));
        }

        self.evaluator
            .demote(&promotion.removed, &environment.name)
            .await?;
        for info in &promotion.removed {
            self.console.update_promotion_progress(info, false);
        }
        self.state.finalize(&environment)?;
        self.console.stop_promotion_progress(true);
        Ok(report)
    }

    /// Record new snapshots; ones stored by an earlier attempt of the same
    /// plan are left alone.
    fn push(&self, plan: &Plan) -> EngineResult<()> {
        let candidates = plan.new_snapshots();
        let ids: Vec<SnapshotId> = candidates.iter().map(|s| s.snapshot_id()).collect();
        let stored = self.state.snapshots_exist(&ids)?;
        let new: Vec<Snapshot> = candidates
            .into_iter()
            .filter(|s| !stored.contains(&s.snapshot_id()))
            .cloned()
            .collect();
        if !new.is_empty() {
            log::debug!("Pushing {} new snapshot(s)", new.len());
            self.state.push_snapshots(&new)?;
        }
        Ok(())
    }

    /// Physical objects of new snapshots, parents first.
    async fn create_tables(&self, plan: &Plan, snapshots: &SnapshotsByName) -> EngineResult<()> {
        let is_dev = plan.is_dev();
        let order = ModelDag::from_models(snapshots.values().map(|s| &s.model))?
            .topological_order()?;
        for name in order {
            let Some(snapshot) = snapshots.get(&name) else {
                continue;
            };
            if plan
                .context_diff
                .new_snapshot_ids
                .contains(&snapshot.snapshot_id())
            {
                self.evaluator.create(snapshot, snapshots, is_dev).await?;
            }
        }
        Ok(())
    }

    /// Production restatements invalidate every table of the model; dev
    /// restatements only touch the environment's own tables.
    fn restate(&self, plan: &Plan) -> EngineResult<()> {
        let all_versions = plan.environment_name() == PROD;
        for (name, interval) in plan.restatements() {
            let Some(snapshot) = plan.context_diff.snapshots.get(name) else {
                continue;
            };
            log::info!("Restating {} {}", name, interval);
            self.state
                .remove_interval(&[snapshot.table_info()], *interval, all_versions)?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "plan_evaluator_test.rs"]
mod tests;
