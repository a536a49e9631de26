//! DAG-ordered concurrent backfill.
//!
//! Work is split into batches (one snapshot, one interval). A batch starts
//! once every overlapping batch of its nearest upstream snapshots with work
//! has succeeded; independent batches run concurrently, bounded by a
//! semaphore. A failed batch causes its dependents to be skipped while
//! unrelated branches continue.

use crate::console::Console;
use crate::error::EngineResult;
use qy_core::{Interval, ModelName, Timestamp};
use qy_db::{AuditResult, SnapshotEvaluator, SnapshotsByName};
use qy_state::StateSync;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// One interval of one snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Batch {
    pub name: ModelName,
    pub interval: Interval,
}

impl fmt::Display for Batch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.interval)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFailure {
    pub batch: Batch,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotAuditResult {
    pub batch: Batch,
    pub result: AuditResult,
}

/// Aggregated outcome of a backfill.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub completed: Vec<Batch>,
    pub failed: Vec<BatchFailure>,
    /// Batches not attempted because an upstream batch failed
    pub skipped: Vec<Batch>,
    pub audit_results: Vec<SnapshotAuditResult>,
    /// Audits that could not be executed
    pub audit_errors: Vec<BatchFailure>,
    /// Snapshots whose data is complete but whose views could not be
    /// created; the batch is the last one of the snapshot
    pub promotion_failures: Vec<BatchFailure>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
            && self.skipped.is_empty()
            && self.promotion_failures.is_empty()
            && self.blocking_audit_failures().next().is_none()
    }

    pub fn failed_audits(&self) -> impl Iterator<Item = &SnapshotAuditResult> {
        self.audit_results.iter().filter(|a| !a.result.passed())
    }

    pub fn blocking_audit_failures(&self) -> impl Iterator<Item = &SnapshotAuditResult> {
        self.failed_audits().filter(|a| a.result.blocking)
    }

    pub fn summary(&self) -> String {
        let mut summary = format!(
            "{} batch(es) completed, {} failed, {} skipped, {} audit(s) failed, {} audit error(s)",
            self.completed.len(),
            self.failed.len(),
            self.skipped.len(),
            self.failed_audits().count(),
            self.audit_errors.len()
        );
        if !self.promotion_failures.is_empty() {
            summary.push_str(&format!(
                ", {} promotion failure(s)",
                self.promotion_failures.len()
            ));
        }
        summary
    }
}

/// Executes backfill batches over one set of snapshots.
pub struct Scheduler {
    snapshots: Arc<SnapshotsByName>,
    state: Arc<dyn StateSync>,
    evaluator: Arc<dyn SnapshotEvaluator>,
    console: Arc<dyn Console>,
    max_workers: usize,
    promote_into: Option<String>,
}

impl Scheduler {
    pub fn new(
        snapshots: SnapshotsByName,
        state: Arc<dyn StateSync>,
        evaluator: Arc<dyn SnapshotEvaluator>,
        console: Arc<dyn Console>,
        max_workers: usize,
    ) -> Self {
        Self {
            snapshots: Arc::new(snapshots),
            state,
            evaluator,
            console,
            max_workers: max_workers.max(1),
            promote_into: None,
        }
    }

    /// Create a snapshot's views in `environment` once all its batches
    /// succeeded.
    pub fn with_promotion(mut self, environment: impl Into<String>) -> Self {
        self.promote_into = Some(environment.into());
        self
    }

    /// Missing intervals of every snapshot, grouped into batches.
    pub fn batches(
        &self,
        start: Timestamp,
        end: Timestamp,
        latest: Timestamp,
        is_dev: bool,
    ) -> EngineResult<BTreeMap<ModelName, Vec<Interval>>> {
        let mut batches = BTreeMap::new();
        for (name, snapshot) in self.snapshots.iter() {
            let missing = snapshot.missing_intervals(start, end, latest, is_dev)?;
            if !missing.is_empty() {
                batches.insert(name.clone(), snapshot.batches(&missing));
            }
        }
        Ok(batches)
    }

    /// Backfill everything missing in `[start, end)`.
    pub async fn run(
        &self,
        environment: &str,
        start: Timestamp,
        end: Timestamp,
        latest: Timestamp,
        is_dev: bool,
    ) -> EngineResult<RunReport> {
        let batches = self.batches(start, end, latest, is_dev)?;
        self.run_batches(environment, batches, latest, is_dev).await
    }

    /// Execute the given batches.
    pub async fn run_batches(
        &self,
        environment: &str,
        batches: BTreeMap<ModelName, Vec<Interval>>,
        latest: Timestamp,
        is_dev: bool,
    ) -> EngineResult<RunReport> {
        let mut pending = self.dependencies(&batches);
        let mut remaining: BTreeMap<ModelName, usize> = batches
            .iter()
            .filter(|(_, intervals)| !intervals.is_empty())
            .map(|(name, intervals)| (name.clone(), intervals.len()))
            .collect();
        self.console.start_evaluation_progress(&remaining, environment);

        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut running: BTreeSet<Batch> = BTreeSet::new();
        let mut tasks = JoinSet::new();
        let mut report = RunReport::default();

        loop {
            let ready: Vec<Batch> = pending
                .iter()
                .filter(|(_, deps)| deps.is_empty())
                .map(|(batch, _)| batch.clone())
                .collect();
            for batch in ready {
                pending.remove(&batch);
                running.insert(batch.clone());

                let snapshots = Arc::clone(&self.snapshots);
                let state = Arc::clone(&self.state);
                let evaluator = Arc::clone(&self.evaluator);
                let semaphore = Arc::clone(&semaphore);
                tasks.spawn(async move {
                    let outcome = match semaphore.acquire_owned().await {
                        Ok(_permit) => {
                            execute_batch(
                                evaluator.as_ref(),
                                state.as_ref(),
                                &snapshots,
                                &batch,
                                latest,
                                is_dev,
                            )
                            .await
                        }
                        Err(e) => Err(e.to_string()),
                    };
                    (batch, outcome)
                });
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };
            let (batch, outcome) = match joined {
                Ok(result) => result,
                Err(e) => {
                    log::error!("Backfill task aborted: {}", e);
                    continue;
                }
            };
            running.remove(&batch);

            match outcome {
                Ok(outcome) => {
                    self.console.update_snapshot_progress(&batch, true);
                    report
                        .audit_results
                        .extend(outcome.audits.into_iter().map(|result| SnapshotAuditResult {
                            batch: batch.clone(),
                            result,
                        }));
                    if let Some(error) = outcome.audit_error {
                        report.audit_errors.push(BatchFailure {
                            batch: batch.clone(),
                            error,
                        });
                    }
                    for deps in pending.values_mut() {
                        deps.remove(&batch);
                    }
                    let finished = remaining.get_mut(&batch.name).is_some_and(|count| {
                        *count -= 1;
                        *count == 0
                    });
                    if finished {
                        remaining.remove(&batch.name);
                        if let Err(e) = self.promote(&batch.name, is_dev).await {
                            log::error!("Promoting {} failed: {}", batch.name, e);
                            report.promotion_failures.push(BatchFailure {
                                batch: batch.clone(),
                                error: e.to_string(),
                            });
                        }
                    }
                    report.completed.push(batch);
                }
                Err(error) => {
                    self.console.update_snapshot_progress(&batch, false);
                    log::error!("{} failed: {}", batch, error);
                    remaining.remove(&batch.name);
                    skip_dependents(&mut pending, &batch, &mut remaining, &mut report.skipped);
                    report.failed.push(BatchFailure { batch, error });
                }
            }
        }

        // A panicked task never reports back.
        for batch in running {
            report.failed.push(BatchFailure {
                batch,
                error: "task aborted".into(),
            });
        }
        report.skipped.extend(pending.into_keys());

        self.console.stop_evaluation_progress(&report);
        Ok(report)
    }

    async fn promote(&self, name: &ModelName, is_dev: bool) -> EngineResult<()> {
        let (Some(environment), Some(snapshot)) = (&self.promote_into, self.snapshots.get(name))
        else {
            return Ok(());
        };
        let info = snapshot.table_info();
        self.evaluator
            .promote(std::slice::from_ref(&info), environment, is_dev)
            .await?;
        self.console.update_promotion_progress(&info, true);
        Ok(())
    }

    /// Batches each batch waits for.
    fn dependencies(
        &self,
        batches: &BTreeMap<ModelName, Vec<Interval>>,
    ) -> BTreeMap<Batch, BTreeSet<Batch>> {
        let mut graph = BTreeMap::new();
        for (name, intervals) in batches {
            let incremental = self.batches_by_interval(name);
            let upstream = self.upstream_with_work(name, batches);
            for interval in intervals {
                let mut deps = BTreeSet::new();
                for parent in &upstream {
                    let parent_incremental = self.batches_by_interval(parent);
                    for parent_interval in batches.get(parent).into_iter().flatten() {
                        if !incremental || !parent_incremental || parent_interval.overlaps(interval)
                        {
                            deps.insert(Batch {
                                name: parent.clone(),
                                interval: *parent_interval,
                            });
                        }
                    }
                }
                graph.insert(
                    Batch {
                        name: name.clone(),
                        interval: *interval,
                    },
                    deps,
                );
            }
        }
        graph
    }

    fn batches_by_interval(&self, name: &ModelName) -> bool {
        self.snapshots
            .get(name)
            .is_some_and(|s| s.model.kind.batches_by_interval())
    }

    fn parents(&self, name: &ModelName) -> Vec<ModelName> {
        self.snapshots
            .get(name)
            .map(|s| {
                s.model
                    .depends_on
                    .iter()
                    .filter(|dep| self.snapshots.contains_key(*dep))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Nearest ancestors that have batches; ancestors without work are
    /// looked through.
    fn upstream_with_work(
        &self,
        name: &ModelName,
        batches: &BTreeMap<ModelName, Vec<Interval>>,
    ) -> BTreeSet<ModelName> {
        let mut result = BTreeSet::new();
        let mut seen = BTreeSet::new();
        let mut stack = self.parents(name);
        while let Some(parent) = stack.pop() {
            if !seen.insert(parent.clone()) {
                continue;
            }
            if batches.contains_key(&parent) {
                result.insert(parent);
            } else {
                stack.extend(self.parents(&parent));
            }
        }
        result
    }
}

struct BatchOutcome {
    audits: Vec<AuditResult>,
    audit_error: Option<String>,
}

/// Evaluate, record, then audit one batch.
async fn execute_batch(
    evaluator: &dyn SnapshotEvaluator,
    state: &dyn StateSync,
    snapshots: &SnapshotsByName,
    batch: &Batch,
    latest: Timestamp,
    is_dev: bool,
) -> Result<BatchOutcome, String> {
    let snapshot = snapshots
        .get(&batch.name)
        .ok_or_else(|| format!("Snapshot '{}' is not part of this run", batch.name))?;

    evaluator
        .evaluate(snapshot, batch.interval, latest, snapshots, is_dev, None)
        .await
        .map_err(|e| e.to_string())?;
    state
        .add_interval(snapshot, batch.interval, is_dev)
        .map_err(|e| e.to_string())?;

    let outcome = match evaluator
        .audit(snapshot, batch.interval, latest, snapshots, is_dev)
        .await
    {
        Ok(audits) => BatchOutcome {
            audits,
            audit_error: None,
        },
        Err(e) => {
            log::warn!("Audits of {} could not run: {}", batch, e);
            BatchOutcome {
                audits: Vec::new(),
                audit_error: Some(e.to_string()),
            }
        }
    };
    for failed in outcome.audits.iter().filter(|a| !a.passed()) {
        log::warn!(
            "Audit '{}' of {} found {} offending row(s)",
            failed.audit_name,
            batch,
            failed.count
        );
    }
    Ok(outcome)
}

/// Move every batch transitively waiting on `failed` to `skipped`.
fn skip_dependents(
    pending: &mut BTreeMap<Batch, BTreeSet<Batch>>,
    failed: &Batch,
    remaining: &mut BTreeMap<ModelName, usize>,
    skipped: &mut Vec<Batch>,
) {
    let mut frontier = vec![failed.clone()];
    while let Some(current) = frontier.pop() {
        let dependents: Vec<Batch> = pending
            .iter()
            .filter(|(_, deps)| deps.contains(&current))
            .map(|(batch, _)| batch.clone())
            .collect();
        for batch in dependents {
            pending.remove(&batch);
            remaining.remove(&batch.name);
            skipped.push(batch.clone());
            frontier.push(batch);
        }
    }
}

#[cfg(test)]
#[path = "scheduler_test.rs"]
mod tests;
