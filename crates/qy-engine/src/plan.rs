//! Plans: the actionable change-set derived from a context diff.
//!
//! A plan categorizes every new snapshot, assigns versions, and computes
//! the intervals each environment member still needs. It is applied once;
//! a later plan reflects the state the application left behind.

use crate::context_diff::{ContextDiff, ModificationKind};
use crate::error::{EngineError, EngineResult, PlanError};
use qy_core::categorizer::{self, AutoCategorizationMode, CategorizerConfig};
use qy_core::interval::{self, Interval};
use qy_core::time::{day_start, now_ms, parse_end, parse_latest, parse_start, yesterday, DAY_MS};
use qy_core::{
    ChangeCategory, CoreError, Environment, Model, ModelDag, ModelName, Snapshot, Timestamp, PROD,
};
use qy_state::StateReader;
use std::collections::{BTreeMap, BTreeSet};

/// Outcome of a model test run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TestSummary {
    pub passed: usize,
    pub failed: usize,
}

/// Runs unit tests of changed models before a plan is built.
pub trait ModelTestRunner: Send + Sync {
    fn run_tests(&self, models: &[&Model]) -> EngineResult<TestSummary>;
}

/// Flags and bounds of a plan request.
#[derive(Debug, Clone)]
pub struct PlanOptions {
    pub start: Option<String>,
    pub end: Option<String>,
    pub latest: Option<String>,
    /// Environment a new environment is seeded from; production when unset
    pub create_from: Option<String>,
    /// Model or external table names whose data is recomputed
    pub restate_models: Vec<String>,
    pub no_gaps: bool,
    pub skip_backfill: bool,
    pub forward_only: bool,
    pub auto_categorization_enabled: bool,
    pub categorizer: CategorizerConfig,
    pub environment_ttl_ms: i64,
    pub skip_tests: bool,
    /// Reference time; the wall clock when unset
    pub now: Option<Timestamp>,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            start: None,
            end: None,
            latest: None,
            create_from: None,
            restate_models: Vec::new(),
            no_gaps: false,
            skip_backfill: false,
            forward_only: false,
            auto_categorization_enabled: true,
            categorizer: CategorizerConfig::default(),
            environment_ttl_ms: 7 * DAY_MS,
            skip_tests: false,
            now: None,
        }
    }
}

impl PlanOptions {
    /// Reject flag combinations that are inconsistent for `environment`.
    pub fn validate(&self, environment: &str) -> EngineResult<()> {
        if environment == PROD && self.skip_backfill && !self.no_gaps {
            return Err(EngineError::Config(
                "Skipping backfill in production requires no_gaps".into(),
            ));
        }
        if self.environment_ttl_ms <= 0 {
            return Err(EngineError::Config(
                "Environment TTL must be positive".into(),
            ));
        }
        Ok(())
    }

    fn categorization_mode(&self) -> AutoCategorizationMode {
        if self.auto_categorization_enabled {
            self.categorizer.sql
        } else {
            AutoCategorizationMode::Off
        }
    }
}

/// The change-set to apply to one environment.
#[derive(Debug, Clone)]
pub struct Plan {
    pub plan_id: String,
    pub context_diff: ContextDiff,
    pub start: Timestamp,
    pub end: Timestamp,
    pub latest: Timestamp,
    options: PlanOptions,
    now: Timestamp,
    dag: ModelDag,
    choices: BTreeMap<ModelName, ChangeCategory>,
    restatements: BTreeMap<ModelName, Interval>,
    missing: BTreeMap<ModelName, Vec<Interval>>,
}

impl Plan {
    /// Build a plan from `diff`.
    ///
    /// `state` supplies interval history of physical tables the new
    /// snapshots share with stored ones.
    pub fn new<S: StateReader + ?Sized>(
        context_diff: ContextDiff,
        state: &S,
        options: PlanOptions,
        test_runner: Option<&dyn ModelTestRunner>,
    ) -> EngineResult<Self> {
        options.validate(&context_diff.environment)?;
        if context_diff.snapshots.is_empty() {
            return Err(EngineError::Config("There are no models to plan".into()));
        }

        let now = options.now.unwrap_or_else(now_ms);
        let dag = ModelDag::from_models(context_diff.snapshots.values().map(|s| &s.model))?;
        let (start, end, latest) = resolve_range(&context_diff, &options, now)?;

        if !options.skip_tests {
            if let Some(runner) = test_runner {
                let models: Vec<&Model> = context_diff.new_snapshots().map(|s| &s.model).collect();
                if !models.is_empty() {
                    let summary = runner.run_tests(&models)?;
                    if summary.failed > 0 {
                        return Err(PlanError::FailingTests {
                            failed: summary.failed,
                        }
                        .into());
                    }
                }
            }
        }

        let mut plan = Self {
            plan_id: uuid::Uuid::new_v4().simple().to_string(),
            context_diff,
            start,
            end,
            latest,
            options,
            now,
            dag,
            choices: BTreeMap::new(),
            restatements: BTreeMap::new(),
            missing: BTreeMap::new(),
        };
        plan.restatements = plan.compute_restatements()?;
        plan.refresh(state)?;
        Ok(plan)
    }

    /// Categorize a directly modified model explicitly and recompute
    /// everything that depends on it.
    pub fn set_choice<S: StateReader + ?Sized>(
        &mut self,
        name: &str,
        category: ChangeCategory,
        state: &S,
    ) -> EngineResult<()> {
        if !self.context_diff.directly_modified(name) {
            return Err(EngineError::Config(format!(
                "'{}' is not directly modified in this plan",
                name
            )));
        }
        if category == ChangeCategory::Metadata {
            return Err(EngineError::Config(format!(
                "'{}' changes data and cannot be categorized as {}",
                name, category
            )));
        }
        self.choices.insert(ModelName::from(name), category);
        self.refresh(state)
    }

    fn refresh<S: StateReader + ?Sized>(&mut self, state: &S) -> EngineResult<()> {
        self.categorize_changes()?;
        self.attach_shared_intervals(state)?;
        self.missing = self.compute_missing()?;
        if self.options.no_gaps {
            self.ensure_no_gaps()?;
        }
        Ok(())
    }

    fn categorize_changes(&mut self) -> EngineResult<()> {
        let mode = self.options.categorization_mode();
        for name in self.dag.topological_order()? {
            let is_new = self
                .context_diff
                .snapshots
                .get(&name)
                .is_some_and(|s| self.context_diff.new_snapshot_ids.contains(&s.snapshot_id()));
            if !is_new {
                continue;
            }
            let category = self.category_for(&name, mode);
            if let Some(snapshot) = self.context_diff.snapshots.get_mut(&name) {
                match category {
                    Some((category, reuse_previous)) => {
                        snapshot.categorize(category, reuse_previous)
                    }
                    None => snapshot.uncategorize(),
                }
            }
        }
        Ok(())
    }

    /// Category of a new snapshot and whether it keeps the previous version.
    fn category_for(
        &self,
        name: &ModelName,
        mode: AutoCategorizationMode,
    ) -> Option<(ChangeCategory, bool)> {
        let diff = &self.context_diff;
        let Some(previous) = diff.modified.get(name) else {
            return Some((ChangeCategory::Breaking, false));
        };
        match diff.modified_kind(name)? {
            ModificationKind::Metadata => Some((ChangeCategory::Metadata, true)),
            _ if self.options.forward_only => Some((ChangeCategory::ForwardOnly, true)),
            ModificationKind::Direct => {
                if let Some(choice) = self.choices.get(name) {
                    return Some((*choice, *choice == ChangeCategory::ForwardOnly));
                }
                let snapshot = diff.snapshots.get(name)?;
                categorizer::categorize(&previous.model, &snapshot.model, mode)
                    .map(|category| (category, false))
            }
            ModificationKind::Indirect => self.indirect_category(name),
        }
    }

    /// Indirect changes inherit from the changed parents: breaking parents
    /// force a rebuild, anything else keeps the existing table.
    fn indirect_category(&self, name: &ModelName) -> Option<(ChangeCategory, bool)> {
        let diff = &self.context_diff;
        let mut result = (ChangeCategory::NonBreaking, true);
        for parent in self.dag.dependencies(name) {
            if !diff.modified.contains_key(&parent) && !diff.added.contains(&parent) {
                continue;
            }
            match diff.snapshots.get(&parent)?.change_category? {
                ChangeCategory::Breaking => return Some((ChangeCategory::Breaking, false)),
                ChangeCategory::ForwardOnly => result = (ChangeCategory::ForwardOnly, true),
                ChangeCategory::NonBreaking | ChangeCategory::Metadata => {}
            }
        }
        Some(result)
    }

    /// New snapshots adopt the coverage of stored snapshots sharing their
    /// physical table.
    fn attach_shared_intervals<S: StateReader + ?Sized>(&mut self, state: &S) -> EngineResult<()> {
        let versions: Vec<(ModelName, Option<String>)> = self
            .context_diff
            .new_snapshots()
            .map(|s| (s.name.clone(), s.version.clone()))
            .collect();
        for (name, version) in versions {
            let shared = match &version {
                Some(version) => state.get_snapshots_by_version(&name, version)?,
                None => Vec::new(),
            };
            if let Some(snapshot) = self.context_diff.snapshots.get_mut(&name) {
                snapshot.intervals.clear();
                for other in shared {
                    for covered in other.intervals {
                        interval::add_interval(&mut snapshot.intervals, covered);
                    }
                }
            }
        }
        Ok(())
    }

    fn compute_restatements(&self) -> EngineResult<BTreeMap<ModelName, Interval>> {
        if self.options.restate_models.is_empty() {
            return Ok(BTreeMap::new());
        }
        let range = Interval::new(self.start, self.end)?;
        let mut affected = BTreeSet::new();
        for restated in &self.options.restate_models {
            let seeds: Vec<&ModelName> = self
                .context_diff
                .snapshots
                .iter()
                .filter(|(name, s)| *name == restated || s.model.external_deps.contains(restated))
                .map(|(name, _)| name)
                .collect();
            if seeds.is_empty() {
                return Err(EngineError::Config(format!(
                    "No model is or depends on restated table '{}'",
                    restated
                )));
            }
            for seed in seeds {
                affected.insert(seed.clone());
                affected.extend(self.dag.downstream(seed));
            }
        }
        Ok(affected
            .into_iter()
            .filter(|name| {
                self.context_diff
                    .snapshots
                    .get(name)
                    .is_some_and(|s| s.model.kind.is_materialized())
            })
            .map(|name| (name, range))
            .collect())
    }

    fn compute_missing(&self) -> EngineResult<BTreeMap<ModelName, Vec<Interval>>> {
        let mut missing = BTreeMap::new();
        if self.options.skip_backfill {
            return Ok(missing);
        }
        let is_dev = self.is_dev();
        for (name, snapshot) in &self.context_diff.snapshots {
            if !snapshot.is_categorized() {
                continue;
            }
            let intervals = match self.restatements.get(name) {
                Some(restated) => {
                    let mut restated_snapshot = snapshot.clone();
                    restated_snapshot.remove_interval(*restated);
                    restated_snapshot.missing_intervals(self.start, self.end, self.latest, is_dev)?
                }
                None => snapshot.missing_intervals(self.start, self.end, self.latest, is_dev)?,
            };
            if !intervals.is_empty() {
                missing.insert(name.clone(), intervals);
            }
        }
        Ok(missing)
    }

    /// A new table must end up covering everything the table it replaces
    /// covered.
    fn ensure_no_gaps(&self) -> EngineResult<()> {
        let diff = &self.context_diff;
        for (name, previous) in &diff.modified {
            let Some(snapshot) = diff.snapshots.get(name) else {
                continue;
            };
            if !diff.new_snapshot_ids.contains(&snapshot.snapshot_id())
                || !snapshot.is_categorized()
                || !snapshot.model.kind.is_materialized()
                || snapshot.table_version() == previous.table_version()
            {
                continue;
            }

            let mut coverage = snapshot.intervals.clone();
            for planned in self.missing.get(name).into_iter().flatten() {
                interval::add_interval(&mut coverage, *planned);
            }
            let gaps: Vec<Interval> = previous
                .intervals
                .iter()
                .flat_map(|covered| interval::subtract(&coverage, *covered))
                .collect();
            if !gaps.is_empty() {
                return Err(PlanError::Gaps {
                    model: name.to_string(),
                    gaps: gaps
                        .iter()
                        .map(|g| g.to_string())
                        .collect::<Vec<_>>()
                        .join(", "),
                }
                .into());
            }
        }
        Ok(())
    }

    pub fn environment_name(&self) -> &str {
        &self.context_diff.environment
    }

    pub fn is_dev(&self) -> bool {
        self.context_diff.is_dev()
    }

    pub fn has_changes(&self) -> bool {
        self.context_diff.has_changes()
    }

    pub fn requires_backfill(&self) -> bool {
        !self.missing.is_empty()
    }

    pub fn skip_backfill(&self) -> bool {
        self.options.skip_backfill
    }

    pub fn no_gaps(&self) -> bool {
        self.options.no_gaps
    }

    pub fn forward_only(&self) -> bool {
        self.options.forward_only
    }

    /// New snapshots still lacking a category.
    pub fn uncategorized(&self) -> Vec<ModelName> {
        self.context_diff
            .new_snapshots()
            .filter(|s| !s.is_categorized())
            .map(|s| s.name.clone())
            .collect()
    }

    pub fn new_snapshots(&self) -> Vec<&Snapshot> {
        self.context_diff.new_snapshots().collect()
    }

    /// Snapshots whose intervals are invalidated before backfill.
    pub fn restatements(&self) -> &BTreeMap<ModelName, Interval> {
        &self.restatements
    }

    /// Unit intervals each snapshot still needs.
    pub fn missing_intervals(&self) -> &BTreeMap<ModelName, Vec<Interval>> {
        &self.missing
    }

    /// Missing intervals grouped into backfill batches.
    pub fn batches(&self) -> BTreeMap<ModelName, Vec<Interval>> {
        self.missing
            .iter()
            .filter_map(|(name, missing)| {
                let snapshot = self.context_diff.snapshots.get(name)?;
                Some((name.clone(), snapshot.batches(missing)))
            })
            .collect()
    }

    /// The environment record this plan promotes.
    pub fn environment(&self) -> Environment {
        Environment {
            name: self.context_diff.environment.clone(),
            snapshots: self
                .context_diff
                .snapshots
                .values()
                .map(Snapshot::table_info)
                .collect(),
            start_at: self.start,
            end_at: self.options.end.as_ref().map(|_| self.end),
            plan_id: self.plan_id.clone(),
            previous_plan_id: self.context_diff.previous_plan_id.clone(),
            expiration_ts: self
                .is_dev()
                .then(|| self.now.saturating_add(self.options.environment_ttl_ms)),
            finalized_ts: None,
        }
    }
}

/// Start defaults to the earliest model start (else yesterday), end to
/// today's midnight, latest to end.
fn resolve_range(
    diff: &ContextDiff,
    options: &PlanOptions,
    now: Timestamp,
) -> EngineResult<(Timestamp, Timestamp, Timestamp)> {
    let start = match &options.start {
        Some(value) => parse_start(value, now)?,
        None => {
            let mut earliest = None;
            for snapshot in diff.snapshots.values() {
                if let Some(model_start) = snapshot.model_start(now)? {
                    earliest = Some(earliest.map_or(model_start, |e: Timestamp| e.min(model_start)));
                }
            }
            earliest.unwrap_or_else(|| yesterday(now))
        }
    };
    let end = match &options.end {
        Some(value) => parse_end(value, now)?,
        None => day_start(now),
    };
    let latest = match &options.latest {
        Some(value) => parse_latest(value, now)?,
        None => end,
    };
    if start >= end {
        return Err(CoreError::InvalidInterval { start, end }.into());
    }
    Ok((start, end, latest))
}

#[cfg(test)]
#[path = "plan_test.rs"]
mod tests;
