//! Battle plans: named, reusable multi-phase strategies loaded from YAML.
//!
//! Grounded on `ai_squad.core.battle_plan`. A battle plan is a static
//! template (`BattlePlan`/`BattlePlanPhase`); a [`BattlePlanManager`] loads
//! the built-in set plus a workspace's own `.squad/strategies/` directory,
//! with workspace entries overriding built-ins of the same name; a
//! [`BattlePlanExecutor`] turns a plan into work items and drives them to
//! completion one ready step at a time.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use squad_core::WorkStatus;
use squad_store::WorkStore;
use tracing::{info, instrument, warn};

use crate::error::{ConvoyError, Result};
use crate::worker::{WorkRequest, WorkOutcome, Worker};

/// Gates whether a phase runs, evaluated against the outcome of the phases
/// it depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepCondition {
    Always,
    OnSuccess,
    OnFailure,
    Manual,
}

impl Default for StepCondition {
    fn default() -> Self {
        StepCondition::Always
    }
}

fn default_action() -> String {
    "execute".to_string()
}

fn default_timeout_minutes() -> u32 {
    30
}

fn default_version() -> String {
    "1.0".to_string()
}

/// One phase of a battle plan: an agent role, the action it performs, and
/// how it relates to the other phases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BattlePlanPhase {
    pub name: String,
    pub agent: String,
    #[serde(default = "default_action")]
    pub action: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub condition: StepCondition,
    #[serde(default)]
    pub continue_on_error: bool,
    #[serde(default = "default_timeout_minutes")]
    pub timeout_minutes: u32,
    #[serde(default)]
    pub inputs: BTreeMap<String, Value>,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub parallel_with: Vec<String>,
}

/// A named, versioned sequence of phases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BattlePlan {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_version")]
    pub version: String,
    /// Accepts either a `phases` or `steps` key on the wire -- both names
    /// appear across the pack's existing strategy files.
    #[serde(alias = "steps")]
    pub phases: Vec<BattlePlanPhase>,
    #[serde(default)]
    pub variables: BTreeMap<String, Value>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl BattlePlan {
    pub fn from_yaml(raw: &str) -> Result<Self> {
        serde_yaml::from_str(raw).map_err(|e| ConvoyError::Validation(format!("invalid battle plan yaml: {e}")))
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self).map_err(squad_core::CoreError::from)?)
    }

    pub fn phase(&self, name: &str) -> Option<&BattlePlanPhase> {
        self.phases.iter().find(|p| p.name == name)
    }

    /// Groups phases purely by each phase's own declared `parallel_with`
    /// list, in declaration order. This is deliberately simpler than a full
    /// dependency-graph grouping: a phase with no `parallel_with` entries is
    /// always its own singleton group, even if another phase happens to
    /// share its dependencies.
    pub fn get_parallel_groups(&self) -> Vec<Vec<String>> {
        let mut grouped: HashSet<&str> = HashSet::new();
        let mut groups = Vec::new();

        for phase in &self.phases {
            if grouped.contains(phase.name.as_str()) {
                continue;
            }
            let mut group = vec![phase.name.clone()];
            grouped.insert(phase.name.as_str());
            for partner in &phase.parallel_with {
                if !grouped.contains(partner.as_str()) && self.phase(partner).is_some() {
                    group.push(partner.clone());
                    grouped.insert(partner.as_str());
                }
            }
            groups.push(group);
        }
        groups
    }
}

/// Loads and registers battle plans from a built-in directory and a
/// workspace-local override directory.
pub struct BattlePlanManager {
    strategies: std::sync::Mutex<HashMap<String, BattlePlan>>,
    workspace_dir: PathBuf,
}

impl BattlePlanManager {
    /// Loads every `*.yaml`/`*.yml` file under `builtin_dir` (if given) then
    /// `workspace_root/.squad/strategies`, with the workspace copy winning
    /// on a name collision.
    pub fn load(builtin_dir: Option<&Path>, workspace_root: impl AsRef<Path>) -> Result<Self> {
        let mut strategies = HashMap::new();
        if let Some(dir) = builtin_dir {
            Self::load_dir(dir, &mut strategies)?;
        }
        let workspace_dir = workspace_root.as_ref().join(".squad").join("strategies");
        Self::load_dir(&workspace_dir, &mut strategies)?;

        Ok(Self { strategies: std::sync::Mutex::new(strategies), workspace_dir })
    }

    fn load_dir(dir: &Path, out: &mut HashMap<String, BattlePlan>) -> Result<()> {
        let Ok(entries) = fs::read_dir(dir) else {
            return Ok(());
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let is_yaml = path.extension().and_then(|e| e.to_str()).map(|e| e == "yaml" || e == "yml").unwrap_or(false);
            if !is_yaml {
                continue;
            }
            match fs::read_to_string(&path).ok().and_then(|raw| BattlePlan::from_yaml(&raw).ok()) {
                Some(plan) => {
                    out.insert(plan.name.clone(), plan);
                }
                None => warn!(path = %path.display(), "skipping unparseable strategy file"),
            }
        }
        Ok(())
    }

    pub fn get_strategy(&self, name: &str) -> Option<BattlePlan> {
        self.strategies.lock().unwrap().get(name).cloned()
    }

    pub fn list_strategies(&self) -> Vec<BattlePlan> {
        let mut plans: Vec<BattlePlan> = self.strategies.lock().unwrap().values().cloned().collect();
        plans.sort_by(|a, b| a.name.cmp(&b.name));
        plans
    }

    /// Registers `plan` in memory and writes it to the workspace strategies
    /// directory, overwriting any built-in of the same name for the
    /// lifetime of this manager.
    pub fn create_strategy(&self, plan: BattlePlan) -> Result<()> {
        fs::create_dir_all(&self.workspace_dir).map_err(squad_core::CoreError::from)?;
        let path = self.workspace_dir.join(format!("{}.yaml", plan.name));
        fs::write(&path, plan.to_yaml()?).map_err(squad_core::CoreError::from)?;
        self.strategies.lock().unwrap().insert(plan.name.clone(), plan);
        Ok(())
    }

    pub fn delete_strategy(&self, name: &str) -> Result<bool> {
        let mut strategies = self.strategies.lock().unwrap();
        if !strategies.contains_key(name) {
            return Ok(false);
        }
        let path = self.workspace_dir.join(format!("{name}.yaml"));
        let _ = fs::remove_file(path);
        strategies.remove(name);
        Ok(true)
    }
}

/// Lifecycle status of a [`BattlePlanExecution`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Runtime state of one run of a [`BattlePlan`] against a concrete issue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BattlePlanExecution {
    pub id: String,
    pub strategy_name: String,
    pub issue_number: Option<i64>,
    pub status: ExecutionStatus,
    pub current_step: Option<String>,
    pub completed_steps: Vec<String>,
    pub failed_steps: Vec<String>,
    /// Phases bypassed because their `on_success`/`on_failure` condition
    /// didn't match the outcome of the phase(s) they depend on.
    #[serde(default)]
    pub skipped_steps: Vec<String>,
    /// Phase name -> created work item id.
    pub work_items: BTreeMap<String, String>,
    pub variables: BTreeMap<String, Value>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// Drives a [`BattlePlan`] to completion, one ready phase at a time, by
/// projecting each phase onto a work item in the shared store.
pub struct BattlePlanExecutor {
    store: Arc<WorkStore>,
}

impl BattlePlanExecutor {
    pub fn new(store: Arc<WorkStore>) -> Self {
        Self { store }
    }

    /// Creates one work item per phase (wiring `depends_on` by phase-name
    /// lookup) and returns the fresh execution, already `running`.
    #[instrument(skip(self, plan, variable_overrides))]
    pub async fn start_execution(
        &self,
        plan: &BattlePlan,
        issue_number: Option<i64>,
        variable_overrides: BTreeMap<String, Value>,
    ) -> Result<BattlePlanExecution> {
        let execution_id = format!("exec-{}", &squad_core::ids::entity_id().simple().to_string()[..12]);

        let mut variables = plan.variables.clone();
        variables.extend(variable_overrides);

        let mut work_items: BTreeMap<String, String> = BTreeMap::new();
        for phase in &plan.phases {
            let depends_on: Vec<String> = phase
                .depends_on
                .iter()
                .filter_map(|dep_name| work_items.get(dep_name).cloned())
                .collect();

            let item = self
                .store
                .create_work_item(
                    format!("[{}] {}", phase.agent, phase.name),
                    phase.description.clone(),
                    issue_number,
                    None,
                    depends_on,
                    vec![plan.name.clone(), phase.agent.clone(), "strategy-step".to_string()],
                    BTreeMap::new(),
                    0,
                )
                .await?;
            work_items.insert(phase.name.clone(), item.id);
        }

        info!(execution_id, strategy = %plan.name, phases = plan.phases.len(), "started strategy execution");

        Ok(BattlePlanExecution {
            id: execution_id,
            strategy_name: plan.name.clone(),
            issue_number,
            status: ExecutionStatus::Running,
            current_step: None,
            completed_steps: Vec::new(),
            failed_steps: Vec::new(),
            skipped_steps: Vec::new(),
            work_items,
            variables,
            started_at: Some(Utc::now()),
            completed_at: None,
            error: None,
        })
    }

    /// Returns the phase names whose work item is ready to run: neither
    /// already completed/failed, nor still blocked on a dependency.
    pub async fn get_next_steps(&self, plan: &BattlePlan, execution: &BattlePlanExecution) -> Result<Vec<String>> {
        let mut ready = Vec::new();
        for phase in &plan.phases {
            if execution.completed_steps.contains(&phase.name)
                || execution.failed_steps.contains(&phase.name)
                || execution.skipped_steps.contains(&phase.name)
            {
                continue;
            }
            let Some(item_id) = execution.work_items.get(&phase.name) else { continue };
            let Some(item) = self.store.get_work_item(item_id).await? else { continue };
            if item.status == WorkStatus::Ready {
                ready.push(phase.name.clone());
            }
        }
        Ok(ready)
    }

    /// Marks `phase_name`'s work item done and records completion on the
    /// execution, flipping the execution to `completed` once every phase has
    /// terminated.
    pub async fn complete_step(&self, plan: &BattlePlan, execution: &mut BattlePlanExecution, phase_name: &str) -> Result<()> {
        if let Some(item_id) = execution.work_items.get(phase_name) {
            self.store.complete_work(item_id, Vec::new()).await?;
        }
        execution.completed_steps.push(phase_name.to_string());
        self.maybe_finish(plan, execution);
        Ok(())
    }

    fn maybe_finish(&self, plan: &BattlePlan, execution: &mut BattlePlanExecution) {
        let terminal = execution.completed_steps.len() + execution.failed_steps.len() + execution.skipped_steps.len();
        if terminal >= plan.phases.len() && execution.status != ExecutionStatus::Failed {
            execution.status = ExecutionStatus::Completed;
            execution.completed_at = Some(Utc::now());
        }
    }

    /// Marks `phase_name` skipped because its `on_success`/`on_failure`
    /// condition didn't match the outcome of its dependencies.
    async fn skip_step(&self, plan: &BattlePlan, execution: &mut BattlePlanExecution, phase_name: &str) -> Result<()> {
        if let Some(item_id) = execution.work_items.get(phase_name) {
            self.store.complete_work(item_id, Vec::new()).await?;
        }
        execution.skipped_steps.push(phase_name.to_string());
        self.maybe_finish(plan, execution);
        Ok(())
    }

    /// Marks `phase_name`'s work item failed with `error`, fails the
    /// execution outright.
    pub async fn fail_step(&self, execution: &mut BattlePlanExecution, phase_name: &str, error: &str) -> Result<()> {
        if let Some(item_id) = execution.work_items.get(phase_name) {
            let mut context = BTreeMap::new();
            context.insert("error".to_string(), Value::String(error.to_string()));
            self.store.transition_status(item_id, WorkStatus::Failed, Some(context)).await?;
        }
        execution.failed_steps.push(phase_name.to_string());
        execution.status = ExecutionStatus::Failed;
        execution.completed_at = Some(Utc::now());
        execution.error = Some(error.to_string());
        Ok(())
    }

    /// Sweeps phases gated by `on_success`/`on_failure`: skips any whose
    /// dependencies have all terminated without matching the condition, and
    /// force-unblocks `on_failure` phases whose dependency failed (the
    /// store's own dependency semantics only ever unblock on `done`, so a
    /// failed predecessor would otherwise leave such a phase `blocked`
    /// forever). Returns whether anything changed, so the caller knows
    /// whether another pass might surface more ready work.
    async fn skip_unmatched_conditions(&self, plan: &BattlePlan, execution: &mut BattlePlanExecution) -> Result<bool> {
        let mut changed = false;
        for phase in &plan.phases {
            if phase.condition == StepCondition::Always || phase.condition == StepCondition::Manual {
                continue;
            }
            if execution.completed_steps.contains(&phase.name)
                || execution.failed_steps.contains(&phase.name)
                || execution.skipped_steps.contains(&phase.name)
                || phase.depends_on.is_empty()
            {
                continue;
            }
            let deps_terminal = phase
                .depends_on
                .iter()
                .all(|d| execution.completed_steps.contains(d) || execution.failed_steps.contains(d) || execution.skipped_steps.contains(d));
            if !deps_terminal {
                continue;
            }
            let deps_failed = phase.depends_on.iter().any(|d| execution.failed_steps.contains(d));
            let matches = match phase.condition {
                StepCondition::OnSuccess => !deps_failed,
                StepCondition::OnFailure => deps_failed,
                StepCondition::Always | StepCondition::Manual => unreachable!(),
            };

            if !matches {
                self.skip_step(plan, execution, &phase.name).await?;
                changed = true;
            } else if phase.condition == StepCondition::OnFailure {
                if let Some(item_id) = execution.work_items.get(&phase.name) {
                    if let Some(item) = self.store.get_work_item(item_id).await? {
                        if item.status == WorkStatus::Blocked {
                            self.store.transition_status(item_id, WorkStatus::Ready, None).await?;
                            changed = true;
                        }
                    }
                }
            }
        }
        Ok(changed)
    }

    /// Runs `plan` to completion (or first unrecoverable failure), dispatching
    /// each ready phase through `worker`. A phase whose `continue_on_error` is
    /// set lets the run keep going past its own failure; any other failure
    /// stops the whole execution. Before each dispatch pass, phases gated on
    /// `on_success`/`on_failure` are checked against their dependencies'
    /// outcomes and skipped (or unblocked) accordingly.
    #[instrument(skip(self, plan, execution, worker))]
    pub async fn execute_strategy(
        &self,
        plan: &BattlePlan,
        execution: &mut BattlePlanExecution,
        worker: &dyn Worker,
    ) -> Result<()> {
        loop {
            let skipped_this_round = self.skip_unmatched_conditions(plan, execution).await?;

            let next = self.get_next_steps(plan, execution).await?;
            if next.is_empty() {
                if skipped_this_round {
                    continue;
                }
                break;
            }
            for phase_name in next {
                let Some(phase) = plan.phase(&phase_name) else { continue };
                if phase.condition == StepCondition::Manual {
                    continue;
                }
                execution.current_step = Some(phase_name.clone());

                let mut context: BTreeMap<String, Value> = phase.inputs.clone();
                context.extend(execution.variables.clone());

                let request = WorkRequest {
                    agent_type: phase.agent.clone(),
                    work_item_id: execution.work_items.get(&phase_name).cloned().unwrap_or_default(),
                    issue_number: execution.issue_number,
                    action: phase.action.clone(),
                    context,
                };
                let outcome: WorkOutcome = worker.dispatch(request).await;

                if outcome.success {
                    self.complete_step(plan, execution, &phase_name).await?;
                } else {
                    let error = outcome.error.unwrap_or_else(|| "worker reported failure".to_string());
                    self.fail_step(execution, &phase_name, &error).await?;
                    if !phase.continue_on_error {
                        return Ok(());
                    }
                    execution.status = ExecutionStatus::Running;
                    self.maybe_finish(plan, execution);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_plan() -> BattlePlan {
        BattlePlan {
            name: "feature".to_string(),
            description: "ship a feature".to_string(),
            version: "1.0".to_string(),
            phases: vec![
                BattlePlanPhase {
                    name: "design".to_string(),
                    agent: "architect".to_string(),
                    action: "execute".to_string(),
                    description: String::new(),
                    condition: StepCondition::Always,
                    continue_on_error: false,
                    timeout_minutes: 30,
                    inputs: BTreeMap::new(),
                    outputs: Vec::new(),
                    depends_on: Vec::new(),
                    parallel_with: Vec::new(),
                },
                BattlePlanPhase {
                    name: "implement".to_string(),
                    agent: "engineer".to_string(),
                    action: "execute".to_string(),
                    description: String::new(),
                    condition: StepCondition::Always,
                    continue_on_error: false,
                    timeout_minutes: 30,
                    inputs: BTreeMap::new(),
                    outputs: Vec::new(),
                    depends_on: vec!["design".to_string()],
                    parallel_with: Vec::new(),
                },
            ],
            variables: BTreeMap::new(),
            labels: Vec::new(),
            created_at: None,
        }
    }

    #[test]
    fn parallel_groups_only_follow_explicit_lists() {
        let mut plan = sample_plan();
        plan.phases[0].parallel_with = vec!["implement".to_string()];
        let groups = plan.get_parallel_groups();
        assert_eq!(groups, vec![vec!["design".to_string(), "implement".to_string()]]);
    }

    #[test]
    fn phase_with_no_parallel_with_is_a_singleton_group() {
        let plan = sample_plan();
        let groups = plan.get_parallel_groups();
        assert_eq!(groups, vec![vec!["design".to_string()], vec!["implement".to_string()]]);
    }

    #[test]
    fn yaml_round_trips_and_accepts_steps_alias() {
        let plan = sample_plan();
        let yaml = plan.to_yaml().unwrap();
        let back = BattlePlan::from_yaml(&yaml).unwrap();
        assert_eq!(back.phases.len(), 2);

        let steps_yaml = "name: legacy\nsteps:\n  - name: only\n    agent: engineer\n";
        let legacy = BattlePlan::from_yaml(steps_yaml).unwrap();
        assert_eq!(legacy.phases.len(), 1);
    }

    #[tokio::test]
    async fn start_execution_wires_dependencies_by_phase_name() {
        let dir = tempfile::tempdir().unwrap();
        let config = squad_core::config::WorkspaceConfig::default();
        let store = WorkStore::open(dir.path(), &config).unwrap();
        let executor = BattlePlanExecutor::new(store.clone());
        let plan = sample_plan();

        let execution = executor.start_execution(&plan, Some(42), BTreeMap::new()).await.unwrap();
        assert_eq!(execution.work_items.len(), 2);

        let implement_id = execution.work_items.get("implement").unwrap();
        let implement = store.get_work_item(implement_id).await.unwrap().unwrap();
        assert_eq!(implement.status, WorkStatus::Blocked);

        let design_id = execution.work_items.get("design").unwrap();
        let design = store.get_work_item(design_id).await.unwrap().unwrap();
        assert_eq!(design.status, WorkStatus::Ready);
    }

    #[tokio::test]
    async fn get_next_steps_only_returns_ready_work() {
        let dir = tempfile::tempdir().unwrap();
        let config = squad_core::config::WorkspaceConfig::default();
        let store = WorkStore::open(dir.path(), &config).unwrap();
        let executor = BattlePlanExecutor::new(store.clone());
        let plan = sample_plan();
        let execution = executor.start_execution(&plan, None, BTreeMap::new()).await.unwrap();

        let next = executor.get_next_steps(&plan, &execution).await.unwrap();
        assert_eq!(next, vec!["design".to_string()]);
    }

    #[tokio::test]
    async fn on_failure_phase_runs_and_on_success_phase_is_skipped_after_a_failure() {
        use crate::worker::{BlockingWorker, WorkOutcome};

        let dir = tempfile::tempdir().unwrap();
        let config = squad_core::config::WorkspaceConfig::default();
        let store = WorkStore::open(dir.path(), &config).unwrap();
        let executor = BattlePlanExecutor::new(store.clone());

        let mut plan = sample_plan();
        plan.phases[1].continue_on_error = true;
        plan.phases.push(BattlePlanPhase {
            name: "notify_success".to_string(),
            agent: "pm".to_string(),
            action: "execute".to_string(),
            description: String::new(),
            condition: StepCondition::OnSuccess,
            continue_on_error: true,
            timeout_minutes: 30,
            inputs: BTreeMap::new(),
            outputs: Vec::new(),
            depends_on: vec!["implement".to_string()],
            parallel_with: Vec::new(),
        });
        plan.phases.push(BattlePlanPhase {
            name: "rollback".to_string(),
            agent: "engineer".to_string(),
            action: "execute".to_string(),
            description: String::new(),
            condition: StepCondition::OnFailure,
            continue_on_error: true,
            timeout_minutes: 30,
            inputs: BTreeMap::new(),
            outputs: Vec::new(),
            depends_on: vec!["implement".to_string()],
            parallel_with: Vec::new(),
        });

        let mut execution = executor.start_execution(&plan, None, BTreeMap::new()).await.unwrap();

        // "design" succeeds; "implement" (engineer's first call) fails so the
        // on_success-gated phase is skipped and the on_failure-gated one runs.
        let call_count = std::sync::atomic::AtomicUsize::new(0);
        let worker = BlockingWorker::new(move |req| {
            if req.agent_type == "engineer" && call_count.fetch_add(1, std::sync::atomic::Ordering::Relaxed) == 0 {
                WorkOutcome::failed("build broke")
            } else {
                WorkOutcome::ok("done")
            }
        });

        executor.execute_strategy(&plan, &mut execution, &worker).await.unwrap();

        assert!(execution.failed_steps.contains(&"implement".to_string()));
        assert!(execution.skipped_steps.contains(&"notify_success".to_string()));
        assert!(execution.completed_steps.contains(&"rollback".to_string()));
        assert_eq!(execution.status, ExecutionStatus::Completed);
    }
}
