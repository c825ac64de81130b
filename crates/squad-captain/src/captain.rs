//! The captain: turns a task description into dependency-wired work items,
//! groups them for parallel execution, and routes each group to an agent.
//!
//! Grounded on `ai_squad.core.captain.Captain`. Three algorithms are ported
//! verbatim from there and deliberately kept distinct from
//! `squad_convoy::plan`'s battle-plan grouping, which solves a different
//! problem:
//! - [`Captain::assess_task_complexity`] mirrors `_assess_task_complexity`'s
//!   keyword-matching fallback (strategy selection and sizing both fall
//!   back to fixed keyword lists when no richer classifier is wired in).
//! - [`Captain::identify_parallel_groups`] mirrors `_identify_parallel_groups`'s
//!   full breadth-first grouping by dependency level -- every item whose
//!   dependencies are already in a prior level joins the next one -- unlike
//!   `BattlePlan::get_parallel_groups`, which only follows each phase's own
//!   declared `parallel_with` list.
//! - [`Captain::priority_label`] mirrors `_priority_label`'s numeric
//!   thresholds for mapping a work item's integer priority onto the
//!   router's `RouteRequest.priority` string.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use serde_json::Value;
use squad_convoy::{BattlePlanExecutor, BattlePlanManager, ConvoyManager, CreateConvoyOptions, Worker};
use squad_core::{WorkItem, WorkStatus};
use squad_router::{Candidate, OrgRouter, RouteRequest};
use squad_store::{ListFilter, WorkStore};
use tracing::{info, instrument, warn};

use crate::error::{CaptainError, Result};
use crate::types::{
    BlockerSuggestion, CaptainStatus, Complexity, ConvoyPlan, CoordinationPlan, ExecutionSummary, ParallelBatch, Recommendation,
    SequentialStep, TaskBreakdown,
};

/// Agent roles the coordinator knows how to route to. Mirrors the label set
/// `captain.py`'s helpers recognize: `pm`, `architect`, `engineer`, `ux`,
/// `reviewer`.
pub const KNOWN_ROLES: &[&str] = &["pm", "architect", "engineer", "ux", "reviewer"];

/// A routable agent role and the capability tags it advertises to the
/// router.
#[derive(Debug, Clone)]
pub struct AgentRoleConfig {
    pub name: String,
    pub capability_tags: Vec<String>,
    pub enabled: bool,
}

impl AgentRoleConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), capability_tags: Vec::new(), enabled: true }
    }
}

/// Coordinates work breakdown, convoy planning, and routing for a
/// workspace.
pub struct Captain {
    store: Arc<WorkStore>,
    strategy_manager: Arc<BattlePlanManager>,
    convoy_manager: Option<Arc<ConvoyManager>>,
    org_router: Option<Arc<OrgRouter>>,
    worker: Option<Arc<dyn Worker>>,
    agent_roles: Vec<AgentRoleConfig>,
}

impl Captain {
    pub fn new(store: Arc<WorkStore>, strategy_manager: Arc<BattlePlanManager>) -> Self {
        Self {
            store,
            strategy_manager,
            convoy_manager: None,
            org_router: None,
            worker: None,
            agent_roles: KNOWN_ROLES.iter().map(|r| AgentRoleConfig::new(*r)).collect(),
        }
    }

    pub fn with_convoy_manager(mut self, convoy_manager: Arc<ConvoyManager>) -> Self {
        self.convoy_manager = Some(convoy_manager);
        self
    }

    pub fn with_org_router(mut self, org_router: Arc<OrgRouter>) -> Self {
        self.org_router = Some(org_router);
        self
    }

    pub fn with_worker(mut self, worker: Arc<dyn Worker>) -> Self {
        self.worker = Some(worker);
        self
    }

    pub fn with_agent_roles(mut self, roles: Vec<AgentRoleConfig>) -> Self {
        self.agent_roles = roles;
        self
    }

    /// Deterministic strategy + sizing classifier, mirroring
    /// `_assess_task_complexity`'s keyword fallback (the SDK-backed
    /// classifier it tries first has no equivalent here).
    pub fn assess_task_complexity(&self, task: &str, labels: &[String]) -> (String, Complexity) {
        let lower = task.to_lowercase();

        let strategy = if ["feature", "implement", "create", "add"].iter().any(|kw| lower.contains(kw)) {
            "feature"
        } else if ["bug", "fix", "error", "issue"].iter().any(|kw| lower.contains(kw)) {
            "bugfix"
        } else if ["refactor", "debt", "cleanup", "improve"].iter().any(|kw| lower.contains(kw)) {
            "tech-debt"
        } else if labels.iter().any(|l| l == "enhancement") {
            "feature"
        } else if labels.iter().any(|l| l == "bug") {
            "bugfix"
        } else {
            "feature"
        };

        let complexity = if ["simple", "quick", "small", "minor"].iter().any(|kw| lower.contains(kw)) {
            Complexity::Low
        } else if ["critical", "urgent", "security"].iter().any(|kw| lower.contains(kw)) {
            Complexity::Critical
        } else if ["complex", "large", "major", "critical"].iter().any(|kw| lower.contains(kw)) {
            Complexity::High
        } else {
            Complexity::Medium
        };

        (strategy.to_string(), complexity)
    }

    /// Breaks `task` into dependency-wired work items: a matched strategy's
    /// phases if one is registered, else a fixed three-step
    /// `pm -> engineer -> reviewer` chain.
    #[instrument(skip(self, task, labels))]
    pub async fn analyze_task(&self, task: &str, issue_number: Option<i64>, labels: Vec<String>) -> Result<TaskBreakdown> {
        let (strategy_name, complexity) = self.assess_task_complexity(task, &labels);

        let (work_items, suggested_strategy) = if let Some(plan) = self.strategy_manager.get_strategy(&strategy_name) {
            let executor = BattlePlanExecutor::new(Arc::clone(&self.store));
            let execution = executor.start_execution(&plan, issue_number, BTreeMap::new()).await?;
            let mut items = Vec::with_capacity(execution.work_items.len());
            for phase in &plan.phases {
                if let Some(item_id) = execution.work_items.get(&phase.name) {
                    if let Some(item) = self.store.get_work_item(item_id).await? {
                        items.push(item);
                    }
                }
            }
            (items, Some(strategy_name.clone()))
        } else {
            (self.create_generic_breakdown(task, issue_number).await?, None)
        };

        let parallel_groups = self.identify_parallel_groups(&work_items);
        let estimated_time_minutes = complexity.base_minutes() * parallel_groups.len().max(1) as u32;

        info!(task, strategy = ?suggested_strategy, items = work_items.len(), levels = parallel_groups.len(), "analyzed task");

        Ok(TaskBreakdown {
            original_task: task.to_string(),
            issue_number,
            work_items,
            suggested_strategy,
            parallel_groups,
            estimated_time_minutes,
            complexity,
        })
    }

    /// Fixed fallback breakdown: `[pm] Define requirements` ->
    /// `[engineer] Implement solution` -> `[reviewer] Review implementation`,
    /// mirroring `_create_generic_breakdown`'s fallback path.
    async fn create_generic_breakdown(&self, task: &str, issue_number: Option<i64>) -> Result<Vec<WorkItem>> {
        let pm = self
            .store
            .create_work_item(
                "[pm] Define requirements",
                format!("Define requirements for: {task}"),
                issue_number,
                None,
                vec![],
                vec!["pm".to_string()],
                BTreeMap::new(),
                0,
            )
            .await?;
        let engineer = self
            .store
            .create_work_item(
                "[engineer] Implement solution",
                format!("Implement: {task}"),
                issue_number,
                None,
                vec![pm.id.clone()],
                vec!["engineer".to_string()],
                BTreeMap::new(),
                0,
            )
            .await?;
        let reviewer = self
            .store
            .create_work_item(
                "[reviewer] Review implementation",
                format!("Review implementation for: {task}"),
                issue_number,
                None,
                vec![engineer.id.clone()],
                vec!["reviewer".to_string()],
                BTreeMap::new(),
                0,
            )
            .await?;

        Ok(vec![pm, engineer, reviewer])
    }

    /// Groups `items` into successive dependency levels: level 0 holds every
    /// item whose dependencies are all outside this set (already resolved
    /// elsewhere or absent), and each following level holds items whose
    /// dependencies are entirely satisfied by prior levels. Falls back to a
    /// single group containing every not-yet-placed item if a cycle stalls
    /// the BFS, matching `_identify_parallel_groups`'s stall fallback.
    pub fn identify_parallel_groups(&self, items: &[WorkItem]) -> Vec<Vec<String>> {
        let ids: HashSet<&str> = items.iter().map(|i| i.id.as_str()).collect();
        let mut processed: HashSet<String> = HashSet::new();
        let mut remaining: Vec<&WorkItem> = items.iter().collect();
        let mut groups = Vec::new();

        while !remaining.is_empty() {
            let (ready, blocked): (Vec<&WorkItem>, Vec<&WorkItem>) = remaining.into_iter().partition(|item| {
                item.depends_on.iter().all(|dep| !ids.contains(dep.as_str()) || processed.contains(dep))
            });

            if ready.is_empty() {
                warn!(remaining = blocked.len(), "parallel-group detection stalled, dumping remainder into one group");
                groups.push(blocked.iter().map(|i| i.id.clone()).collect());
                break;
            }

            groups.push(ready.iter().map(|i| i.id.clone()).collect());
            for item in &ready {
                processed.insert(item.id.clone());
            }
            remaining = blocked;
        }

        groups
    }

    /// One [`ConvoyPlan`] per parallel group of `breakdown`.
    pub fn create_convoy_plan(&self, breakdown: &TaskBreakdown) -> Vec<ConvoyPlan> {
        breakdown
            .parallel_groups
            .iter()
            .enumerate()
            .map(|(i, group)| {
                let agents: BTreeSet<String> = group
                    .iter()
                    .filter_map(|id| breakdown.work_items.iter().find(|w| &w.id == id))
                    .map(|item| self.detect_agent(item))
                    .collect();
                ConvoyPlan {
                    id: format!("plan-{i}"),
                    work_items: group.clone(),
                    agents: agents.into_iter().collect(),
                    parallel: group.len() > 1,
                    estimated_time_minutes: 30,
                }
            })
            .collect()
    }

    /// Assigns `item_id` to `agent` after checking it is actually `ready` to
    /// pick up, matching `dispatch_work`'s guard.
    #[instrument(skip(self))]
    pub async fn dispatch_work(&self, item_id: &str, agent: &str) -> Result<bool> {
        let item = self.store.get_work_item(item_id).await?.ok_or_else(|| CaptainError::WorkItemNotFound(item_id.to_string()))?;
        if item.status != WorkStatus::Ready {
            return Err(CaptainError::NotReady(item_id.to_string()));
        }
        Ok(self.store.assign_to_agent(item_id, agent).await?)
    }

    /// Aggregate status, optionally filtered down to a single issue.
    pub async fn get_status(&self, issue_number: Option<i64>) -> Result<CaptainStatus> {
        let stats = self.store.get_stats().await?;
        let filter_issue = |items: Vec<WorkItem>| -> Vec<WorkItem> {
            match issue_number {
                Some(n) => items.into_iter().filter(|i| i.issue_number == Some(n)).collect(),
                None => items,
            }
        };

        let ready = filter_issue(self.store.list_work_items(ListFilter { status: Some(WorkStatus::Ready), ..Default::default() }).await?);
        let in_progress =
            filter_issue(self.store.list_work_items(ListFilter { status: Some(WorkStatus::InProgress), ..Default::default() }).await?);
        let hooked = filter_issue(self.store.list_work_items(ListFilter { status: Some(WorkStatus::Hooked), ..Default::default() }).await?);

        Ok(CaptainStatus { total: stats.total, by_status: stats.by_status, ready, in_progress, hooked })
    }

    /// Transitions `item_id` to `blocked` with `description` recorded as
    /// context, returning a fixed set of fallback suggestions and
    /// `escalate: true`, matching `handle_blocker`'s no-SDK fallback path.
    #[instrument(skip(self))]
    pub async fn handle_blocker(&self, item_id: &str, description: &str) -> Result<BlockerSuggestion> {
        let mut context = BTreeMap::new();
        context.insert("blocker".to_string(), Value::String(description.to_string()));
        self.store.transition_status(item_id, WorkStatus::Blocked, Some(context)).await?;

        Ok(BlockerSuggestion {
            work_item_id: item_id.to_string(),
            suggestions: vec![
                "Escalate to a human reviewer".to_string(),
                "Break the blocker into its own work item".to_string(),
                "Reassign to a different agent".to_string(),
                "Request additional context from the requester".to_string(),
            ],
            escalate: true,
        })
    }

    /// Up to five `dispatch` recommendations (ready items, highest priority
    /// first) plus up to three `resolve_blocker` recommendations (blocked
    /// items), matching `recommend_next_actions`'s fixed caps.
    pub async fn recommend_next_actions(&self) -> Result<Vec<Recommendation>> {
        let ready = self.store.list_work_items(ListFilter { status: Some(WorkStatus::Ready), ..Default::default() }).await?;
        let blocked = self.store.list_work_items(ListFilter { status: Some(WorkStatus::Blocked), ..Default::default() }).await?;

        let mut recommendations: Vec<Recommendation> = ready
            .into_iter()
            .take(5)
            .map(|item| {
                let agent = Some(self.detect_agent(&item));
                Recommendation { action: "dispatch".to_string(), work_item_id: item.id, title: item.title, agent }
            })
            .collect();

        recommendations.extend(blocked.into_iter().take(3).map(|item| Recommendation {
            action: "resolve_blocker".to_string(),
            work_item_id: item.id,
            title: item.title,
            agent: None,
        }));

        Ok(recommendations)
    }

    /// Label-based agent detection, falling back to parsing a `"[role] ..."`
    /// title prefix, then `"engineer"`, matching `_detect_agent`.
    pub fn detect_agent(&self, item: &WorkItem) -> String {
        for role in KNOWN_ROLES {
            if item.labels.iter().any(|l| l == role) {
                return role.to_string();
            }
        }
        if let Some(rest) = item.title.strip_prefix('[') {
            if let Some(end) = rest.find(']') {
                return rest[..end].to_string();
            }
        }
        "engineer".to_string()
    }

    /// Maps a work item's integer priority onto the router's priority
    /// vocabulary, matching `_priority_label`'s thresholds.
    pub fn priority_label(priority: i32) -> &'static str {
        if priority >= 8 {
            "urgent"
        } else if priority >= 5 {
            "high"
        } else if priority <= 0 {
            "low"
        } else {
            "normal"
        }
    }

    async fn route_agent_for_item(&self, item: &WorkItem, default_agent: &str) -> Result<Option<String>> {
        let Some(router) = &self.org_router else { return Ok(Some(default_agent.to_string())) };

        let candidates: Vec<Candidate> = self
            .agent_roles
            .iter()
            .filter(|r| r.enabled)
            .map(|role| {
                let mut candidate = Candidate::new(role.name.clone());
                candidate.capability_tags = role.capability_tags.clone();
                candidate
            })
            .collect();

        let mut request = RouteRequest::new(candidates);
        request.requested_capability_tags = vec![default_agent.to_string()];
        request.priority = Self::priority_label(item.priority).to_string();

        let chosen = router.route(request)?;
        Ok(chosen.map(|c| c.name))
    }

    /// Groups `work_items` by routed agent: items that land on a shared
    /// agent with company become a [`ParallelBatch`] (tagged with a fresh
    /// convoy id), solo items become a [`SequentialStep`], and anything the
    /// router can't place lands in `blocked`. Persists the routing outcome
    /// onto each item's metadata (`routed_agent` or `routing_blocked`).
    #[instrument(skip(self, work_items))]
    pub async fn coordinate(&self, work_items: Vec<WorkItem>) -> Result<CoordinationPlan> {
        let mut by_agent: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut blocked = Vec::new();

        for mut item in work_items {
            let default_agent = self.detect_agent(&item);
            let routed = self.route_agent_for_item(&item, &default_agent).await?;

            match routed {
                None => {
                    item.metadata.insert("routing_blocked".to_string(), Value::Bool(true));
                    self.store.update_work_item(item.clone(), None).await?;
                    blocked.push(item.id.clone());
                }
                Some(agent) => {
                    if agent != default_agent {
                        item.metadata.insert("routed_agent".to_string(), Value::String(agent.clone()));
                        self.store.update_work_item(item.clone(), None).await?;
                    }
                    by_agent.entry(agent).or_default().push(item.id.clone());
                }
            }
        }

        let mut parallel_batches = Vec::new();
        let mut sequential_steps = Vec::new();
        for (agent, item_ids) in by_agent {
            if item_ids.len() > 1 {
                let convoy_id = format!("convoy-{}", &squad_core::ids::entity_id().simple().to_string()[..8]);
                parallel_batches.push(ParallelBatch { convoy_id, agent, work_item_ids: item_ids });
            } else {
                sequential_steps.push(SequentialStep { agent, work_item_id: item_ids.into_iter().next().unwrap() });
            }
        }

        Ok(CoordinationPlan { parallel_batches, sequential_steps, blocked })
    }

    /// Dispatches a [`CoordinationPlan`]: parallel batches run through the
    /// convoy manager when one is configured (falling back to sequential
    /// dispatch through the worker otherwise), then sequential steps run
    /// directly through the worker. Status is `completed` if nothing failed,
    /// `partial` if some did alongside successes, else `failed`.
    #[instrument(skip(self, plan))]
    pub async fn execute_plan(&self, plan: &CoordinationPlan) -> Result<ExecutionSummary> {
        let mut summary = ExecutionSummary::default();

        for batch in &plan.parallel_batches {
            if let Some(convoy_manager) = &self.convoy_manager {
                let members: Vec<(String, String)> = batch.work_item_ids.iter().map(|id| (batch.agent.clone(), id.clone())).collect();
                let convoy = convoy_manager
                    .create_convoy(batch.convoy_id.clone(), members, CreateConvoyOptions::default())
                    .await?;
                let finished = convoy_manager.execute_convoy(&convoy.id, BTreeMap::new()).await?;
                let progress = finished.get_progress();
                summary.completed += progress.completed;
                summary.failed += progress.failed;
                summary.errors.extend(finished.errors);
            } else {
                self.dispatch_sequentially(&batch.agent, &batch.work_item_ids, &mut summary).await;
            }
        }

        let sequential_ids: Vec<(String, String)> = plan.sequential_steps.iter().map(|s| (s.agent.clone(), s.work_item_id.clone())).collect();
        for (agent, item_id) in sequential_ids {
            self.dispatch_sequentially(&agent, std::slice::from_ref(&item_id), &mut summary).await;
        }

        summary.status = if summary.failed == 0 {
            "completed".to_string()
        } else if summary.completed > 0 {
            "partial".to_string()
        } else {
            "failed".to_string()
        };
        Ok(summary)
    }

    async fn dispatch_sequentially(&self, agent: &str, item_ids: &[String], summary: &mut ExecutionSummary) {
        let Some(worker) = &self.worker else {
            summary.errors.push("no worker configured for sequential dispatch".to_string());
            summary.failed += item_ids.len();
            return;
        };
        for item_id in item_ids {
            let request = squad_convoy::WorkRequest {
                agent_type: agent.to_string(),
                work_item_id: item_id.clone(),
                issue_number: None,
                action: "execute".to_string(),
                context: BTreeMap::new(),
            };
            let outcome = worker.dispatch(request).await;
            if outcome.success {
                summary.completed += 1;
                let _ = self.store.complete_work(item_id, outcome.artifacts).await;
            } else {
                summary.failed += 1;
                summary.errors.push(format!("{agent}/{item_id}: {}", outcome.error.unwrap_or_default()));
            }
        }
    }

    /// Coordinates one issue end to end: reuses the issue's existing work
    /// item if one is already tracked, otherwise runs `analyze_task` ->
    /// `create_convoy_plan` -> `recommend_next_actions`, and renders a
    /// Markdown coordination report.
    #[instrument(skip(self, task, labels))]
    pub async fn run(&self, issue_number: i64, task: &str, labels: Vec<String>) -> Result<String> {
        if let Some(existing) = self.store.get_work_item_by_issue(issue_number).await? {
            return Ok(format!(
                "## Coordination Report\nIssue #{issue_number} already tracked as `{}` ({:?}).\n",
                existing.id, existing.status
            ));
        }

        let breakdown = self.analyze_task(task, Some(issue_number), labels).await?;
        let plans = self.create_convoy_plan(&breakdown);
        let recommendations = self.recommend_next_actions().await?;

        let mut report = format!(
            "## Coordination Report\n**Issue**: #{issue_number}\n**Strategy**: {}\n**Complexity**: {:?}\n**Estimated time**: {} minutes\n\n### Work items\n",
            breakdown.suggested_strategy.as_deref().unwrap_or("generic"),
            breakdown.complexity,
            breakdown.estimated_time_minutes
        );
        for item in &breakdown.work_items {
            report.push_str(&format!("- `{}` {}\n", item.id, item.title));
        }

        report.push_str("\n### Convoy plan\n");
        for plan in &plans {
            report.push_str(&format!("- {} ({} items, parallel={})\n", plan.id, plan.work_items.len(), plan.parallel));
        }

        report.push_str("\n### Recommended next actions\n");
        for rec in &recommendations {
            report.push_str(&format!("- [{}] {} -- {}\n", rec.action, rec.work_item_id, rec.title));
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn new_captain() -> (tempfile::TempDir, Arc<WorkStore>, Captain) {
        let dir = tempfile::tempdir().unwrap();
        let config = squad_core::config::WorkspaceConfig::default();
        let store = WorkStore::open(dir.path(), &config).unwrap();
        let strategy_manager = Arc::new(BattlePlanManager::load(None, dir.path()).unwrap());
        let captain = Captain::new(store.clone(), strategy_manager);
        (dir, store, captain)
    }

    #[tokio::test]
    async fn keyword_classifier_matches_python_fallback_lists() {
        let (_dir, _store, captain) = new_captain().await;

        let (strategy, complexity) = captain.assess_task_complexity("Implement a new login feature", &[]);
        assert_eq!(strategy, "feature");
        assert_eq!(complexity, Complexity::Medium);

        let (strategy, complexity) = captain.assess_task_complexity("Fix a critical security bug", &[]);
        assert_eq!(strategy, "bugfix");
        assert_eq!(complexity, Complexity::Critical);
    }

    #[tokio::test]
    async fn generic_breakdown_chains_pm_engineer_reviewer() {
        let (_dir, _store, captain) = new_captain().await;
        let breakdown = captain.analyze_task("Do a thing nobody has a strategy for", None, vec![]).await.unwrap();
        assert_eq!(breakdown.work_items.len(), 3);
        assert_eq!(breakdown.parallel_groups.len(), 3);
        assert!(breakdown.suggested_strategy.is_none());
    }

    #[tokio::test]
    async fn identify_parallel_groups_batches_independent_items_together() {
        let (_dir, store, captain) = new_captain().await;
        let a = store.create_work_item("a", "", None, None, vec![], vec![], BTreeMap::new(), 0).await.unwrap();
        let b = store.create_work_item("b", "", None, None, vec![], vec![], BTreeMap::new(), 0).await.unwrap();
        let c = store.create_work_item("c", "", None, None, vec![a.id.clone(), b.id.clone()], vec![], BTreeMap::new(), 0).await.unwrap();

        let groups = captain.identify_parallel_groups(&[a, b, c]);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].len(), 2);
        assert_eq!(groups[1].len(), 1);
    }

    #[test]
    fn priority_label_matches_python_thresholds() {
        assert_eq!(Captain::priority_label(8), "urgent");
        assert_eq!(Captain::priority_label(5), "high");
        assert_eq!(Captain::priority_label(0), "low");
        assert_eq!(Captain::priority_label(3), "normal");
    }

    #[tokio::test]
    async fn dispatch_work_rejects_non_ready_items() {
        let (_dir, store, captain) = new_captain().await;
        let item = store.create_work_item("t", "d", None, None, vec!["missing".into()], vec![], BTreeMap::new(), 0).await.unwrap();
        let err = captain.dispatch_work(&item.id, "engineer").await.unwrap_err();
        assert!(matches!(err, CaptainError::NotReady(_)));
    }

    #[tokio::test]
    async fn recommend_next_actions_caps_ready_and_blocked() {
        let (_dir, store, captain) = new_captain().await;
        for i in 0..7 {
            store.create_work_item(format!("ready-{i}"), "", None, None, vec![], vec![], BTreeMap::new(), 0).await.unwrap();
        }
        for i in 0..5 {
            store
                .create_work_item(format!("blocked-{i}"), "", None, None, vec!["missing".into()], vec![], BTreeMap::new(), 0)
                .await
                .unwrap();
        }
        let recs = captain.recommend_next_actions().await.unwrap();
        let dispatch_count = recs.iter().filter(|r| r.action == "dispatch").count();
        let blocker_count = recs.iter().filter(|r| r.action == "resolve_blocker").count();
        assert_eq!(dispatch_count, 5);
        assert_eq!(blocker_count, 3);
    }
}
