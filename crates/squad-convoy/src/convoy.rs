//! Convoys: batches of independent work items executed in parallel by a
//! bounded pool of workers, with resource-adaptive auto-tuning of that
//! bound.
//!
//! Grounded on `ai_squad.core.convoy`. Two execution modes survive the port
//! unchanged: an ad-hoc `(agent_type, issue)` task list run through a plain
//! semaphore (`ConvoyManager::execute_tasks`), and a full [`Convoy`] object
//! run with auto-tuned parallelism, per-member throttle delay, and a
//! whole-convoy timeout (`ConvoyManager::execute_convoy`). When
//! `stop_on_first_failure` is set, a member failure flips a shared flag that
//! not-yet-started members check before dispatching, skipping rather than
//! running -- cooperative, not a hard abort of in-flight work.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use squad_core::config::ConvoyConfig;
use squad_core::WorkStatus;
use squad_store::WorkStore;
use tokio::sync::Semaphore;
use tracing::{error, info, instrument, warn};

use crate::error::{ConvoyError, Result};
use crate::resource::ResourceMonitor;
use crate::worker::{WorkRequest, Worker};

/// Execution status of a [`Convoy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvoyStatus {
    Pending,
    Running,
    Completed,
    Partial,
    Failed,
    Cancelled,
}

/// Per-member status, tracked independently of the work item's own status
/// so a convoy report can show e.g. `skipped` for cancelled-before-started
/// members without inventing a new `WorkStatus` variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

/// One agent/work-item assignment within a convoy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvoyMember {
    pub agent_type: String,
    pub work_item_id: String,
    pub status: MemberStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<String>,
    pub error: Option<String>,
}

impl ConvoyMember {
    fn new(agent_type: String, work_item_id: String) -> Self {
        Self {
            agent_type,
            work_item_id,
            status: MemberStatus::Pending,
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
        }
    }
}

/// Progress counts over a convoy's members.
#[derive(Debug, Clone, Serialize)]
pub struct ConvoyProgress {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub running: usize,
    pub pending: usize,
    pub progress_percent: u32,
}

/// Resource and scheduling metrics recorded over one `execute_convoy` run.
/// Mirrors the fields `ConvoyMetrics` tracks in the source implementation's
/// metrics collector, without depending on a metrics-sink crate the
/// workspace does not otherwise use -- recorded on the convoy itself and
/// logged at completion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConvoyMetrics {
    pub initial_parallelism: usize,
    pub max_parallelism_used: usize,
    pub completed_members: usize,
    pub failed_members: usize,
    pub peak_cpu_percent: f32,
    pub peak_memory_percent: f32,
    pub duration_seconds: Option<f64>,
}

/// A batch of independent work items meant to run at the same time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Convoy {
    pub id: String,
    pub name: String,
    pub description: String,
    pub status: ConvoyStatus,
    pub members: Vec<ConvoyMember>,

    pub max_parallel: usize,
    pub timeout_minutes: u64,
    pub stop_on_first_failure: bool,

    pub enable_auto_tuning: bool,
    pub baseline_parallel: usize,
    pub cpu_threshold: f32,
    pub memory_threshold: f32,

    pub issue_number: Option<i64>,
    pub plan_execution_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    pub results: BTreeMap<String, String>,
    pub errors: Vec<String>,
    #[serde(default)]
    pub metrics: ConvoyMetrics,
}

impl Convoy {
    pub fn member(&self, work_item_id: &str) -> Option<&ConvoyMember> {
        self.members.iter().find(|m| m.work_item_id == work_item_id)
    }

    pub fn is_complete(&self) -> bool {
        self.members
            .iter()
            .all(|m| matches!(m.status, MemberStatus::Completed | MemberStatus::Failed | MemberStatus::Skipped))
    }

    pub fn get_progress(&self) -> ConvoyProgress {
        let total = self.members.len();
        let completed = self.members.iter().filter(|m| m.status == MemberStatus::Completed).count();
        let failed = self.members.iter().filter(|m| m.status == MemberStatus::Failed).count();
        let running = self.members.iter().filter(|m| m.status == MemberStatus::Running).count();
        let pending = self.members.iter().filter(|m| m.status == MemberStatus::Pending).count();
        let progress_percent = if total > 0 { ((completed + failed) * 100 / total) as u32 } else { 0 };
        ConvoyProgress { total, completed, failed, running, pending, progress_percent }
    }
}

/// Options accepted by [`ConvoyManager::create_convoy`].
#[derive(Debug, Clone)]
pub struct CreateConvoyOptions {
    pub description: String,
    pub max_parallel: usize,
    pub timeout_minutes: u64,
    pub stop_on_first_failure: bool,
    pub enable_auto_tuning: bool,
    pub baseline_parallel: usize,
    pub cpu_threshold: f32,
    pub memory_threshold: f32,
    pub issue_number: Option<i64>,
    pub plan_execution_id: Option<String>,
}

impl Default for CreateConvoyOptions {
    fn default() -> Self {
        let config = ConvoyConfig::default();
        Self {
            description: String::new(),
            max_parallel: config.default_max_parallel,
            timeout_minutes: config.default_timeout_minutes,
            stop_on_first_failure: false,
            enable_auto_tuning: true,
            baseline_parallel: config.baseline_parallel,
            cpu_threshold: config.cpu_threshold,
            memory_threshold: config.memory_threshold,
            issue_number: None,
            plan_execution_id: None,
        }
    }
}

/// Outcome of an ad-hoc `(agent, issue)` task batch run with no backing
/// [`Convoy`] record -- the direct-dispatch mode used when callers don't
/// need a persisted member list, just the aggregate result.
#[derive(Debug, Clone, Serialize)]
pub struct DirectRunResult {
    pub convoy_id: String,
    pub completed: usize,
    pub failed: usize,
    pub errors: Vec<String>,
    pub results: Vec<TaskResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskResult {
    pub agent: String,
    pub issue: String,
    pub result: Option<String>,
}

/// Creates and runs convoys against a shared work store.
pub struct ConvoyManager {
    store: Arc<WorkStore>,
    worker: Option<Arc<dyn Worker>>,
    resource_monitor: Arc<ResourceMonitor>,
    reports_dir: PathBuf,
    convoys: DashMap<String, Convoy>,
}

impl ConvoyManager {
    pub fn new(store: Arc<WorkStore>, worker: Option<Arc<dyn Worker>>, squad_dir: impl AsRef<Path>) -> Self {
        Self {
            store,
            worker,
            resource_monitor: Arc::new(ResourceMonitor::from_config(&ConvoyConfig::default())),
            reports_dir: squad_dir.as_ref().join("reports"),
            convoys: DashMap::new(),
        }
    }

    #[instrument(skip(self, work_items, options))]
    pub async fn create_convoy(
        &self,
        name: impl Into<String>,
        work_items: Vec<(String, String)>,
        options: CreateConvoyOptions,
    ) -> Result<Convoy> {
        let convoy_id = format!("convoy-{}", &squad_core::ids::entity_id().simple().to_string()[..8]);
        let mut members = Vec::with_capacity(work_items.len());

        for (agent_type, work_item_id) in &work_items {
            members.push(ConvoyMember::new(agent_type.clone(), work_item_id.clone()));
            self.store.set_convoy(work_item_id, &convoy_id).await?;
        }

        let convoy = Convoy {
            id: convoy_id.clone(),
            name: name.into(),
            description: options.description,
            status: ConvoyStatus::Pending,
            members,
            max_parallel: options.max_parallel,
            timeout_minutes: options.timeout_minutes,
            stop_on_first_failure: options.stop_on_first_failure,
            enable_auto_tuning: options.enable_auto_tuning,
            baseline_parallel: options.baseline_parallel,
            cpu_threshold: options.cpu_threshold,
            memory_threshold: options.memory_threshold,
            issue_number: options.issue_number,
            plan_execution_id: options.plan_execution_id,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            results: BTreeMap::new(),
            errors: Vec::new(),
            metrics: ConvoyMetrics::default(),
        };

        self.convoys.insert(convoy_id.clone(), convoy.clone());
        info!(convoy_id, members = work_items.len(), "created convoy");
        Ok(convoy)
    }

    pub fn get_convoy(&self, convoy_id: &str) -> Option<Convoy> {
        self.convoys.get(convoy_id).map(|c| c.clone())
    }

    pub fn list_convoys(&self, status: Option<ConvoyStatus>, issue_number: Option<i64>) -> Vec<Convoy> {
        let mut convoys: Vec<Convoy> = self
            .convoys
            .iter()
            .map(|e| e.value().clone())
            .filter(|c| status.map(|s| c.status == s).unwrap_or(true))
            .filter(|c| issue_number.map(|n| c.issue_number == Some(n)).unwrap_or(true))
            .collect();
        convoys.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        convoys
    }

    /// Runs an ad-hoc task list through a plain semaphore, with no backing
    /// [`Convoy`] record -- the direct-dispatch mode `ai_squad.core.convoy`
    /// offers for callers that just want a batch result and don't need a
    /// member list or auto-tuning.
    #[instrument(skip(self, tasks, context))]
    pub async fn execute_tasks(
        &self,
        convoy_id: &str,
        tasks: Vec<(String, String)>,
        context: BTreeMap<String, Value>,
        max_parallel: Option<usize>,
    ) -> Result<DirectRunResult> {
        let worker = self.worker.clone().ok_or(ConvoyError::NoWorker)?;
        let semaphore = Arc::new(Semaphore::new(max_parallel.unwrap_or(5).max(1)));

        let mut handles = Vec::with_capacity(tasks.len());
        for (agent, issue) in tasks {
            let worker = Arc::clone(&worker);
            let semaphore = Arc::clone(&semaphore);
            let context = context.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire().await.expect("semaphore not closed");
                let request = WorkRequest {
                    agent_type: agent.clone(),
                    work_item_id: issue.clone(),
                    issue_number: issue.parse().ok(),
                    action: "execute".to_string(),
                    context,
                };
                let outcome = worker.dispatch(request).await;
                (agent, issue, outcome)
            }));
        }

        let mut results = Vec::new();
        let mut errors = Vec::new();
        for handle in handles {
            match handle.await {
                Ok((agent, issue, outcome)) => {
                    if outcome.success {
                        results.push(TaskResult { agent, issue, result: outcome.output });
                    } else {
                        errors.push(format!("{agent}-{issue}: {}", outcome.error.unwrap_or_default()));
                    }
                }
                Err(join_err) => errors.push(format!("task panicked: {join_err}")),
            }
        }

        let result = DirectRunResult {
            convoy_id: convoy_id.to_string(),
            completed: results.len(),
            failed: errors.len(),
            errors,
            results,
        };

        if let Err(err) = self.write_direct_report(&result) {
            warn!(convoy_id, error = %err, "failed to write direct report");
        }

        Ok(result)
    }

    /// Runs a previously-created [`Convoy`] in full: resource-adaptive
    /// parallelism, per-member throttle delay, and an overall timeout.
    #[instrument(skip(self, context))]
    pub async fn execute_convoy(&self, convoy_id: &str, context: BTreeMap<String, Value>) -> Result<Convoy> {
        let worker = self.worker.clone().ok_or(ConvoyError::NoWorker)?;
        let mut convoy = self.get_convoy(convoy_id).ok_or_else(|| ConvoyError::ConvoyNotFound(convoy_id.to_string()))?;

        convoy.status = ConvoyStatus::Running;
        convoy.started_at = Some(Utc::now());

        let optimal_parallel = if convoy.enable_auto_tuning {
            let config = ConvoyConfig {
                cpu_threshold: convoy.cpu_threshold,
                memory_threshold: convoy.memory_threshold,
                ..ConvoyConfig::default()
            };
            let optimal = self.resource_monitor.calculate_optimal_parallelism(convoy.max_parallel, convoy.baseline_parallel, &config);
            info!(convoy_id, optimal, max = convoy.max_parallel, baseline = convoy.baseline_parallel, "auto-tuning enabled");
            optimal
        } else {
            info!(convoy_id, parallel = convoy.max_parallel, "using fixed parallelism");
            convoy.max_parallel
        };

        let semaphore = Arc::new(Semaphore::new(optimal_parallel.max(1)));
        let store = Arc::clone(&self.store);
        let monitor = Arc::clone(&self.resource_monitor);
        let stop_requested = Arc::new(AtomicBool::new(false));
        let peak_usage = Arc::new(std::sync::Mutex::new((0.0f32, 0.0f32)));

        let members = convoy.members.clone();
        let mut handles = Vec::with_capacity(members.len());
        for member in members {
            let semaphore = Arc::clone(&semaphore);
            let worker = Arc::clone(&worker);
            let store = Arc::clone(&store);
            let monitor = Arc::clone(&monitor);
            let context = context.clone();
            let enable_auto_tuning = convoy.enable_auto_tuning;
            let cpu_threshold = convoy.cpu_threshold;
            let memory_threshold = convoy.memory_threshold;
            let stop_on_first_failure = convoy.stop_on_first_failure;
            let peak_usage = Arc::clone(&peak_usage);
            let stop_requested = Arc::clone(&stop_requested);

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire().await.expect("semaphore not closed");
                let mut member = member;

                if stop_on_first_failure && stop_requested.load(Ordering::Relaxed) {
                    member.status = MemberStatus::Skipped;
                    return member;
                }

                if enable_auto_tuning && monitor.should_throttle(cpu_threshold, memory_threshold) {
                    let factor = monitor.get_throttle_factor(cpu_threshold, memory_threshold);
                    let delay = Duration::from_secs_f32((1.0 - factor) * 5.0);
                    if delay > Duration::from_millis(100) {
                        warn!(work_item_id = %member.work_item_id, throttle = factor, delay_secs = delay.as_secs_f32(), "system under load, delaying member");
                        tokio::time::sleep(delay).await;
                    }
                }

                member.status = MemberStatus::Running;
                member.started_at = Some(Utc::now());
                let _ = store.transition_status(&member.work_item_id, WorkStatus::InProgress, None).await;

                let sample = monitor.get_current_metrics();
                let mut peak = peak_usage.lock().expect("peak usage mutex poisoned");
                peak.0 = peak.0.max(sample.cpu_percent);
                peak.1 = peak.1.max(sample.memory_percent);
                drop(peak);

                let request = WorkRequest {
                    agent_type: member.agent_type.clone(),
                    work_item_id: member.work_item_id.clone(),
                    issue_number: None,
                    action: "execute".to_string(),
                    context,
                };
                let outcome = worker.dispatch(request).await;
                member.completed_at = Some(Utc::now());

                if outcome.success {
                    member.status = MemberStatus::Completed;
                    member.result = outcome.output;
                    let _ = store.complete_work(&member.work_item_id, outcome.artifacts).await;
                    info!(work_item_id = %member.work_item_id, agent = %member.agent_type, "convoy member completed");
                } else {
                    member.status = MemberStatus::Failed;
                    member.error = outcome.error.clone();
                    let mut fail_context = BTreeMap::new();
                    fail_context.insert("error".to_string(), Value::String(outcome.error.clone().unwrap_or_default()));
                    let _ = store.transition_status(&member.work_item_id, WorkStatus::Failed, Some(fail_context)).await;
                    error!(work_item_id = %member.work_item_id, error = ?outcome.error, "convoy member failed");
                    if stop_on_first_failure {
                        stop_requested.store(true, Ordering::Relaxed);
                    }
                }
                member
            }));
        }

        let timeout = Duration::from_secs(convoy.timeout_minutes * 60);
        let join_all = futures::future::join_all(handles);
        match tokio::time::timeout(timeout, join_all).await {
            Ok(outcomes) => {
                let mut updated_members = Vec::with_capacity(outcomes.len());
                for outcome in outcomes {
                    match outcome {
                        Ok(member) => {
                            if member.status == MemberStatus::Failed {
                                convoy.errors.push(format!("{}/{}: {}", member.agent_type, member.work_item_id, member.error.clone().unwrap_or_default()));
                            }
                            updated_members.push(member);
                        }
                        Err(join_err) => convoy.errors.push(format!("convoy task panicked: {join_err}")),
                    }
                }
                convoy.members = updated_members;
            }
            Err(_) => {
                convoy.errors.push(format!("Convoy timed out after {} minutes", convoy.timeout_minutes));
                convoy.status = ConvoyStatus::Failed;
            }
        }

        convoy.completed_at = Some(Utc::now());
        let peak = *peak_usage.lock().expect("peak usage mutex poisoned");
        let duration_seconds = convoy.started_at.map(|start| (convoy.completed_at.unwrap() - start).num_milliseconds() as f64 / 1000.0);
        let progress_before_status = convoy.get_progress();
        convoy.metrics = ConvoyMetrics {
            initial_parallelism: optimal_parallel,
            max_parallelism_used: optimal_parallel,
            completed_members: progress_before_status.completed,
            failed_members: progress_before_status.failed,
            peak_cpu_percent: peak.0,
            peak_memory_percent: peak.1,
            duration_seconds,
        };

        if convoy.status != ConvoyStatus::Failed {
            let progress = convoy.get_progress();
            convoy.status = if progress.failed == 0 {
                ConvoyStatus::Completed
            } else if progress.completed > 0 {
                ConvoyStatus::Partial
            } else {
                ConvoyStatus::Failed
            };
        }

        for member in &convoy.members {
            if let Some(result) = &member.result {
                convoy.results.insert(member.work_item_id.clone(), result.clone());
            }
        }

        info!(
            convoy_id,
            status = ?convoy.status,
            duration_secs = convoy.metrics.duration_seconds,
            completed = convoy.metrics.completed_members,
            total = convoy.members.len(),
            peak_cpu = convoy.metrics.peak_cpu_percent,
            peak_memory = convoy.metrics.peak_memory_percent,
            "convoy finished"
        );
        self.convoys.insert(convoy_id.to_string(), convoy.clone());

        if let Err(err) = self.write_convoy_report(&convoy) {
            warn!(convoy_id, error = %err, "failed to write convoy report");
        }

        Ok(convoy)
    }

    /// Cancels a pending or running convoy, returning any still-pending
    /// members to `ready` so they can be picked up again later.
    #[instrument(skip(self))]
    pub async fn cancel_convoy(&self, convoy_id: &str) -> Result<bool> {
        let Some(mut convoy) = self.get_convoy(convoy_id) else { return Ok(false) };
        if !matches!(convoy.status, ConvoyStatus::Pending | ConvoyStatus::Running) {
            return Ok(false);
        }

        convoy.status = ConvoyStatus::Cancelled;
        convoy.completed_at = Some(Utc::now());

        for member in &mut convoy.members {
            if member.status == MemberStatus::Pending {
                member.status = MemberStatus::Skipped;
                self.store.transition_status(&member.work_item_id, WorkStatus::Ready, None).await?;
            }
        }

        info!(convoy_id, "convoy cancelled");
        self.convoys.insert(convoy_id.to_string(), convoy);
        Ok(true)
    }

    /// A human-readable progress summary, mirroring
    /// `ConvoyManager.get_convoy_summary`'s Markdown report shape.
    pub fn get_convoy_summary(&self, convoy_id: &str) -> Option<String> {
        let convoy = self.get_convoy(convoy_id)?;
        let progress = convoy.get_progress();

        let mut summary = format!(
            "## Convoy: {}\n**ID**: {}\n**Status**: {:?}\n\n### Progress\n- Total Members: {}\n- Completed: {}\n- Running: {}\n- Pending: {}\n- Failed: {}\n- Progress: {}%\n\n### Members\n",
            convoy.name, convoy.id, convoy.status, progress.total, progress.completed, progress.running, progress.pending, progress.failed, progress.progress_percent
        );

        for member in &convoy.members {
            summary.push_str(&format!("- {:?} [{}] {}\n", member.status, member.agent_type, member.work_item_id));
            if let Some(error) = &member.error {
                summary.push_str(&format!("  - Error: {error}\n"));
            }
        }

        if !convoy.errors.is_empty() {
            summary.push_str("\n### Errors\n");
            for error in &convoy.errors {
                summary.push_str(&format!("- {error}\n"));
            }
        }

        summary.push_str(&format!(
            "\n### Metrics\n- Parallelism: {} (peak {})\n- Peak CPU: {:.1}%\n- Peak Memory: {:.1}%\n- Duration: {}\n",
            convoy.metrics.initial_parallelism,
            convoy.metrics.max_parallelism_used,
            convoy.metrics.peak_cpu_percent,
            convoy.metrics.peak_memory_percent,
            convoy.metrics.duration_seconds.map(|d| format!("{d:.2}s")).unwrap_or_else(|| "n/a".to_string()),
        ));

        Some(summary)
    }

    fn write_convoy_report(&self, convoy: &Convoy) -> Result<()> {
        std::fs::create_dir_all(&self.reports_dir).map_err(squad_core::CoreError::from)?;
        let path = self.reports_dir.join(format!("after-operation-{}.md", convoy.id));
        let body = self.get_convoy_summary(&convoy.id).unwrap_or_default();
        std::fs::write(path, body).map_err(squad_core::CoreError::from)?;
        Ok(())
    }

    fn write_direct_report(&self, result: &DirectRunResult) -> Result<()> {
        std::fs::create_dir_all(&self.reports_dir).map_err(squad_core::CoreError::from)?;
        let path = self.reports_dir.join(format!("after-operation-{}.md", result.convoy_id));

        let mut body = format!(
            "## Convoy: {}\n\n### Progress\n- Completed: {}\n- Failed: {}\n\n### Tasks\n",
            result.convoy_id, result.completed, result.failed
        );
        for task in &result.results {
            body.push_str(&format!("- [{}] {}: {}\n", task.agent, task.issue, task.result.as_deref().unwrap_or("(no output)")));
        }
        if !result.errors.is_empty() {
            body.push_str("\n### Errors\n");
            for error in &result.errors {
                body.push_str(&format!("- {error}\n"));
            }
        }

        std::fs::write(path, body).map_err(squad_core::CoreError::from)?;
        Ok(())
    }
}

/// Fluent builder for assembling a convoy's work items before creating it.
pub struct ConvoyBuilder<'a> {
    manager: &'a ConvoyManager,
    store: Arc<WorkStore>,
    name: String,
    description: String,
    work_items: Vec<(String, String)>,
    max_parallel: usize,
    timeout_minutes: u64,
    stop_on_first_failure: bool,
    issue_number: Option<i64>,
    plan_execution_id: Option<String>,
}

impl<'a> ConvoyBuilder<'a> {
    pub fn new(manager: &'a ConvoyManager, store: Arc<WorkStore>) -> Self {
        let config = ConvoyConfig::default();
        Self {
            manager,
            store,
            name: String::new(),
            description: String::new(),
            work_items: Vec::new(),
            max_parallel: config.default_max_parallel,
            timeout_minutes: config.default_timeout_minutes,
            stop_on_first_failure: false,
            issue_number: None,
            plan_execution_id: None,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Creates a fresh work item for `title` and adds it to the convoy.
    pub async fn add_work(mut self, agent_type: impl Into<String>, title: impl Into<String>, description: impl Into<String>) -> Result<Self> {
        let agent_type = agent_type.into();
        let item = self
            .store
            .create_work_item(
                format!("[{agent_type}] {}", title.into()),
                description.into(),
                self.issue_number,
                None,
                vec![],
                vec![agent_type.clone(), "convoy".to_string()],
                BTreeMap::new(),
                0,
            )
            .await?;
        self.work_items.push((agent_type, item.id));
        Ok(self)
    }

    pub fn add_existing_work(mut self, agent_type: impl Into<String>, work_item_id: impl Into<String>) -> Self {
        self.work_items.push((agent_type.into(), work_item_id.into()));
        self
    }

    pub fn max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel;
        self
    }

    pub fn timeout(mut self, minutes: u64) -> Self {
        self.timeout_minutes = minutes;
        self
    }

    pub fn fail_fast(mut self, enabled: bool) -> Self {
        self.stop_on_first_failure = enabled;
        self
    }

    pub fn for_issue(mut self, issue_number: i64) -> Self {
        self.issue_number = Some(issue_number);
        self
    }

    pub fn for_plan(mut self, execution_id: impl Into<String>) -> Self {
        self.plan_execution_id = Some(execution_id.into());
        self
    }

    pub async fn build(self) -> Result<Convoy> {
        let name = if self.name.is_empty() { format!("Convoy {}", Utc::now().format("%Y%m%d-%H%M%S")) } else { self.name };
        let options = CreateConvoyOptions {
            description: self.description,
            max_parallel: self.max_parallel,
            timeout_minutes: self.timeout_minutes,
            stop_on_first_failure: self.stop_on_first_failure,
            issue_number: self.issue_number,
            plan_execution_id: self.plan_execution_id,
            ..CreateConvoyOptions::default()
        };
        self.manager.create_convoy(name, self.work_items, options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::{BlockingWorker, WorkOutcome};

    async fn new_manager() -> (tempfile::TempDir, Arc<WorkStore>, ConvoyManager) {
        let dir = tempfile::tempdir().unwrap();
        let config = squad_core::config::WorkspaceConfig::default();
        let store = WorkStore::open(dir.path(), &config).unwrap();
        let worker: Arc<dyn Worker> = Arc::new(BlockingWorker::new(|_req| WorkOutcome::ok("done")));
        let manager = ConvoyManager::new(store.clone(), Some(worker), dir.path().join(".squad"));
        (dir, store, manager)
    }

    #[tokio::test]
    async fn create_convoy_associates_members_with_the_convoy_id() {
        let (_dir, store, manager) = new_manager().await;
        let item = store.create_work_item("t", "d", None, None, vec![], vec![], BTreeMap::new(), 0).await.unwrap();
        let convoy = manager
            .create_convoy("batch", vec![("engineer".to_string(), item.id.clone())], CreateConvoyOptions::default())
            .await
            .unwrap();

        let reloaded = store.get_work_item(&item.id).await.unwrap().unwrap();
        assert_eq!(reloaded.convoy_id.as_deref(), Some(convoy.id.as_str()));
    }

    #[tokio::test]
    async fn execute_convoy_marks_all_members_completed_on_success() {
        let (_dir, store, manager) = new_manager().await;
        let a = store.create_work_item("a", "", None, None, vec![], vec![], BTreeMap::new(), 0).await.unwrap();
        let b = store.create_work_item("b", "", None, None, vec![], vec![], BTreeMap::new(), 0).await.unwrap();
        let convoy = manager
            .create_convoy(
                "batch",
                vec![("engineer".to_string(), a.id.clone()), ("engineer".to_string(), b.id.clone())],
                CreateConvoyOptions { enable_auto_tuning: false, ..CreateConvoyOptions::default() },
            )
            .await
            .unwrap();

        let finished = manager.execute_convoy(&convoy.id, BTreeMap::new()).await.unwrap();
        assert_eq!(finished.status, ConvoyStatus::Completed);
        assert!(finished.is_complete());
    }

    #[tokio::test]
    async fn execute_tasks_reports_failures_without_a_stored_convoy() {
        let dir = tempfile::tempdir().unwrap();
        let config = squad_core::config::WorkspaceConfig::default();
        let store = WorkStore::open(dir.path(), &config).unwrap();
        let worker: Arc<dyn Worker> = Arc::new(BlockingWorker::new(|req| {
            if req.agent_type == "flaky" { WorkOutcome::failed("boom") } else { WorkOutcome::ok("done") }
        }));
        let manager = ConvoyManager::new(store, Some(worker), dir.path().join(".squad"));

        let result = manager
            .execute_tasks("adhoc-1", vec![("engineer".to_string(), "1".to_string()), ("flaky".to_string(), "2".to_string())], BTreeMap::new(), None)
            .await
            .unwrap();
        assert_eq!(result.completed, 1);
        assert_eq!(result.failed, 1);
    }

    #[tokio::test]
    async fn stop_on_first_failure_skips_members_not_yet_started() {
        let dir = tempfile::tempdir().unwrap();
        let config = squad_core::config::WorkspaceConfig::default();
        let store = WorkStore::open(dir.path(), &config).unwrap();
        let worker: Arc<dyn Worker> = Arc::new(BlockingWorker::new(|req| {
            if req.agent_type == "flaky" { WorkOutcome::failed("boom") } else { WorkOutcome::ok("done") }
        }));
        let manager = ConvoyManager::new(store.clone(), Some(worker), dir.path().join(".squad"));

        let a = store.create_work_item("a", "", None, None, vec![], vec![], BTreeMap::new(), 0).await.unwrap();
        let b = store.create_work_item("b", "", None, None, vec![], vec![], BTreeMap::new(), 0).await.unwrap();
        let convoy = manager
            .create_convoy(
                "batch",
                vec![("flaky".to_string(), a.id.clone()), ("engineer".to_string(), b.id.clone())],
                CreateConvoyOptions { max_parallel: 1, stop_on_first_failure: true, enable_auto_tuning: false, ..CreateConvoyOptions::default() },
            )
            .await
            .unwrap();

        let finished = manager.execute_convoy(&convoy.id, BTreeMap::new()).await.unwrap();
        assert_eq!(finished.status, ConvoyStatus::Failed);
        let second = finished.member(&b.id).unwrap();
        assert_eq!(second.status, MemberStatus::Skipped);
    }

    #[tokio::test]
    async fn cancel_convoy_returns_pending_members_to_ready() {
        let (_dir, store, manager) = new_manager().await;
        let item = store.create_work_item("t", "d", None, None, vec![], vec![], BTreeMap::new(), 0).await.unwrap();
        let convoy = manager
            .create_convoy("batch", vec![("engineer".to_string(), item.id.clone())], CreateConvoyOptions::default())
            .await
            .unwrap();

        assert!(manager.cancel_convoy(&convoy.id).await.unwrap());
        let reloaded = store.get_work_item(&item.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, WorkStatus::Ready);
    }
}
