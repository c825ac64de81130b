//! Data shapes passed between the captain's planning and execution stages.

use serde::{Deserialize, Serialize};
use squad_core::WorkItem;

/// Rough sizing bucket for a task, drives both time estimation and whatever
/// downstream triage a caller layers on top.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    Medium,
    High,
    Critical,
}

impl Complexity {
    /// Base minutes per parallel level, mirroring `_estimate_time`'s
    /// `base_times` table.
    pub fn base_minutes(self) -> u32 {
        match self {
            Complexity::Low => 15,
            Complexity::Medium => 30,
            Complexity::High => 60,
            Complexity::Critical => 90,
        }
    }
}

/// The plan produced by [`crate::captain::Captain::analyze_task`]: work
/// items created for the task, grouped into dependency levels that can run
/// concurrently.
#[derive(Debug, Clone, Serialize)]
pub struct TaskBreakdown {
    pub original_task: String,
    pub issue_number: Option<i64>,
    pub work_items: Vec<WorkItem>,
    pub suggested_strategy: Option<String>,
    /// Work item ids, grouped by dependency level -- level 0 has no
    /// unresolved dependencies within the breakdown, level 1 depends only on
    /// level 0, and so on.
    pub parallel_groups: Vec<Vec<String>>,
    pub estimated_time_minutes: u32,
    pub complexity: Complexity,
}

/// One batch of work items meant to run together, derived from a single
/// parallel group of a [`TaskBreakdown`].
#[derive(Debug, Clone, Serialize)]
pub struct ConvoyPlan {
    pub id: String,
    pub work_items: Vec<String>,
    pub agents: Vec<String>,
    pub parallel: bool,
    pub estimated_time_minutes: u32,
}

/// A batch of items assigned to the same agent role, to be dispatched
/// together.
#[derive(Debug, Clone, Serialize)]
pub struct ParallelBatch {
    pub convoy_id: String,
    pub agent: String,
    pub work_item_ids: Vec<String>,
}

/// A single item with no peers sharing its agent role, dispatched on its
/// own rather than batched into a convoy.
#[derive(Debug, Clone, Serialize)]
pub struct SequentialStep {
    pub agent: String,
    pub work_item_id: String,
}

/// Output of [`crate::captain::Captain::coordinate`]: items the router
/// couldn't place for, plus the batches/steps it could.
#[derive(Debug, Clone, Serialize, Default)]
pub struct CoordinationPlan {
    pub parallel_batches: Vec<ParallelBatch>,
    pub sequential_steps: Vec<SequentialStep>,
    pub blocked: Vec<String>,
}

/// A suggested next action surfaced by
/// [`crate::captain::Captain::recommend_next_actions`].
#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    pub action: String,
    pub work_item_id: String,
    pub title: String,
    pub agent: Option<String>,
}

/// Suggestions returned by
/// [`crate::captain::Captain::handle_blocker`].
#[derive(Debug, Clone, Serialize)]
pub struct BlockerSuggestion {
    pub work_item_id: String,
    pub suggestions: Vec<String>,
    pub escalate: bool,
}

/// Aggregate view returned by [`crate::captain::Captain::get_status`].
#[derive(Debug, Clone, Serialize)]
pub struct CaptainStatus {
    pub total: usize,
    pub by_status: std::collections::BTreeMap<String, usize>,
    pub ready: Vec<WorkItem>,
    pub in_progress: Vec<WorkItem>,
    pub hooked: Vec<WorkItem>,
}

/// Result of [`crate::captain::Captain::execute_plan`].
#[derive(Debug, Clone, Serialize, Default)]
pub struct ExecutionSummary {
    pub completed: usize,
    pub failed: usize,
    pub errors: Vec<String>,
    pub status: String,
}
