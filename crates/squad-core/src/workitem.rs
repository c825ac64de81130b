//! The work item: the fundamental unit of work tracked by the store.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids;

/// Lifecycle status of a [`WorkItem`].
///
/// `backlog -> {ready, blocked} -> hooked -> in_progress -> {done, failed}`,
/// with `in_review` available between `in_progress` and `done` for items
/// that pass through a review phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
    Backlog,
    Ready,
    InProgress,
    Hooked,
    Blocked,
    InReview,
    Done,
    Failed,
}

impl WorkStatus {
    /// A completed item is never mutated again except for artifact appends.
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkStatus::Done | WorkStatus::Failed)
    }
}

/// One entry in a work item's audit trail, appended on every transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub field: String,
    pub from: Option<String>,
    pub to: String,
    pub note: Option<String>,
}

/// The fundamental unit of work. See `squad-core::workitem` doc for the
/// invariants this type must uphold; the store is responsible for enforcing
/// them (this struct is a plain data holder).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,
    pub title: String,
    pub description: String,
    pub status: WorkStatus,
    pub issue_number: Option<i64>,
    pub agent_assignee: Option<String>,
    pub depends_on: BTreeSet<String>,
    pub blocks: BTreeSet<String>,
    pub convoy_id: Option<String>,
    pub priority: i32,
    pub labels: BTreeSet<String>,
    pub artifacts: Vec<String>,
    pub context: BTreeMap<String, Value>,
    pub metadata: BTreeMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
    pub session_id: Option<String>,
    pub parent_task_id: Option<String>,
    pub history: Vec<HistoryEntry>,
}

impl WorkItem {
    /// Creates a fresh, unsaved work item in `backlog`.
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: ids::work_item_id(),
            title: title.into(),
            description: description.into(),
            status: WorkStatus::Backlog,
            issue_number: None,
            agent_assignee: None,
            depends_on: BTreeSet::new(),
            blocks: BTreeSet::new(),
            convoy_id: None,
            priority: 0,
            labels: BTreeSet::new(),
            artifacts: Vec::new(),
            context: BTreeMap::new(),
            metadata: BTreeMap::new(),
            created_at: now,
            updated_at: now,
            version: 1,
            session_id: None,
            parent_task_id: None,
            history: Vec::new(),
        }
    }

    /// Appends a history entry and bumps `updated_at`. Does not touch
    /// `version`; the store owns that increment so it stays tied to the
    /// persisted commit, not to in-memory mutation.
    pub fn record_transition(&mut self, field: &str, from: Option<String>, to: String, note: Option<String>) {
        self.updated_at = Utc::now();
        self.history.push(HistoryEntry {
            timestamp: self.updated_at,
            field: field.to_string(),
            from,
            to,
            note,
        });
    }

    /// True once every dependency has terminated, successfully or not --
    /// matches `WorkItem.is_complete` in the original manager, where a
    /// failed dependency still counts as having resolved the blockage.
    pub fn dependencies_satisfied(&self, done: impl Fn(&str) -> bool) -> bool {
        self.depends_on.iter().all(|dep| done(dep))
    }

    /// Hooks the item to `agent` and marks it [`WorkStatus::Hooked`].
    pub fn assign_to(&mut self, agent: impl Into<String>) {
        self.agent_assignee = Some(agent.into());
        self.status = WorkStatus::Hooked;
        self.updated_at = Utc::now();
    }

    /// Clears the assignee. A hooked item falls back to `ready`; any other
    /// status is left alone.
    pub fn unassign(&mut self) {
        self.agent_assignee = None;
        if self.status == WorkStatus::Hooked {
            self.status = WorkStatus::Ready;
        }
        self.updated_at = Utc::now();
    }

    /// Appends `path` if it is not already recorded.
    pub fn add_artifact(&mut self, path: impl Into<String>) {
        let path = path.into();
        if !self.artifacts.contains(&path) {
            self.artifacts.push(path);
            self.updated_at = Utc::now();
        }
    }

    /// Merges `entries` into the saved context, overwriting existing keys.
    pub fn save_context(&mut self, entries: BTreeMap<String, Value>) {
        self.context.extend(entries);
        self.updated_at = Utc::now();
    }

    pub fn is_ready(&self) -> bool {
        self.status == WorkStatus::Ready
    }

    pub fn is_complete(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_item_starts_in_backlog_with_version_one() {
        let item = WorkItem::new("title", "desc");
        assert_eq!(item.status, WorkStatus::Backlog);
        assert_eq!(item.version, 1);
        assert!(item.history.is_empty());
        assert!(item.id.starts_with("sq-"));
    }

    #[test]
    fn dependencies_satisfied_is_vacuously_true_with_no_deps() {
        let item = WorkItem::new("title", "desc");
        assert!(item.dependencies_satisfied(|_| false));
    }
}
