//! The work-state store: durable CRUD over [`WorkItem`]s, dependency
//! tracking, and the operational-graph sync hook.
//!
//! Grounded on `ai_squad.core.workstate.WorkStateManager`: every mutation
//! runs inside a [`TransactionalStore::transact`] closure so a crash mid-write
//! never corrupts `workstate.json`, and every closure that changes a blocked
//! item's dependency set is followed by [`WorkStore::update_blocked_items`]
//! so `blocked -> ready` promotion is never missed.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use squad_core::config::WorkspaceConfig;
use squad_core::graph::{EdgeKind, NodeKind, NodeRef, OperationalGraph};
use squad_core::persist::TransactionalStore;
use squad_core::{WorkItem, WorkStatus};
use tracing::{info, instrument, warn};

use crate::error::{Result, StoreError};
use crate::hooks::HookManager;

/// In-memory document shape persisted to `workstate.json`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct WorkItemsState {
    items: BTreeMap<String, WorkItem>,
}

/// Optional filters for [`WorkStore::list_work_items`].
#[derive(Debug, Default, Clone)]
pub struct ListFilter {
    pub status: Option<WorkStatus>,
    pub agent: Option<String>,
    pub convoy_id: Option<String>,
}

/// Aggregate counts returned by [`WorkStore::get_stats`].
#[derive(Debug, Clone, Serialize)]
pub struct WorkStats {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
    pub by_agent: BTreeMap<String, usize>,
    pub blocked: usize,
    pub in_progress: usize,
    pub completed: usize,
}

/// Durable work-item store for a single workspace root.
pub struct WorkStore {
    state: Arc<TransactionalStore<WorkItemsState>>,
    graph: Arc<TransactionalStore<OperationalGraph>>,
    hooks: HookManager,
    hooks_enabled: bool,
}

impl WorkStore {
    /// Opens the store rooted at `workspace_root`, using `config` for the
    /// `.squad` directory layout and hook behavior.
    pub fn open(workspace_root: impl AsRef<Path>, config: &WorkspaceConfig) -> Result<Arc<Self>> {
        let workspace_root = workspace_root.as_ref();
        let squad_dir = workspace_root.join(&config.squad_dir);
        let state = TransactionalStore::open(squad_dir.join("workstate.json"))?;
        let graph = TransactionalStore::open(squad_dir.join("graph.json"))?;
        let hooks_dir = squad_dir.join("hooks");
        let hooks = HookManager::new(workspace_root, Some(&hooks_dir.to_string_lossy()), config.hooks.checkout_working_tree);

        Ok(Arc::new(Self {
            state,
            graph,
            hooks,
            hooks_enabled: config.hooks.enabled,
        }))
    }

    fn path(&self) -> &Path {
        self.state.path()
    }

    // -- CRUD -----------------------------------------------------------

    #[instrument(skip(self, metadata))]
    pub async fn create_work_item(
        &self,
        title: impl Into<String> + std::fmt::Debug,
        description: impl Into<String>,
        issue_number: Option<i64>,
        agent: Option<String>,
        depends_on: Vec<String>,
        labels: Vec<String>,
        metadata: BTreeMap<String, Value>,
        priority: i32,
    ) -> Result<WorkItem> {
        let title = title.into();
        let description = description.into();
        let depends_on_set: BTreeSet<String> = depends_on.into_iter().collect();
        let labels_set: BTreeSet<String> = labels.into_iter().collect();

        let item = self
            .state
            .transact(move |s| {
                let mut item = WorkItem::new(title, description);
                item.issue_number = issue_number;
                item.labels = labels_set;
                item.metadata = metadata;
                item.priority = priority;
                item.depends_on = depends_on_set;

                if !item.depends_on.is_empty() {
                    let satisfied = item.dependencies_satisfied(|dep| {
                        s.items.get(dep).map(|d| d.is_complete()).unwrap_or(false)
                    });
                    item.status = if satisfied { WorkStatus::Ready } else { WorkStatus::Blocked };
                } else {
                    item.status = WorkStatus::Ready;
                }

                if let Some(agent) = agent {
                    item.assign_to(agent);
                }

                s.items.insert(item.id.clone(), item.clone());
                Ok((item, true))
            })
            .await?;

        if self.hooks_enabled {
            if let Err(err) = self.hooks.ensure_hook(&item) {
                warn!(item_id = %item.id, error = %err, "hook creation failed");
            }
        }
        self.sync_graph(&item);
        info!(item_id = %item.id, title = %item.title, "created work item");
        Ok(item)
    }

    pub async fn get_work_item(&self, item_id: &str) -> Result<Option<WorkItem>> {
        self.state.read(|s| s.items.get(item_id).cloned())
    }

    pub async fn get_work_item_by_issue(&self, issue_number: i64) -> Result<Option<WorkItem>> {
        self.state
            .read(|s| s.items.values().find(|i| i.issue_number == Some(issue_number)).cloned())
    }

    /// Persists `item`, enforcing optimistic locking when `expected_version`
    /// is given: a mismatch against the currently-stored version fails with
    /// `CoreError::ConcurrentUpdate` rather than silently clobbering a
    /// concurrent writer's change. `version` is then bumped by exactly one,
    /// regardless of what `item.version` carried in.
    #[instrument(skip(self, item))]
    pub async fn update_work_item(&self, item: WorkItem, expected_version: Option<u64>) -> Result<WorkItem> {
        let item_id = item.id.clone();
        let snapshot = self
            .state
            .transact(move |s| {
                let actual = s.items.get(&item_id).map(|existing| existing.version);
                if let (Some(expected), Some(actual)) = (expected_version, actual) {
                    if expected != actual {
                        return Err(squad_core::CoreError::ConcurrentUpdate {
                            item_id: item_id.clone(),
                            expected,
                            actual,
                        }
                        .into());
                    }
                }
                let mut item = item;
                item.version = actual.unwrap_or(item.version) + 1;
                item.updated_at = chrono::Utc::now();
                s.items.insert(item.id.clone(), item.clone());
                Ok((item, true))
            })
            .await?;
        if self.hooks_enabled {
            if let Err(err) = self.hooks.write_metadata(&snapshot) {
                warn!(item_id = %snapshot.id, error = %err, "hook metadata write failed");
            }
        }
        Ok(snapshot)
    }

    pub async fn delete_work_item(&self, item_id: &str) -> Result<bool> {
        let item_id_owned = item_id.to_string();
        let removed = self
            .state
            .transact(move |s| {
                let removed = s.items.remove(&item_id_owned).is_some();
                Ok((removed, removed))
            })
            .await?;
        if removed && self.hooks_enabled {
            if let Err(err) = self.hooks.remove_hook(item_id) {
                warn!(item_id, error = %err, "hook removal failed");
            }
        }
        Ok(removed)
    }

    pub async fn list_work_items(&self, filter: ListFilter) -> Result<Vec<WorkItem>> {
        self.state.read(|s| {
            let mut items: Vec<WorkItem> = s
                .items
                .values()
                .filter(|i| filter.status.map(|st| i.status == st).unwrap_or(true))
                .filter(|i| filter.agent.as_deref().map(|a| i.agent_assignee.as_deref() == Some(a)).unwrap_or(true))
                .filter(|i| {
                    filter
                        .convoy_id
                        .as_deref()
                        .map(|c| i.convoy_id.as_deref() == Some(c))
                        .unwrap_or(true)
                })
                .cloned()
                .collect();
            items.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.created_at.cmp(&b.created_at)));
            items
        })
    }

    // -- Agent operations -------------------------------------------------

    #[instrument(skip(self))]
    pub async fn assign_to_agent(&self, item_id: &str, agent: &str) -> Result<bool> {
        let item_id_owned = item_id.to_string();
        let agent_owned = agent.to_string();
        let item = self
            .state
            .transact(move |s| {
                let Some(item) = s.items.get_mut(&item_id_owned) else {
                    return Ok((None, false));
                };
                item.assign_to(agent_owned);
                item.version += 1;
                Ok((Some(item.clone()), true))
            })
            .await?;

        let Some(item) = item else { return Ok(false) };
        if self.hooks_enabled {
            if let Err(err) = self.hooks.ensure_hook(&item) {
                warn!(item_id = %item.id, error = %err, "hook creation failed");
            }
        }
        self.sync_graph(&item);
        info!(item_id, agent, "assigned work item");
        Ok(true)
    }

    #[instrument(skip(self))]
    pub async fn unassign_from_agent(&self, item_id: &str) -> Result<bool> {
        let item_id_owned = item_id.to_string();
        let item = self
            .state
            .transact(move |s| {
                let Some(item) = s.items.get_mut(&item_id_owned) else {
                    return Ok((None, false));
                };
                item.unassign();
                item.version += 1;
                Ok((Some(item.clone()), true))
            })
            .await?;

        let Some(item) = item else { return Ok(false) };
        if self.hooks_enabled {
            if let Err(err) = self.hooks.write_metadata(&item) {
                warn!(item_id = %item.id, error = %err, "hook metadata write failed");
            }
        }
        info!(item_id, "unassigned work item");
        Ok(true)
    }

    pub async fn get_agent_work(&self, agent: &str) -> Result<Vec<WorkItem>> {
        self.list_work_items(ListFilter {
            agent: Some(agent.to_string()),
            ..Default::default()
        })
        .await
    }

    pub async fn get_agent_hooked_work(&self, agent: &str) -> Result<Option<WorkItem>> {
        let items = self
            .list_work_items(ListFilter {
                status: Some(WorkStatus::Hooked),
                agent: Some(agent.to_string()),
                ..Default::default()
            })
            .await?;
        Ok(items.into_iter().next())
    }

    // -- Context preservation --------------------------------------------

    pub async fn save_agent_context(&self, item_id: &str, context: BTreeMap<String, Value>) -> Result<bool> {
        let item_id_owned = item_id.to_string();
        let item = self
            .state
            .transact(move |s| {
                let Some(item) = s.items.get_mut(&item_id_owned) else {
                    return Ok((None, false));
                };
                item.save_context(context);
                item.version += 1;
                Ok((Some(item.clone()), true))
            })
            .await?;
        let Some(item) = item else { return Ok(false) };
        if self.hooks_enabled {
            if let Err(err) = self.hooks.write_metadata(&item) {
                warn!(item_id = %item.id, error = %err, "hook metadata write failed");
            }
        }
        Ok(true)
    }

    pub async fn restore_agent_context(&self, item_id: &str) -> Result<Option<BTreeMap<String, Value>>> {
        Ok(self.get_work_item(item_id).await?.map(|i| i.context))
    }

    // -- Dependency management --------------------------------------------

    /// Promotes every `blocked` item whose dependencies have all terminated
    /// to `ready`, returning the promoted items.
    #[instrument(skip(self))]
    pub async fn update_blocked_items(&self) -> Result<Vec<WorkItem>> {
        self.state
            .transact(|s| {
                let done_ids: BTreeSet<String> = s
                    .items
                    .values()
                    .filter(|i| i.is_complete())
                    .map(|i| i.id.clone())
                    .collect();

                let to_promote: Vec<String> = s
                    .items
                    .values()
                    .filter(|i| i.status == WorkStatus::Blocked && i.depends_on.iter().all(|d| done_ids.contains(d)))
                    .map(|i| i.id.clone())
                    .collect();

                let mut unblocked = Vec::new();
                for id in &to_promote {
                    if let Some(item) = s.items.get_mut(id) {
                        item.status = WorkStatus::Ready;
                        item.updated_at = chrono::Utc::now();
                        item.version += 1;
                        unblocked.push(item.clone());
                    }
                }
                let dirty = !unblocked.is_empty();
                Ok((unblocked, dirty))
            })
            .await
    }

    /// Records `item_id depends_on depends_on_id` (and the reverse `blocks`
    /// edge), re-evaluating `item_id`'s status.
    #[instrument(skip(self))]
    pub async fn add_dependency(&self, item_id: &str, depends_on_id: &str) -> Result<bool> {
        if item_id == depends_on_id {
            return Err(StoreError::SelfDependency { item_id: item_id.to_string() });
        }
        let item_id_owned = item_id.to_string();
        let dep_id_owned = depends_on_id.to_string();

        let item = self
            .state
            .transact(move |s| {
                if !s.items.contains_key(&item_id_owned) || !s.items.contains_key(&dep_id_owned) {
                    return Ok((None, false));
                }

                let dep_is_complete = s.items.get(&dep_id_owned).map(|d| d.is_complete()).unwrap_or(false);
                let mut changed = false;

                if let Some(dep) = s.items.get_mut(&dep_id_owned) {
                    if dep.blocks.insert(item_id_owned.clone()) {
                        dep.version += 1;
                        changed = true;
                    }
                }
                if let Some(item) = s.items.get_mut(&item_id_owned) {
                    let mut item_changed = item.depends_on.insert(dep_id_owned.clone());
                    if !dep_is_complete && item.status != WorkStatus::Blocked {
                        item.status = WorkStatus::Blocked;
                        item_changed = true;
                    }
                    if item_changed {
                        item.version += 1;
                        changed = true;
                    }
                }

                Ok((s.items.get(&item_id_owned).cloned(), changed))
            })
            .await?;

        let Some(item) = item else { return Ok(false) };
        self.sync_graph(&item);
        Ok(true)
    }

    fn sync_graph(&self, item: &WorkItem) {
        let item = item.clone();
        let graph = Arc::clone(&self.graph);
        tokio::spawn(async move {
            let item_id = item.id.clone();
            let result = graph
                .transact(move |g| {
                    let work_node = NodeRef::new(NodeKind::WorkItem, item.id.clone());
                    g.upsert_node(work_node.clone());

                    if let Some(issue) = item.issue_number {
                        let issue_node = NodeRef::new(NodeKind::Ticket, format!("issue-{issue}"));
                        g.upsert_edge(issue_node, EdgeKind::DependsOn, work_node.clone());
                    }
                    if let Some(agent) = &item.agent_assignee {
                        let agent_node = NodeRef::new(NodeKind::Agent, agent.clone());
                        g.upsert_edge(work_node.clone(), EdgeKind::Owns, agent_node);
                    }
                    for dep in &item.depends_on {
                        let dep_node = NodeRef::new(NodeKind::WorkItem, dep.clone());
                        g.upsert_edge(work_node.clone(), EdgeKind::DependsOn, dep_node);
                    }
                    Ok(((), true))
                })
                .await;
            if let Err(err) = result {
                warn!(item_id, error = %err, "operational graph update failed");
            }
        });
    }

    /// Upserts a `from_agent -DELEGATES_TO-> to_agent` edge in the
    /// operational graph, anchored to the work item the delegation concerns.
    /// Called by the handoff layer on every `initiate_handoff`; best-effort
    /// like [`Self::sync_graph`] -- a failure here never fails the handoff.
    pub fn record_delegation_edge(&self, from_agent: &str, to_agent: &str, work_item_id: &str) {
        let graph = Arc::clone(&self.graph);
        let from_agent = from_agent.to_string();
        let to_agent = to_agent.to_string();
        let work_item_id = work_item_id.to_string();
        tokio::spawn(async move {
            let result = graph
                .transact(move |g| {
                    let from_node = NodeRef::new(NodeKind::Agent, from_agent.clone());
                    let to_node = NodeRef::new(NodeKind::Agent, to_agent.clone());
                    g.upsert_node(from_node.clone());
                    g.upsert_node(to_node.clone());
                    g.upsert_edge(from_node, EdgeKind::DelegatesTo, to_node);
                    Ok(((), true))
                })
                .await;
            if let Err(err) = result {
                warn!(work_item_id, error = %err, "operational graph delegation edge update failed");
            }
        });
    }

    // -- Artifacts & transitions -------------------------------------------

    pub async fn add_artifact(&self, item_id: &str, artifact_path: &str) -> Result<bool> {
        let item_id_owned = item_id.to_string();
        let artifact_owned = artifact_path.to_string();
        let item = self
            .state
            .transact(move |s| {
                let Some(item) = s.items.get_mut(&item_id_owned) else {
                    return Ok((None, false));
                };
                item.add_artifact(artifact_owned);
                item.version += 1;
                Ok((Some(item.clone()), true))
            })
            .await?;
        let Some(item) = item else { return Ok(false) };
        if self.hooks_enabled {
            if let Err(err) = self.hooks.write_metadata(&item) {
                warn!(item_id = %item.id, error = %err, "hook metadata write failed");
            }
        }
        Ok(true)
    }

    #[instrument(skip(self, context))]
    pub async fn transition_status(
        &self,
        item_id: &str,
        new_status: WorkStatus,
        context: Option<BTreeMap<String, Value>>,
    ) -> Result<bool> {
        let item_id_owned = item_id.to_string();
        let item = self
            .state
            .transact(move |s| {
                let Some(item) = s.items.get_mut(&item_id_owned) else {
                    return Ok((None, false));
                };
                let from = item.status;
                item.record_transition("status", Some(format!("{from:?}")), format!("{new_status:?}"), None);
                item.status = new_status;
                if let Some(context) = context {
                    item.save_context(context);
                }
                item.version += 1;
                Ok((Some(item.clone()), true))
            })
            .await?;

        let Some(item) = item else { return Ok(false) };
        if self.hooks_enabled {
            if let Err(err) = self.hooks.write_metadata(&item) {
                warn!(item_id = %item.id, error = %err, "hook metadata write failed");
            }
        }
        info!(item_id, status = ?new_status, "transitioned work item");

        if new_status == WorkStatus::Done {
            self.update_blocked_items().await?;
        }
        Ok(true)
    }

    /// Marks `item_id` done, recording `artifacts` and releasing its agent
    /// assignment, then promotes anything that was only blocked on it.
    #[instrument(skip(self, artifacts))]
    pub async fn complete_work(&self, item_id: &str, artifacts: Vec<String>) -> Result<bool> {
        let item_id_owned = item_id.to_string();
        let found = self
            .state
            .transact(move |s| {
                let Some(item) = s.items.get_mut(&item_id_owned) else {
                    return Ok((false, false));
                };
                for artifact in artifacts {
                    item.add_artifact(artifact);
                }
                item.unassign();
                item.status = WorkStatus::Done;
                item.updated_at = chrono::Utc::now();
                item.version += 1;
                Ok((true, true))
            })
            .await?;

        if !found {
            return Ok(false);
        }
        if let Some(item) = self.get_work_item(item_id).await? {
            if self.hooks_enabled {
                if let Err(err) = self.hooks.write_metadata(&item) {
                    warn!(item_id = %item.id, error = %err, "hook metadata write failed");
                }
            }
        }
        self.update_blocked_items().await?;
        Ok(true)
    }

    pub async fn set_convoy(&self, item_id: &str, convoy_id: &str) -> Result<bool> {
        let item_id_owned = item_id.to_string();
        let convoy_owned = convoy_id.to_string();
        self.state
            .transact(move |s| {
                let Some(item) = s.items.get_mut(&item_id_owned) else {
                    return Ok((false, false));
                };
                item.convoy_id = Some(convoy_owned);
                item.version += 1;
                Ok((true, true))
            })
            .await
    }

    pub async fn get_stats(&self) -> Result<WorkStats> {
        self.state.read(|s| {
            let items: Vec<&WorkItem> = s.items.values().collect();
            let mut by_status: BTreeMap<String, usize> = BTreeMap::new();
            for item in &items {
                *by_status.entry(format!("{:?}", item.status)).or_insert(0) += 1;
            }
            let mut by_agent: BTreeMap<String, usize> = BTreeMap::new();
            for item in &items {
                if let Some(agent) = &item.agent_assignee {
                    *by_agent.entry(agent.clone()).or_insert(0) += 1;
                }
            }
            let blocked = *by_status.get("Blocked").unwrap_or(&0);
            let in_progress = by_status.get("InProgress").unwrap_or(&0) + by_status.get("Hooked").unwrap_or(&0);
            let completed = *by_status.get("Done").unwrap_or(&0);
            WorkStats {
                total: items.len(),
                by_status,
                by_agent,
                blocked,
                in_progress,
                completed,
            }
        })
    }
}

impl std::fmt::Debug for WorkStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkStore").field("path", &self.path()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn new_store() -> (tempfile::TempDir, Arc<WorkStore>) {
        let dir = tempfile::tempdir().unwrap();
        let config = WorkspaceConfig::default();
        let store = WorkStore::open(dir.path(), &config).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn create_with_no_dependencies_is_immediately_ready() {
        let (_dir, store) = new_store().await;
        let item = store
            .create_work_item("t", "d", None, None, vec![], vec![], BTreeMap::new(), 0)
            .await
            .unwrap();
        assert_eq!(item.status, WorkStatus::Ready);
    }

    #[tokio::test]
    async fn create_with_unsatisfied_dependency_is_blocked() {
        let (_dir, store) = new_store().await;
        let item = store
            .create_work_item("t", "d", None, None, vec!["missing".into()], vec![], BTreeMap::new(), 0)
            .await
            .unwrap();
        assert_eq!(item.status, WorkStatus::Blocked);
    }

    #[tokio::test]
    async fn completing_a_dependency_unblocks_dependents() {
        let (_dir, store) = new_store().await;
        let dep = store
            .create_work_item("dep", "", None, None, vec![], vec![], BTreeMap::new(), 0)
            .await
            .unwrap();
        let item = store
            .create_work_item("t", "d", None, None, vec![], vec![], BTreeMap::new(), 0)
            .await
            .unwrap();
        store.add_dependency(&item.id, &dep.id).await.unwrap();
        let reloaded = store.get_work_item(&item.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, WorkStatus::Blocked);

        store.complete_work(&dep.id, vec![]).await.unwrap();
        let reloaded = store.get_work_item(&item.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, WorkStatus::Ready);
    }

    #[tokio::test]
    async fn assign_then_unassign_round_trips_through_hooked() {
        let (_dir, store) = new_store().await;
        let item = store
            .create_work_item("t", "d", None, None, vec![], vec![], BTreeMap::new(), 0)
            .await
            .unwrap();
        store.assign_to_agent(&item.id, "scout-1").await.unwrap();
        let assigned = store.get_work_item(&item.id).await.unwrap().unwrap();
        assert_eq!(assigned.status, WorkStatus::Hooked);
        assert_eq!(assigned.agent_assignee.as_deref(), Some("scout-1"));

        store.unassign_from_agent(&item.id).await.unwrap();
        let unassigned = store.get_work_item(&item.id).await.unwrap().unwrap();
        assert_eq!(unassigned.status, WorkStatus::Ready);
        assert!(unassigned.agent_assignee.is_none());
    }

    #[tokio::test]
    async fn self_dependency_is_rejected() {
        let (_dir, store) = new_store().await;
        let item = store
            .create_work_item("t", "d", None, None, vec![], vec![], BTreeMap::new(), 0)
            .await
            .unwrap();
        let err = store.add_dependency(&item.id, &item.id).await.unwrap_err();
        assert!(matches!(err, StoreError::SelfDependency { .. }));
    }

    #[tokio::test]
    async fn stats_reflect_status_and_agent_counts() {
        let (_dir, store) = new_store().await;
        store
            .create_work_item("a", "", None, Some("scout-1".into()), vec![], vec![], BTreeMap::new(), 0)
            .await
            .unwrap();
        store
            .create_work_item("b", "", None, None, vec![], vec![], BTreeMap::new(), 0)
            .await
            .unwrap();
        let stats = store.get_stats().await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.by_agent.get("scout-1"), Some(&1));
    }

    #[tokio::test]
    async fn delete_removes_item_and_hook() {
        let (_dir, store) = new_store().await;
        let item = store
            .create_work_item("t", "d", None, None, vec![], vec![], BTreeMap::new(), 0)
            .await
            .unwrap();
        assert!(store.delete_work_item(&item.id).await.unwrap());
        assert!(store.get_work_item(&item.id).await.unwrap().is_none());
        assert!(!store.delete_work_item(&item.id).await.unwrap());
    }
}
