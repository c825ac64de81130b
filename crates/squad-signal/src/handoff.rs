//! Handoff protocol: explicit, accountable work transfer between agents.
//!
//! Grounded on `ai_squad.core.handoff.HandoffManager`. A handoff moves
//! `initiated -> pending -> {accepted, rejected}`, with `accepted` handoffs
//! completing separately once the recipient finishes the work, or
//! cancellable by the initiator while still `pending`. Acceptance reassigns
//! the underlying work item via [`squad_store::WorkStore`] and moves it to
//! `in_progress`; every transition appends to the handoff's audit log and,
//! when a delegation link was created alongside it, propagates into
//! [`DelegationManager`]. Every initiation also upserts a `DELEGATES_TO`
//! edge into the operational graph via [`squad_store::WorkStore`].

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use squad_core::ids::entity_id;
use squad_core::persist::TransactionalStore;
use squad_core::WorkStatus;
use squad_store::WorkStore;
use tracing::{info, warn};

use crate::delegation::{DelegationManager, DelegationStatus};
use crate::error::Result;
use crate::mailbox::MailboxManager;
use crate::message::MessagePriority;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffStatus {
    Initiated,
    Pending,
    Accepted,
    Rejected,
    InProgress,
    Completed,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffReason {
    Workflow,
    Escalation,
    Specialization,
    LoadBalancing,
    Blocker,
    Completion,
    Error,
    /// Forward-compatible escape hatch for reasons outside the enumerated
    /// set, carrying the caller's own label through to the audit log.
    Other(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HandoffContext {
    pub summary: String,
    pub current_state: String,
    pub next_steps: Vec<String>,
    pub blockers: Vec<String>,
    pub artifacts: Vec<String>,
    pub notes: String,
    pub data: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub agent: String,
    pub details: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Handoff {
    pub id: String,
    pub work_item_id: String,
    pub from_agent: String,
    pub to_agent: String,
    pub reason: HandoffReason,
    pub status: HandoffStatus,
    pub context: Option<HandoffContext>,
    pub metadata: BTreeMap<String, Value>,
    pub priority: MessagePriority,
    pub requires_ack: bool,
    pub initiated_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub acceptance_message: Option<String>,
    pub rejection_reason: Option<String>,
    pub audit_log: Vec<AuditEntry>,
}

impl Handoff {
    fn add_audit_entry(&mut self, action: impl Into<String>, agent: impl Into<String>, details: Option<String>) {
        self.audit_log.push(AuditEntry {
            timestamp: Utc::now(),
            action: action.into(),
            agent: agent.into(),
            details,
        });
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct HandoffState {
    handoffs: BTreeMap<String, Handoff>,
}

/// Manages handoffs, reassigning work via the work-state store and
/// optionally notifying over the mailbox and creating a delegation link.
pub struct HandoffManager {
    state: Arc<TransactionalStore<HandoffState>>,
    work_store: Arc<WorkStore>,
    mailbox: Option<Arc<MailboxManager>>,
    delegation: Option<Arc<DelegationManager>>,
}

impl HandoffManager {
    pub fn open(
        squad_dir: impl AsRef<std::path::Path>,
        work_store: Arc<WorkStore>,
        mailbox: Option<Arc<MailboxManager>>,
        delegation: Option<Arc<DelegationManager>>,
    ) -> Result<Arc<Self>> {
        let state = TransactionalStore::open(squad_dir.as_ref().join("handoffs/handoffs.json"))?;
        Ok(Arc::new(Self {
            state,
            work_store,
            mailbox,
            delegation,
        }))
    }

    pub async fn initiate_handoff(
        &self,
        work_item_id: &str,
        from_agent: &str,
        to_agent: &str,
        reason: HandoffReason,
        context: Option<HandoffContext>,
        priority: MessagePriority,
        requires_ack: bool,
    ) -> Result<Option<Handoff>> {
        let Some(work_item) = self.work_store.get_work_item(work_item_id).await? else {
            warn!(work_item_id, "work item not found for handoff");
            return Ok(None);
        };

        let handoff_id = format!("handoff-{}", &entity_id().simple().to_string()[..8]);
        let mut handoff = Handoff {
            id: handoff_id.clone(),
            work_item_id: work_item_id.to_string(),
            from_agent: from_agent.to_string(),
            to_agent: to_agent.to_string(),
            reason: reason.clone(),
            status: HandoffStatus::Initiated,
            context: context.clone(),
            metadata: BTreeMap::new(),
            priority,
            requires_ack,
            initiated_at: Utc::now(),
            accepted_at: None,
            completed_at: None,
            acceptance_message: None,
            rejection_reason: None,
            audit_log: Vec::new(),
        };
        handoff.add_audit_entry("initiated", from_agent, Some(format!("Handoff initiated: {reason:?}")));
        handoff.status = HandoffStatus::Pending;

        self.work_store.record_delegation_edge(from_agent, to_agent, work_item_id);

        if let Some(delegation) = &self.delegation {
            match delegation
                .create_delegation(from_agent, to_agent, work_item_id, &format!("{reason:?}"), None)
                .await
            {
                Ok(link) => {
                    handoff.metadata.insert("delegation_id".to_string(), Value::String(link.id.clone()));
                    handoff.add_audit_entry("delegation_created", from_agent, Some(format!("Delegation {} created", link.id)));
                }
                Err(err) => warn!(handoff_id, error = %err, "delegation create failed"),
            }
        }

        let stored = handoff.clone();
        self.state
            .transact(move |s| {
                s.handoffs.insert(stored.id.clone(), stored.clone());
                Ok(((), true))
            })
            .await?;

        if let Some(mailbox) = &self.mailbox {
            let mut body = format!(
                "Work item handoff request from {from_agent}.\n\n**Reason**: {reason:?}\n**Work Item**: {} ({work_item_id})",
                work_item.title
            );
            if let Some(ctx) = &context {
                body.push_str(&format!("\n\n**Summary**: {}\n**Current State**: {}", ctx.summary, ctx.current_state));
                if !ctx.next_steps.is_empty() {
                    body.push_str("\n**Next Steps**:\n");
                    for step in &ctx.next_steps {
                        body.push_str(&format!("- {step}\n"));
                    }
                }
            }
            mailbox
                .send_message(
                    from_agent,
                    to_agent,
                    &format!("Handoff Request: {}", work_item.title),
                    &body,
                    priority,
                    Some(work_item_id.to_string()),
                    None,
                    None,
                    None,
                    requires_ack,
                    None,
                    BTreeMap::from([("handoff_id".to_string(), Value::String(handoff_id.clone()))]),
                    Vec::new(),
                )
                .await?;
        }

        info!(handoff_id, from_agent, to_agent, work_item_id, reason = ?reason, "handoff initiated");
        Ok(Some(handoff))
    }

    pub async fn accept_handoff(&self, handoff_id: &str, accepting_agent: &str, message: Option<String>) -> Result<bool> {
        let handoff_id_owned = handoff_id.to_string();
        let accepting_agent_owned = accepting_agent.to_string();
        let message_owned = message.clone();
        let handoff = self
            .state
            .transact(move |s| {
                let Some(handoff) = s.handoffs.get_mut(&handoff_id_owned) else {
                    return Ok((None, false));
                };
                if handoff.to_agent != accepting_agent_owned || handoff.status != HandoffStatus::Pending {
                    return Ok((None, false));
                }
                handoff.status = HandoffStatus::Accepted;
                handoff.accepted_at = Some(Utc::now());
                handoff.acceptance_message = message_owned.clone();
                handoff.add_audit_entry("accepted", accepting_agent_owned.clone(), message_owned);
                Ok((Some(handoff.clone()), true))
            })
            .await?;

        let Some(handoff) = handoff else { return Ok(false) };

        let assigned = self.work_store.assign_to_agent(&handoff.work_item_id, accepting_agent).await?;
        if assigned {
            self.work_store
                .transition_status(&handoff.work_item_id, WorkStatus::InProgress, None)
                .await?;
        } else {
            warn!(work_item_id = %handoff.work_item_id, accepting_agent, "failed to assign work item on handoff accept");
        }

        if let Some(mailbox) = &self.mailbox {
            let mut body = format!("Handoff accepted by {accepting_agent}.");
            if let Some(message) = &message {
                body.push_str(&format!("\n\nMessage: {message}"));
            }
            mailbox
                .send_message(
                    accepting_agent,
                    &handoff.from_agent,
                    &format!("Handoff Accepted: {}", handoff.work_item_id),
                    &body,
                    MessagePriority::Normal,
                    Some(handoff.work_item_id.clone()),
                    None,
                    None,
                    None,
                    false,
                    None,
                    BTreeMap::from([("handoff_id".to_string(), Value::String(handoff_id.to_string()))]),
                    Vec::new(),
                )
                .await?;
        }

        info!(handoff_id, accepting_agent, "handoff accepted");
        Ok(true)
    }

    pub async fn reject_handoff(&self, handoff_id: &str, rejecting_agent: &str, reason: &str) -> Result<bool> {
        let handoff_id_owned = handoff_id.to_string();
        let rejecting_agent_owned = rejecting_agent.to_string();
        let reason_owned = reason.to_string();
        let handoff = self
            .state
            .transact(move |s| {
                let Some(handoff) = s.handoffs.get_mut(&handoff_id_owned) else {
                    return Ok((None, false));
                };
                if handoff.to_agent != rejecting_agent_owned || handoff.status != HandoffStatus::Pending {
                    return Ok((None, false));
                }
                handoff.status = HandoffStatus::Rejected;
                handoff.rejection_reason = Some(reason_owned.clone());
                handoff.add_audit_entry("rejected", rejecting_agent_owned.clone(), Some(reason_owned));
                Ok((Some(handoff.clone()), true))
            })
            .await?;

        let Some(handoff) = handoff else { return Ok(false) };

        if let (Some(delegation), Some(delegation_id)) = (&self.delegation, handoff.metadata.get("delegation_id").and_then(Value::as_str)) {
            if let Err(err) = delegation.complete_delegation(delegation_id, DelegationStatus::Failed, reason).await {
                warn!(handoff_id, error = %err, "delegation rejection propagation failed");
            }
        }

        if let Some(mailbox) = &self.mailbox {
            mailbox
                .send_message(
                    rejecting_agent,
                    &handoff.from_agent,
                    &format!("Handoff Rejected: {}", handoff.work_item_id),
                    &format!("Handoff rejected by {rejecting_agent}.\n\n**Reason**: {reason}"),
                    MessagePriority::High,
                    Some(handoff.work_item_id.clone()),
                    None,
                    None,
                    None,
                    false,
                    None,
                    BTreeMap::from([("handoff_id".to_string(), Value::String(handoff_id.to_string()))]),
                    Vec::new(),
                )
                .await?;
        }

        info!(handoff_id, rejecting_agent, reason, "handoff rejected");
        Ok(true)
    }

    pub async fn complete_handoff(&self, handoff_id: &str, completing_agent: &str) -> Result<bool> {
        let handoff_id_owned = handoff_id.to_string();
        let completing_agent_owned = completing_agent.to_string();
        let handoff = self
            .state
            .transact(move |s| {
                let Some(handoff) = s.handoffs.get_mut(&handoff_id_owned) else {
                    return Ok((None, false));
                };
                if handoff.to_agent != completing_agent_owned || handoff.status != HandoffStatus::Accepted {
                    return Ok((None, false));
                }
                handoff.status = HandoffStatus::Completed;
                handoff.completed_at = Some(Utc::now());
                handoff.add_audit_entry("completed", completing_agent_owned, Some("Handoff completed".to_string()));
                Ok((Some(handoff.clone()), true))
            })
            .await?;

        let Some(handoff) = handoff else { return Ok(false) };
        if let (Some(delegation), Some(delegation_id)) = (&self.delegation, handoff.metadata.get("delegation_id").and_then(Value::as_str)) {
            if let Err(err) = delegation
                .complete_delegation(delegation_id, DelegationStatus::Completed, "Handoff completed")
                .await
            {
                warn!(handoff_id, error = %err, "delegation completion propagation failed");
            }
        }
        info!(handoff_id, "handoff completed");
        Ok(true)
    }

    pub async fn cancel_handoff(&self, handoff_id: &str, cancelling_agent: &str, reason: &str) -> Result<bool> {
        let handoff_id_owned = handoff_id.to_string();
        let cancelling_agent_owned = cancelling_agent.to_string();
        let reason_owned = reason.to_string();
        let handoff = self
            .state
            .transact(move |s| {
                let Some(handoff) = s.handoffs.get_mut(&handoff_id_owned) else {
                    return Ok((None, false));
                };
                if handoff.from_agent != cancelling_agent_owned
                    || !matches!(handoff.status, HandoffStatus::Initiated | HandoffStatus::Pending)
                {
                    return Ok((None, false));
                }
                handoff.status = HandoffStatus::Cancelled;
                handoff.add_audit_entry("cancelled", cancelling_agent_owned, Some(reason_owned));
                Ok((Some(handoff.clone()), true))
            })
            .await?;

        let Some(handoff) = handoff else { return Ok(false) };
        if let (Some(delegation), Some(delegation_id)) = (&self.delegation, handoff.metadata.get("delegation_id").and_then(Value::as_str)) {
            if let Err(err) = delegation.complete_delegation(delegation_id, DelegationStatus::Cancelled, reason).await {
                warn!(handoff_id, error = %err, "delegation cancellation propagation failed");
            }
        }
        if let Some(mailbox) = &self.mailbox {
            mailbox
                .send_message(
                    cancelling_agent,
                    &handoff.to_agent,
                    &format!("Handoff Cancelled: {}", handoff.work_item_id),
                    &format!("Handoff cancelled by {cancelling_agent}.\n\n**Reason**: {reason}"),
                    MessagePriority::Normal,
                    Some(handoff.work_item_id.clone()),
                    None,
                    None,
                    None,
                    false,
                    None,
                    BTreeMap::from([("handoff_id".to_string(), Value::String(handoff_id.to_string()))]),
                    Vec::new(),
                )
                .await?;
        }
        info!(handoff_id, cancelling_agent, "handoff cancelled");
        Ok(true)
    }

    pub async fn get_handoff(&self, handoff_id: &str) -> Result<Option<Handoff>> {
        self.state.read(|s| s.handoffs.get(handoff_id).cloned())
    }

    pub async fn get_handoffs_by_work_item(&self, work_item_id: &str) -> Result<Vec<Handoff>> {
        self.state.read(|s| s.handoffs.values().filter(|h| h.work_item_id == work_item_id).cloned().collect())
    }

    pub async fn get_pending_handoffs(&self, to_agent: &str) -> Result<Vec<Handoff>> {
        self.state
            .read(|s| s.handoffs.values().filter(|h| h.to_agent == to_agent && h.status == HandoffStatus::Pending).cloned().collect())
    }

    pub async fn get_outgoing_handoffs(&self, from_agent: &str, status: Option<HandoffStatus>) -> Result<Vec<Handoff>> {
        self.state.read(|s| {
            let mut handoffs: Vec<Handoff> = s
                .handoffs
                .values()
                .filter(|h| h.from_agent == from_agent)
                .filter(|h| status.map(|st| h.status == st).unwrap_or(true))
                .cloned()
                .collect();
            handoffs.sort_by(|a, b| b.initiated_at.cmp(&a.initiated_at));
            handoffs
        })
    }

    /// Chronological audit entries across every handoff touching
    /// `work_item_id`.
    pub async fn get_handoff_history(&self, work_item_id: &str) -> Result<Vec<AuditEntry>> {
        let mut entries: Vec<AuditEntry> = self
            .get_handoffs_by_work_item(work_item_id)
            .await?
            .into_iter()
            .flat_map(|h| h.audit_log)
            .collect();
        entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use squad_core::config::WorkspaceConfig;

    async fn new_harness() -> (tempfile::TempDir, Arc<WorkStore>, Arc<HandoffManager>) {
        let dir = tempfile::tempdir().unwrap();
        let config = WorkspaceConfig::default();
        let work_store = WorkStore::open(dir.path(), &config).unwrap();
        let handoff = HandoffManager::open(dir.path().join(".squad"), Arc::clone(&work_store), None, None).unwrap();
        (dir, work_store, handoff)
    }

    #[tokio::test]
    async fn accept_assigns_work_item_and_moves_it_in_progress() {
        let (_dir, work_store, handoff_manager) = new_harness().await;
        let item = work_store
            .create_work_item("t", "d", None, None, vec![], vec![], BTreeMap::new(), 0)
            .await
            .unwrap();

        let handoff = handoff_manager
            .initiate_handoff(&item.id, "captain", "scout-1", HandoffReason::Workflow, None, MessagePriority::Normal, true)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(handoff.status, HandoffStatus::Pending);

        assert!(handoff_manager.accept_handoff(&handoff.id, "scout-1", None).await.unwrap());

        let updated = work_store.get_work_item(&item.id).await.unwrap().unwrap();
        assert_eq!(updated.status, WorkStatus::InProgress);
        assert_eq!(updated.agent_assignee.as_deref(), Some("scout-1"));
    }

    #[tokio::test]
    async fn wrong_recipient_cannot_accept() {
        let (_dir, work_store, handoff_manager) = new_harness().await;
        let item = work_store
            .create_work_item("t", "d", None, None, vec![], vec![], BTreeMap::new(), 0)
            .await
            .unwrap();
        let handoff = handoff_manager
            .initiate_handoff(&item.id, "captain", "scout-1", HandoffReason::Workflow, None, MessagePriority::Normal, true)
            .await
            .unwrap()
            .unwrap();

        assert!(!handoff_manager.accept_handoff(&handoff.id, "scout-2", None).await.unwrap());
    }

    #[tokio::test]
    async fn only_initiator_can_cancel_a_pending_handoff() {
        let (_dir, work_store, handoff_manager) = new_harness().await;
        let item = work_store
            .create_work_item("t", "d", None, None, vec![], vec![], BTreeMap::new(), 0)
            .await
            .unwrap();
        let handoff = handoff_manager
            .initiate_handoff(&item.id, "captain", "scout-1", HandoffReason::Workflow, None, MessagePriority::Normal, true)
            .await
            .unwrap()
            .unwrap();

        assert!(!handoff_manager.cancel_handoff(&handoff.id, "scout-1", "nope").await.unwrap());
        assert!(handoff_manager.cancel_handoff(&handoff.id, "captain", "changed mind").await.unwrap());
    }
}
