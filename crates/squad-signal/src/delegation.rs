//! Delegation links: an audited record of "who is doing this on whose
//! behalf", with completion propagated back to the delegating agent via a
//! signal message.
//!
//! Grounded on `ai_squad.core.delegation.DelegationManager`.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use squad_core::persist::TransactionalStore;
use tracing::info;

use crate::error::Result;
use crate::mailbox::MailboxManager;
use crate::message::MessagePriority;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[allow(clippy::enum_variant_names)]
pub enum DelegationStatus {
    Initiated,
    InProgress,
    Completed,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub details: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationLink {
    pub id: String,
    pub from_agent: String,
    pub to_agent: String,
    pub work_item_id: String,
    pub scope: String,
    pub sla: Option<String>,
    pub status: DelegationStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub audit_log: Vec<AuditEntry>,
}

impl DelegationLink {
    fn add_audit(&mut self, action: impl Into<String>, details: impl Into<String>) {
        self.audit_log.push(AuditEntry {
            timestamp: Utc::now(),
            action: action.into(),
            details: details.into(),
        });
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct DelegationState {
    links: BTreeMap<String, DelegationLink>,
}

/// Manages delegation links, optionally notifying via a [`MailboxManager`]
/// on creation and completion.
pub struct DelegationManager {
    state: Arc<TransactionalStore<DelegationState>>,
    mailbox: Option<Arc<MailboxManager>>,
}

impl DelegationManager {
    pub fn open(squad_dir: impl AsRef<std::path::Path>, mailbox: Option<Arc<MailboxManager>>) -> Result<Arc<Self>> {
        let state = TransactionalStore::open(squad_dir.as_ref().join("delegations/delegations.json"))?;
        Ok(Arc::new(Self { state, mailbox }))
    }

    pub async fn create_delegation(
        &self,
        from_agent: &str,
        to_agent: &str,
        work_item_id: &str,
        scope: &str,
        sla: Option<String>,
    ) -> Result<DelegationLink> {
        let link_id = format!("delegation-{}", &squad_core::ids::entity_id().simple().to_string()[..8]);
        let from_agent = from_agent.to_string();
        let to_agent = to_agent.to_string();
        let work_item_id = work_item_id.to_string();
        let scope = scope.to_string();

        let link = self
            .state
            .transact({
                let link_id = link_id.clone();
                let from_agent = from_agent.clone();
                let to_agent = to_agent.clone();
                move |s| {
                    let mut link = DelegationLink {
                        id: link_id,
                        from_agent: from_agent.clone(),
                        to_agent: to_agent.clone(),
                        work_item_id,
                        scope,
                        sla,
                        status: DelegationStatus::Initiated,
                        created_at: Utc::now(),
                        completed_at: None,
                        audit_log: Vec::new(),
                    };
                    link.add_audit("created", format!("Delegation created from {from_agent} to {to_agent}"));
                    s.links.insert(link.id.clone(), link.clone());
                    Ok((link, true))
                }
            })
            .await?;

        if let Some(mailbox) = &self.mailbox {
            mailbox
                .send_message(
                    "system",
                    &link.to_agent,
                    &format!("Delegation Request: {}", link.work_item_id),
                    &format!("{} delegated work item {}", link.from_agent, link.work_item_id),
                    MessagePriority::Normal,
                    Some(link.work_item_id.clone()),
                    None,
                    None,
                    None,
                    false,
                    None,
                    BTreeMap::new(),
                    Vec::new(),
                )
                .await?;
        }

        info!(delegation_id = %link.id, from = %link.from_agent, to = %link.to_agent, "delegation created");
        Ok(link)
    }

    pub async fn complete_delegation(&self, link_id: &str, status: DelegationStatus, details: &str) -> Result<Option<DelegationLink>> {
        let link_id_owned = link_id.to_string();
        let details_owned = details.to_string();
        let link = self
            .state
            .transact(move |s| {
                let Some(link) = s.links.get_mut(&link_id_owned) else {
                    return Ok((None, false));
                };
                link.status = status;
                link.completed_at = Some(Utc::now());
                let note = if details_owned.is_empty() {
                    format!("Delegation marked {status:?}")
                } else {
                    details_owned
                };
                link.add_audit("completed", note);
                Ok((Some(link.clone()), true))
            })
            .await?;

        if let Some(link) = &link {
            if let Some(mailbox) = &self.mailbox {
                mailbox
                    .send_message(
                        "system",
                        &link.from_agent,
                        &format!("Delegation {status:?}: {}", link.work_item_id),
                        &format!("{} reported {status:?} for {}", link.to_agent, link.work_item_id),
                        MessagePriority::High,
                        Some(link.work_item_id.clone()),
                        None,
                        None,
                        None,
                        false,
                        None,
                        BTreeMap::new(),
                        Vec::new(),
                    )
                    .await?;
            }
            info!(delegation_id = %link.id, status = ?status, "delegation completed");
        }
        Ok(link)
    }

    pub async fn get(&self, link_id: &str) -> Result<Option<DelegationLink>> {
        self.state.read(|s| s.links.get(link_id).cloned())
    }

    pub async fn list(&self) -> Result<Vec<DelegationLink>> {
        self.state.read(|s| s.links.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_complete_delegation_records_audit_trail() {
        let dir = tempfile::tempdir().unwrap();
        let manager = DelegationManager::open(dir.path(), None).unwrap();
        let link = manager.create_delegation("captain", "scout-1", "sq-1", "workflow", None).await.unwrap();
        assert_eq!(link.status, DelegationStatus::Initiated);

        let completed = manager
            .complete_delegation(&link.id, DelegationStatus::Completed, "done")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(completed.status, DelegationStatus::Completed);
        assert_eq!(completed.audit_log.len(), 2);
    }
}
