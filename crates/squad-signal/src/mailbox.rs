//! Agent mailboxes: persistent inbox/outbox/archive queues routed through
//! [`MailboxManager`].
//!
//! Grounded on `ai_squad.core.mailbox.MailboxManager`: messages and
//! mailboxes are two maps in one JSON document guarded by the shared
//! [`squad_core::persist::TransactionalStore`]. Handler callbacks are a
//! per-process, in-memory concern -- they are never persisted, matching the
//! original's plain Python callables.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use squad_core::ids::entity_id;
use squad_core::persist::TransactionalStore;
use tracing::{info, instrument, warn};

use crate::error::Result;
use crate::message::{Message, MessagePriority, MessageStatus};

pub const BROADCAST_RECIPIENT: &str = "broadcast";

/// A single agent (or `"system"`) mailbox: queues of message ids.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Mailbox {
    pub owner: String,
    pub inbox: Vec<String>,
    pub outbox: Vec<String>,
    pub archived: Vec<String>,
}

impl Mailbox {
    fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct MailboxState {
    messages: BTreeMap<String, Message>,
    mailboxes: BTreeMap<String, Mailbox>,
}

/// Callback invoked synchronously whenever a message is routed to its
/// recipient (or to `"broadcast"` handlers, for every non-sender message).
pub type MessageHandler = Arc<dyn Fn(&Message) + Send + Sync>;

/// Routes and persists messages between agent mailboxes.
pub struct MailboxManager {
    state: Arc<TransactionalStore<MailboxState>>,
    handlers: Mutex<BTreeMap<String, Vec<MessageHandler>>>,
}

impl MailboxManager {
    pub fn open(squad_dir: impl AsRef<std::path::Path>) -> Result<Arc<Self>> {
        let state = TransactionalStore::open(squad_dir.as_ref().join("mailbox/messages.json"))?;
        Ok(Arc::new(Self {
            state,
            handlers: Mutex::new(BTreeMap::new()),
        }))
    }

    #[allow(clippy::too_many_arguments)]
    #[instrument(skip(self, metadata, attachments))]
    pub async fn send_message(
        &self,
        sender: &str,
        recipient: &str,
        subject: &str,
        body: &str,
        priority: MessagePriority,
        work_item_id: Option<String>,
        convoy_id: Option<String>,
        thread_id: Option<String>,
        reply_to: Option<String>,
        requires_ack: bool,
        ttl_minutes: Option<i64>,
        metadata: BTreeMap<String, Value>,
        attachments: Vec<String>,
    ) -> Result<Message> {
        let message_id = format!("msg-{}", &entity_id().simple().to_string()[..12]);
        let sender = sender.to_string();
        let recipient = recipient.to_string();
        let subject = subject.to_string();
        let body = body.to_string();

        let message = self
            .state
            .transact({
                let message_id = message_id.clone();
                let sender = sender.clone();
                let recipient = recipient.clone();
                move |s| {
                    let mut message = Message::new(
                        message_id,
                        sender.clone(),
                        recipient.clone(),
                        subject,
                        body,
                        priority,
                        work_item_id,
                        convoy_id,
                        thread_id,
                        reply_to,
                        requires_ack,
                        ttl_minutes,
                        metadata,
                        attachments,
                    );

                    s.mailboxes
                        .entry(sender.clone())
                        .or_insert_with(|| Mailbox::new(sender.clone()))
                        .outbox
                        .push(message.id.clone());

                    if recipient == BROADCAST_RECIPIENT {
                        let owners: Vec<String> = s.mailboxes.keys().cloned().collect();
                        for owner in owners {
                            if owner != sender {
                                s.mailboxes.get_mut(&owner).unwrap().inbox.push(message.id.clone());
                            }
                        }
                    } else {
                        s.mailboxes
                            .entry(recipient.clone())
                            .or_insert_with(|| Mailbox::new(recipient.clone()))
                            .inbox
                            .push(message.id.clone());
                    }
                    message.mark_delivered();

                    s.messages.insert(message.id.clone(), message.clone());
                    Ok((message, true))
                }
            })
            .await?;

        self.trigger_handlers(&recipient, &message);
        info!(sender, recipient, subject = %message.subject, "message sent");
        Ok(message)
    }

    pub async fn get_message(&self, message_id: &str) -> Result<Option<Message>> {
        self.state.read(|s| s.messages.get(message_id).cloned())
    }

    /// Inbox for `owner`, expired messages filtered out and marked expired
    /// in the same pass, sorted urgent-first then by age.
    pub async fn get_inbox(&self, owner: &str, unread_only: bool, priority: Option<MessagePriority>) -> Result<Vec<Message>> {
        let owner = owner.to_string();
        self.state
            .transact(move |s| {
                let mailbox_ids = s.mailboxes.entry(owner.clone()).or_insert_with(|| Mailbox::new(owner.clone())).inbox.clone();
                let mut expired_any = false;
                let mut out = Vec::new();
                for id in &mailbox_ids {
                    let Some(msg) = s.messages.get_mut(id) else { continue };
                    if msg.is_expired() {
                        msg.status = MessageStatus::Expired;
                        expired_any = true;
                        continue;
                    }
                    if unread_only && !matches!(msg.status, MessageStatus::Pending | MessageStatus::Delivered) {
                        continue;
                    }
                    if let Some(p) = priority {
                        if msg.priority != p {
                            continue;
                        }
                    }
                    out.push(msg.clone());
                }
                out.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.created_at.cmp(&b.created_at)));
                Ok((out, expired_any))
            })
            .await
    }

    pub async fn get_outbox(&self, owner: &str) -> Result<Vec<Message>> {
        self.state.read(|s| {
            s.mailboxes
                .get(owner)
                .map(|mb| mb.outbox.iter().filter_map(|id| s.messages.get(id).cloned()).collect())
                .unwrap_or_default()
        })
    }

    pub async fn get_thread(&self, thread_id: &str) -> Result<Vec<Message>> {
        self.state.read(|s| {
            let mut msgs: Vec<Message> = s.messages.values().filter(|m| m.thread_id == thread_id).cloned().collect();
            msgs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            msgs
        })
    }

    pub async fn mark_read(&self, message_id: &str, reader: &str) -> Result<bool> {
        let message_id = message_id.to_string();
        let reader = reader.to_string();
        self.state
            .transact(move |s| {
                let has_access = s.mailboxes.get(&reader).map(|mb| mb.inbox.contains(&message_id)).unwrap_or(false);
                if !has_access {
                    return Ok((false, false));
                }
                let Some(msg) = s.messages.get_mut(&message_id) else {
                    return Ok((false, false));
                };
                msg.mark_read();
                Ok((true, true))
            })
            .await
    }

    #[instrument(skip(self))]
    pub async fn acknowledge(&self, message_id: &str, acknowledger: &str) -> Result<bool> {
        let message_id_owned = message_id.to_string();
        let acknowledger_owned = acknowledger.to_string();
        let ok = self
            .state
            .transact(move |s| {
                let has_access = s
                    .mailboxes
                    .get(&acknowledger_owned)
                    .map(|mb| mb.inbox.contains(&message_id_owned))
                    .unwrap_or(false);
                if !has_access {
                    return Ok((false, false));
                }
                let Some(msg) = s.messages.get_mut(&message_id_owned) else {
                    return Ok((false, false));
                };
                msg.mark_acknowledged();
                Ok((true, true))
            })
            .await?;
        if ok {
            info!(message_id, acknowledger, "message acknowledged");
        }
        Ok(ok)
    }

    /// Replies to `original_message_id`, inheriting its thread and subject.
    pub async fn reply(&self, original_message_id: &str, sender: &str, body: &str, subject_prefix: &str) -> Result<Option<Message>> {
        let Some(original) = self.get_message(original_message_id).await? else {
            return Ok(None);
        };
        let message = self
            .send_message(
                sender,
                &original.sender,
                &format!("{subject_prefix}{}", original.subject),
                body,
                MessagePriority::Normal,
                original.work_item_id.clone(),
                original.convoy_id.clone(),
                Some(original.thread_id.clone()),
                Some(original_message_id.to_string()),
                false,
                None,
                BTreeMap::new(),
                Vec::new(),
            )
            .await?;
        Ok(Some(message))
    }

    pub async fn archive(&self, owner: &str, message_id: &str) -> Result<bool> {
        let owner = owner.to_string();
        let message_id = message_id.to_string();
        self.state
            .transact(move |s| {
                let Some(mailbox) = s.mailboxes.get_mut(&owner) else {
                    return Ok((false, false));
                };
                if let Some(pos) = mailbox.inbox.iter().position(|id| id == &message_id) {
                    mailbox.inbox.remove(pos);
                    mailbox.archived.push(message_id);
                    Ok((true, true))
                } else {
                    Ok((false, false))
                }
            })
            .await
    }

    pub async fn delete_message(&self, message_id: &str) -> Result<bool> {
        let message_id = message_id.to_string();
        self.state
            .transact(move |s| {
                if s.messages.remove(&message_id).is_none() {
                    return Ok((false, false));
                }
                for mailbox in s.mailboxes.values_mut() {
                    mailbox.inbox.retain(|id| id != &message_id);
                    mailbox.outbox.retain(|id| id != &message_id);
                    mailbox.archived.retain(|id| id != &message_id);
                }
                Ok((true, true))
            })
            .await
    }

    pub fn register_handler(&self, recipient: &str, handler: MessageHandler) {
        self.handlers.lock().unwrap().entry(recipient.to_string()).or_default().push(handler);
    }

    fn trigger_handlers(&self, recipient: &str, message: &Message) {
        let handlers = self.handlers.lock().unwrap();
        if let Some(direct) = handlers.get(recipient) {
            for handler in direct {
                handler(message);
            }
        }
        if recipient != BROADCAST_RECIPIENT {
            if let Some(broadcast) = handlers.get(BROADCAST_RECIPIENT) {
                for handler in broadcast {
                    handler(message);
                }
            }
        }
    }

    pub async fn get_pending_acks(&self, sender: &str) -> Result<Vec<Message>> {
        Ok(self
            .get_outbox(sender)
            .await?
            .into_iter()
            .filter(|m| m.requires_ack && m.status != MessageStatus::Acknowledged)
            .collect())
    }

    pub async fn get_unread_count(&self, owner: &str) -> Result<usize> {
        Ok(self.get_inbox(owner, true, None).await?.len())
    }

    /// Sweeps every message for expiry, returning how many were newly
    /// marked expired.
    pub async fn cleanup_expired(&self) -> Result<usize> {
        let count = self
            .state
            .transact(|s| {
                let mut expired = 0;
                for msg in s.messages.values_mut() {
                    if msg.is_expired() && msg.status != MessageStatus::Expired {
                        msg.status = MessageStatus::Expired;
                        expired += 1;
                    }
                }
                let dirty = expired > 0;
                Ok((expired, dirty))
            })
            .await?;
        if count > 0 {
            warn!(count, "expired messages swept");
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_message_delivers_to_recipient_inbox() {
        let dir = tempfile::tempdir().unwrap();
        let manager = MailboxManager::open(dir.path()).unwrap();
        manager
            .send_message(
                "scout-1",
                "captain",
                "subject",
                "body",
                MessagePriority::Normal,
                None,
                None,
                None,
                None,
                false,
                None,
                BTreeMap::new(),
                Vec::new(),
            )
            .await
            .unwrap();

        let inbox = manager.get_inbox("captain", false, None).await.unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].sender, "scout-1");
    }

    #[tokio::test]
    async fn broadcast_reaches_every_other_mailbox() {
        let dir = tempfile::tempdir().unwrap();
        let manager = MailboxManager::open(dir.path()).unwrap();
        manager
            .send_message(
                "scout-1",
                "captain",
                "s1",
                "b1",
                MessagePriority::Normal,
                None,
                None,
                None,
                None,
                false,
                None,
                BTreeMap::new(),
                Vec::new(),
            )
            .await
            .unwrap();
        manager
            .send_message(
                "system",
                BROADCAST_RECIPIENT,
                "alert",
                "everyone listen",
                MessagePriority::Urgent,
                None,
                None,
                None,
                None,
                false,
                None,
                BTreeMap::new(),
                Vec::new(),
            )
            .await
            .unwrap();

        let inbox = manager.get_inbox("captain", false, None).await.unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].subject, "alert");
    }

    #[tokio::test]
    async fn inbox_sorts_urgent_before_normal() {
        let dir = tempfile::tempdir().unwrap();
        let manager = MailboxManager::open(dir.path()).unwrap();
        for (subject, priority) in [("normal-msg", MessagePriority::Normal), ("urgent-msg", MessagePriority::Urgent)] {
            manager
                .send_message(
                    "scout-1",
                    "captain",
                    subject,
                    "b",
                    priority,
                    None,
                    None,
                    None,
                    None,
                    false,
                    None,
                    BTreeMap::new(),
                    Vec::new(),
                )
                .await
                .unwrap();
        }
        let inbox = manager.get_inbox("captain", false, None).await.unwrap();
        assert_eq!(inbox[0].subject, "urgent-msg");
    }

    #[tokio::test]
    async fn handlers_fire_for_direct_and_broadcast_recipients() {
        let dir = tempfile::tempdir().unwrap();
        let manager = MailboxManager::open(dir.path()).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        manager.register_handler("captain", Arc::new(move |msg: &Message| seen_clone.lock().unwrap().push(msg.subject.clone())));

        manager
            .send_message(
                "scout-1",
                "captain",
                "hello",
                "body",
                MessagePriority::Normal,
                None,
                None,
                None,
                None,
                false,
                None,
                BTreeMap::new(),
                Vec::new(),
            )
            .await
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["hello".to_string()]);
    }
}
