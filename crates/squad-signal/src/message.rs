//! The message: the unit the signal bus routes between agent mailboxes.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Delivery priority, also doubling as inbox sort order (urgent first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessagePriority {
    Urgent,
    High,
    Normal,
    Low,
}

impl Default for MessagePriority {
    fn default() -> Self {
        MessagePriority::Normal
    }
}

/// Lifecycle status of a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Delivered,
    Read,
    Acknowledged,
    Expired,
    Failed,
}

/// A message passed between two agents, or broadcast to every mailbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub sender: String,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub priority: MessagePriority,
    pub status: MessageStatus,
    pub work_item_id: Option<String>,
    pub convoy_id: Option<String>,
    pub thread_id: String,
    pub metadata: BTreeMap<String, Value>,
    pub attachments: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub reply_to: Option<String>,
    pub requires_ack: bool,
}

impl Message {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: String,
        sender: String,
        recipient: String,
        subject: String,
        body: String,
        priority: MessagePriority,
        work_item_id: Option<String>,
        convoy_id: Option<String>,
        thread_id: Option<String>,
        reply_to: Option<String>,
        requires_ack: bool,
        ttl_minutes: Option<i64>,
        metadata: BTreeMap<String, Value>,
        attachments: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            thread_id: thread_id.unwrap_or_else(|| id.clone()),
            id,
            sender,
            recipient,
            subject,
            body,
            priority,
            status: MessageStatus::Pending,
            work_item_id,
            convoy_id,
            metadata,
            attachments,
            created_at: now,
            delivered_at: None,
            read_at: None,
            acknowledged_at: None,
            expires_at: ttl_minutes.map(|m| now + Duration::minutes(m)),
            reply_to,
            requires_ack,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.map(|t| Utc::now() > t).unwrap_or(false)
    }

    pub fn mark_delivered(&mut self) {
        self.status = MessageStatus::Delivered;
        self.delivered_at = Some(Utc::now());
    }

    pub fn mark_read(&mut self) {
        self.status = MessageStatus::Read;
        self.read_at = Some(Utc::now());
    }

    pub fn mark_acknowledged(&mut self) {
        self.status = MessageStatus::Acknowledged;
        self.acknowledged_at = Some(Utc::now());
    }
}
