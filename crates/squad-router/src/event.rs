//! Routing events: an append-only audit trail every routing decision writes
//! to, and the only source [`crate::health::HealthView`] reads from -- there
//! is no persistent circuit-breaker state beyond this log.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use squad_core::ids::entity_id;
use squad_core::persist::AppendLog;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStatus {
    Routed,
    Blocked,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingEvent {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub destination: String,
    pub status: RoutingStatus,
    pub execution_mode: String,
    pub message_id: Option<String>,
    pub issue_number: Option<i64>,
    pub reason: Option<String>,
    pub metadata: BTreeMap<String, Value>,
}

impl RoutingEvent {
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        source: impl Into<String>,
        destination: impl Into<String>,
        status: RoutingStatus,
        execution_mode: impl Into<String>,
        message_id: Option<String>,
        issue_number: Option<i64>,
        reason: Option<String>,
        metadata: BTreeMap<String, Value>,
    ) -> Self {
        Self {
            event_id: entity_id().simple().to_string(),
            timestamp: Utc::now(),
            source: source.into(),
            destination: destination.into(),
            status,
            execution_mode: execution_mode.into(),
            message_id,
            issue_number,
            reason,
            metadata,
        }
    }
}

/// Appends [`RoutingEvent`]s to `.squad/events/routing.jsonl`.
pub struct RoutingEventEmitter {
    log: AppendLog,
}

impl RoutingEventEmitter {
    pub fn new(squad_dir: impl AsRef<Path>) -> Self {
        Self {
            log: AppendLog::new(squad_dir.as_ref().join("events/routing.jsonl")),
        }
    }

    pub fn emit(&self, event: &RoutingEvent) -> Result<()> {
        Ok(self.log.append(event)?)
    }

    pub fn read_all(&self) -> Result<Vec<RoutingEvent>> {
        Ok(self.log.read_all()?)
    }
}
