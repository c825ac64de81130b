//! The single call site every convoy and battle-plan executor dispatches
//! through, whatever the underlying agent implementation looks like.
//!
//! Mirrors the duck-typed `agent_executor` callable `ai_squad.core.convoy`
//! and `ai_squad.core.battle_plan` both accept: something callable with
//! `(agent_type, work_item_id, context)` that returns a result. Rust has no
//! runtime signature introspection, so rather than `battle_plan.py`'s
//! `inspect.signature`-based argument adaptation, every caller always passes
//! the full [`WorkRequest`] and implementations ignore what they don't need.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;

/// Everything a worker might need to act on a dispatched work item.
#[derive(Debug, Clone)]
pub struct WorkRequest {
    pub agent_type: String,
    pub work_item_id: String,
    pub issue_number: Option<i64>,
    pub action: String,
    pub context: BTreeMap<String, Value>,
}

/// Outcome of a dispatched unit of work, the Rust shape of the worker
/// callable's `{success, artifacts?, output?, error?, file_path?}` contract.
#[derive(Debug, Clone, Default)]
pub struct WorkOutcome {
    pub success: bool,
    pub output: Option<String>,
    pub artifacts: Vec<String>,
    pub error: Option<String>,
}

impl WorkOutcome {
    pub fn ok(output: impl Into<String>) -> Self {
        Self { success: true, output: Some(output.into()), ..Default::default() }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self { success: false, error: Some(error.into()), ..Default::default() }
    }
}

/// Dispatches a work item to whatever runs an agent.
///
/// Implementations that only have a synchronous/blocking callable (a
/// subprocess invocation, a CPU-bound routine) should bridge through
/// `tokio::task::spawn_blocking` inside their `dispatch` body rather than
/// block the calling executor's task.
#[async_trait]
pub trait Worker: Send + Sync {
    async fn dispatch(&self, request: WorkRequest) -> WorkOutcome;
}

/// A worker built from a plain blocking closure, bridged onto a blocking
/// thread pool so it never stalls the async executor running the convoy.
pub struct BlockingWorker<F>
where
    F: Fn(WorkRequest) -> WorkOutcome + Send + Sync + 'static,
{
    func: std::sync::Arc<F>,
}

impl<F> BlockingWorker<F>
where
    F: Fn(WorkRequest) -> WorkOutcome + Send + Sync + 'static,
{
    pub fn new(func: F) -> Self {
        Self { func: std::sync::Arc::new(func) }
    }
}

#[async_trait]
impl<F> Worker for BlockingWorker<F>
where
    F: Fn(WorkRequest) -> WorkOutcome + Send + Sync + 'static,
{
    async fn dispatch(&self, request: WorkRequest) -> WorkOutcome {
        let func = std::sync::Arc::clone(&self.func);
        match tokio::task::spawn_blocking(move || func(request)).await {
            Ok(outcome) => outcome,
            Err(err) => WorkOutcome::failed(format!("worker task panicked: {err}")),
        }
    }
}
