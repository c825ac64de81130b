//! The captain: task breakdown, convoy planning, and routing-aware
//! coordination built on top of `squad-store`, `squad-router`, and
//! `squad-convoy`.
//!
//! Mirrors `ai_squad.core.captain.Captain` one layer up: where the lower
//! crates each own one concern (durable work items, org-plane routing,
//! parallel dispatch), this crate is the policy layer that decides what
//! work to create, how to group it, and who should run it.

pub mod captain;
pub mod error;
pub mod types;

pub use captain::{AgentRoleConfig, Captain, KNOWN_ROLES};
pub use error::{CaptainError, Result};
pub use types::{
    BlockerSuggestion, CaptainStatus, Complexity, ConvoyPlan, CoordinationPlan, ExecutionSummary, ParallelBatch, Recommendation,
    SequentialStep, TaskBreakdown,
};
