//! Parallel execution for the squad orchestration core: battle plans,
//! convoys, and the resource-adaptive auto-tuner behind them.
//!
//! Mirrors `ai_squad.core.{battle_plan,convoy}`: a [`plan::BattlePlan`] is a
//! static, YAML-defined strategy turned into dependency-wired work items by
//! [`plan::BattlePlanExecutor`]; a [`convoy::Convoy`] is a batch of
//! already-existing work items dispatched in parallel by
//! [`convoy::ConvoyManager`], with [`resource::ResourceMonitor`] scaling
//! parallelism to host load. Both execute through the single
//! [`worker::Worker`] call site rather than each inventing their own
//! dispatch contract.

pub mod convoy;
pub mod error;
pub mod plan;
pub mod resource;
pub mod worker;

pub use convoy::{Convoy, ConvoyBuilder, ConvoyManager, ConvoyMember, ConvoyStatus, CreateConvoyOptions, MemberStatus};
pub use error::{ConvoyError, Result};
pub use plan::{BattlePlan, BattlePlanExecution, BattlePlanExecutor, BattlePlanManager, BattlePlanPhase, ExecutionStatus, StepCondition};
pub use resource::{ResourceMonitor, ResourceSample};
pub use worker::{BlockingWorker, WorkOutcome, WorkRequest, Worker};
