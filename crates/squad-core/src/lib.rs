//! # squad-core
//!
//! Shared types and primitives for the squad orchestration core: the
//! [`workitem::WorkItem`] data model, the [`graph::OperationalGraph`] query
//! surface, the workspace [`config::WorkspaceConfig`] schema, the common
//! [`error::CoreError`] taxonomy, and the [`persist`] module every other
//! `squad-*` crate builds its durability on.
//!
//! Every other crate in the workspace depends on this one, the same role
//! `openintent-kernel` plays underneath `openintent-agent`/`openintent-store`.

pub mod config;
pub mod error;
pub mod graph;
pub mod ids;
pub mod persist;
pub mod workitem;

pub use error::{CoreError, Result};
pub use graph::{EdgeKind, NodeKind, NodeRef, OperationalGraph};
pub use workitem::{HistoryEntry, WorkItem, WorkStatus};
