//! Durable work-item storage: the canonical record of what work exists, who
//! owns it, and how it depends on everything else.
//!
//! Backed by a JSON document guarded by a cross-process advisory lock
//! (`squad_core::persist`), mirroring `ai_squad.core.workstate` one layer up
//! in Rust idiom: transactional mutation, optional per-item hook
//! directories, and a best-effort sync into the shared operational graph.

pub mod error;
pub mod hooks;
pub mod store;

pub use error::{Result, StoreError};
pub use store::{ListFilter, WorkStats, WorkStore};
