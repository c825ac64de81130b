//! Inter-agent communication: mailboxes, the handoff protocol, and
//! delegation tracking.
//!
//! Mirrors `ai_squad.core.{mailbox,handoff,delegation}` behind the same
//! transactional-JSON persistence `squad-store` uses, wired together so a
//! handoff acceptance reassigns the work item and a delegation completion
//! notifies its originator over the mailbox.

pub mod delegation;
pub mod error;
pub mod handoff;
pub mod mailbox;
pub mod message;

pub use delegation::{DelegationLink, DelegationManager, DelegationStatus};
pub use error::{Result, SignalError};
pub use handoff::{Handoff, HandoffContext, HandoffManager, HandoffReason, HandoffStatus};
pub use mailbox::{Mailbox, MailboxManager, MessageHandler};
pub use message::{Message, MessagePriority, MessageStatus};
