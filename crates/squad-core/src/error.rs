//! Shared error type for the squad orchestration core.
//!
//! Every crate in the workspace layers its own error enum on top of
//! [`CoreError`] via `#[from]`, the same way `openintent-kernel`'s
//! `KernelError` sits underneath `AgentError`/`IntentError`.

use thiserror::Error;

/// Alias for `Result<T, CoreError>`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors shared by every squad-* crate: store lookups, optimistic-locking
/// conflicts, validation, and the IO/corruption cases the persistence layer
/// surfaces.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The requested entity does not exist in the workspace.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of entity looked up (`"work_item"`, `"plan"`, ...).
        entity: &'static str,
        /// The id that was looked up.
        id: String,
    },

    /// A write was attempted against a stale `expected_version`.
    #[error("concurrent update on {item_id}: expected version {expected}, actual {actual}")]
    ConcurrentUpdate {
        item_id: String,
        expected: u64,
        actual: u64,
    },

    /// Bad input: invalid status transition, unknown role, malformed YAML.
    #[error("validation error: {0}")]
    Validation(String),

    /// JSON (de)serialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML (de)serialization failed.
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Filesystem or lock-acquisition failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A blocking task panicked or was cancelled.
    #[error("background task failed: {0}")]
    TaskJoin(String),
}

impl From<tokio::task::JoinError> for CoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::TaskJoin(err.to_string())
    }
}
