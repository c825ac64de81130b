//! Convoy-specific error cases layered on top of [`squad_core::CoreError`].

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ConvoyError>;

#[derive(Debug, Error)]
pub enum ConvoyError {
    #[error(transparent)]
    Core(#[from] squad_core::CoreError),

    #[error(transparent)]
    Store(#[from] squad_store::StoreError),

    #[error(transparent)]
    Signal(#[from] squad_signal::SignalError),

    /// Referenced a convoy id that was never created (or already dropped).
    #[error("convoy not found: {0}")]
    ConvoyNotFound(String),

    /// Referenced a strategy name that has no registered battle plan.
    #[error("strategy not found: {0}")]
    StrategyNotFound(String),

    /// Referenced a battle plan execution id that doesn't exist.
    #[error("execution not found: {0}")]
    ExecutionNotFound(String),

    /// `execute_convoy`/`execute_convoy_tasks` called with no worker wired up.
    #[error("no worker configured for convoy execution")]
    NoWorker,

    /// A convoy's wall-clock timeout elapsed before every member finished.
    #[error("convoy {0} timed out after {1} minutes")]
    TimedOut(String, u64),

    /// Bad input: malformed battle-plan YAML, duplicate phase name, etc.
    #[error("validation error: {0}")]
    Validation(String),
}
