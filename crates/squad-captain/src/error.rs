//! Captain-specific error cases layered on top of the lower crates.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CaptainError>;

#[derive(Debug, Error)]
pub enum CaptainError {
    #[error(transparent)]
    Core(#[from] squad_core::CoreError),

    #[error(transparent)]
    Store(#[from] squad_store::StoreError),

    #[error(transparent)]
    Signal(#[from] squad_signal::SignalError),

    #[error(transparent)]
    Router(#[from] squad_router::RouterError),

    #[error(transparent)]
    Convoy(#[from] squad_convoy::ConvoyError),

    /// `dispatch_work` was asked to dispatch an item that isn't `ready`.
    #[error("work item {0} is not ready for dispatch")]
    NotReady(String),

    #[error("work item not found: {0}")]
    WorkItemNotFound(String),
}
