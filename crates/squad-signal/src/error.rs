//! Signal-bus error cases layered on top of [`squad_core::CoreError`].

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SignalError>;

#[derive(Debug, Error)]
pub enum SignalError {
    #[error(transparent)]
    Core(#[from] squad_core::CoreError),

    #[error(transparent)]
    Store(#[from] squad_store::StoreError),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
}
