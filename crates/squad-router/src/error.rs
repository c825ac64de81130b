//! Router-specific error cases layered on top of [`squad_core::CoreError`].

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RouterError>;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error(transparent)]
    Core(#[from] squad_core::CoreError),
}
