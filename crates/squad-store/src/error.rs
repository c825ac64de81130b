//! Store-specific error cases layered on top of [`squad_core::CoreError`].

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Core(#[from] squad_core::CoreError),

    /// `depends_on` would introduce a self-dependency.
    #[error("work item {item_id} cannot depend on itself")]
    SelfDependency { item_id: String },
}
