//! Error type for conversation management.

use parley_model::{FactoryError, ModelError};
use thiserror::Error;

/// Error surfaced to callers of the registry and helpers.
///
/// Construction-time and generation-time errors bubble up unmodified in
/// kind; persistence failures are deliberately swallowed at the boundary
/// where they occur and never appear here.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Model construction failed (unsupported type, missing configuration).
    #[error(transparent)]
    Factory(#[from] FactoryError),

    /// The bound backend failed to generate or stream.
    #[error(transparent)]
    Model(#[from] ModelError),
}
