//! Registry error types.

use thiserror::Error;

/// Errors that can occur talking to the registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The wire exchange failed (unreachable registry, timeout, codec).
    #[error("wire error: {0}")]
    Wire(#[from] mural_wire::WireError),

    /// The registry answered with a failure status.
    #[error("registry rejected request: {0}")]
    Rejected(String),
}

/// A specialized Result type for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;
