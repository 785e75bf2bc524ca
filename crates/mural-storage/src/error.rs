//! Storage error types.

use thiserror::Error;

/// Errors that can occur during datastore operations.
///
/// The validation variants map one-to-one onto the failure descriptions
/// surfaced to clients; the request handler owns that translation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serializing or deserializing persisted state failed.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// The user name is already registered.
    #[error("user already registered: {0}")]
    DuplicateUser(String),

    /// The channel name is already taken.
    #[error("channel already exists: {0}")]
    DuplicateChannel(String),

    /// The user is not registered on this replica.
    #[error("unknown user: {0}")]
    UnknownUser(String),

    /// The channel does not exist on this replica.
    #[error("unknown channel: {0}")]
    UnknownChannel(String),

    /// An identifier was empty.
    #[error("empty identifier")]
    EmptyName,
}

/// A specialized Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;
