//! Wire error types.

use thiserror::Error;

/// Errors that can occur while framing, encoding, or exchanging messages.
#[derive(Debug, Error)]
pub enum WireError {
    /// An I/O error occurred on the socket.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Encoding a message failed.
    #[error("encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// Decoding a message failed.
    #[error("decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// A frame exceeded the size limit.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Declared frame size.
        size: usize,
        /// Allowed maximum.
        max: usize,
    },

    /// A remote peer did not answer within its deadline.
    #[error("timed out talking to {0}")]
    Timeout(String),
}

/// A specialized Result type for wire operations.
pub type Result<T> = std::result::Result<T, WireError>;
