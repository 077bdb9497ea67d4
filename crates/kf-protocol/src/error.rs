//! Protocol error types

use thiserror::Error;

/// Errors that can occur while framing datagrams
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Payload exceeds maximum size
    #[error("Payload too large: {size} bytes exceeds maximum of {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    /// Stream ended in the middle of a frame
    #[error("Incomplete frame: expected {expected} bytes, got {actual}")]
    IncompleteFrame { expected: usize, actual: usize },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
