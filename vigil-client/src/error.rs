//! Error types for vigil-client

use std::time::Duration;
use thiserror::Error;

/// Protocol client errors
#[derive(Error, Debug)]
pub enum ClientError {
    /// Connect, read or write failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Request did not complete in time
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Response did not follow the protocol
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Server answered with an `ERROR:` line
    #[error("Server error: {0}")]
    Server(String),

    /// Connection closed before the declared body was received
    #[error("Incomplete image: expected {expected} bytes, received {received}")]
    ShortBody { expected: u64, received: u64 },
}

impl From<vigil_common::Error> for ClientError {
    fn from(err: vigil_common::Error) -> Self {
        match err {
            vigil_common::Error::Io(e) => Self::Io(e),
            other => Self::Protocol(other.to_string()),
        }
    }
}

/// Convenience Result type using ClientError
pub type Result<T> = std::result::Result<T, ClientError>;
