//! Error types for vigil-server
//!
//! Defines module-specific error types using thiserror for clear error propagation.

use thiserror::Error;

use crate::detector::DetectorError;
use crate::source::SourceError;

/// Main error type for vigil-server
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file loading or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File or socket I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// External detector invocation errors
    #[error("Detector error: {0}")]
    Detector(#[from] DetectorError),

    /// Frame source errors
    #[error("Frame source error: {0}")]
    Source(#[from] SourceError),

    /// Invalid parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Errors surfaced from vigil-common
    #[error(transparent)]
    Common(#[from] vigil_common::Error),
}

/// Convenience Result type using vigil-server Error
pub type Result<T> = std::result::Result<T, Error>;
