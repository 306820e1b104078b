//! Artifact naming rules
//!
//! Artifacts are persisted frames named `<uuid-v4>.<ext>`. Names received over
//! the network are checked here before any filesystem access.

use std::path::Path;
use thiserror::Error;
use uuid::Uuid;

/// Image extensions (lowercase) an artifact may carry
pub const ALLOWED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Reasons a requested artifact name is refused
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidArtifactName {
    #[error("empty name")]
    Empty,

    #[error("path traversal sequence")]
    Traversal,

    #[error("path separator")]
    Separator,

    #[error("control character")]
    ControlCharacter,

    #[error("extension not allowed")]
    Extension,
}

/// True when `name` ends in one of [`ALLOWED_EXTENSIONS`] (case-insensitive)
pub fn has_allowed_extension(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            ALLOWED_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Check a client-supplied artifact name
///
/// Accepts a bare file name only: no `..`, no `/` or `\`, no control
/// characters, and an allow-listed image extension.
pub fn validate_artifact_name(name: &str) -> Result<&str, InvalidArtifactName> {
    if name.is_empty() {
        return Err(InvalidArtifactName::Empty);
    }
    if name.contains("..") {
        return Err(InvalidArtifactName::Traversal);
    }
    if name.contains('/') || name.contains('\\') {
        return Err(InvalidArtifactName::Separator);
    }
    if name.chars().any(char::is_control) {
        return Err(InvalidArtifactName::ControlCharacter);
    }
    if !has_allowed_extension(name) {
        return Err(InvalidArtifactName::Extension);
    }
    Ok(name)
}

/// Fresh globally unique artifact name with the given extension
pub fn generate_artifact_name(extension: &str) -> String {
    format!("{}.{}", Uuid::new_v4(), extension.trim_start_matches('.'))
}
