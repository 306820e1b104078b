//! Artifact response framing
//!
//! A successful `GET_IMAGE` response is `FILESIZE:<decimal-byte-count>\n`
//! followed by exactly that many raw bytes. `LIST_IMAGES` answers with a
//! single `IMAGES:<name>,<name>,...` line.

use crate::{Error, Result};

/// Header prefix announcing a binary body
pub const FILESIZE_PREFIX: &str = "FILESIZE:";

/// Prefix of the artifact listing line
pub const IMAGES_PREFIX: &str = "IMAGES:";

/// Longest header line a reader should accept before giving up
pub const MAX_HEADER_LEN: usize = 64;

/// Decoded first line of a `GET_IMAGE` response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactHeader {
    /// Body of the given length follows
    FileSize(u64),
    /// Server refused the request
    Error(String),
}

/// Header line for a body of `len` bytes, without trailing newline
pub fn filesize_header(len: u64) -> String {
    format!("{}{}", FILESIZE_PREFIX, len)
}

/// Parse the header line of a `GET_IMAGE` response
pub fn parse_artifact_header(line: &str) -> Result<ArtifactHeader> {
    let line = line.trim();

    if let Some(message) = super::error_message(line) {
        return Ok(ArtifactHeader::Error(message.to_string()));
    }

    let size = line
        .strip_prefix(FILESIZE_PREFIX)
        .ok_or_else(|| Error::Protocol(format!("Invalid header received: '{}'", line)))?;

    size.trim()
        .parse::<u64>()
        .map(ArtifactHeader::FileSize)
        .map_err(|e| Error::Protocol(format!("Invalid file size '{}': {}", size, e)))
}

/// Listing line for the given artifact names, without trailing newline
pub fn encode_image_list<S: AsRef<str>>(names: &[S]) -> String {
    let joined = names
        .iter()
        .map(|name| name.as_ref())
        .collect::<Vec<_>>()
        .join(",");
    format!("{}{}", IMAGES_PREFIX, joined)
}

/// Parse a `LIST_IMAGES` response line
pub fn parse_image_list(line: &str) -> Result<Vec<String>> {
    let line = line.trim();

    if let Some(message) = super::error_message(line) {
        return Err(Error::Protocol(format!("Server error: {}", message)));
    }

    let list = line
        .strip_prefix(IMAGES_PREFIX)
        .ok_or_else(|| Error::Protocol(format!("Invalid image list: '{}'", line)))?;

    Ok(list
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect())
}
