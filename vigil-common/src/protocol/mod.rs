//! Socket protocol shared by the servers and the client
//!
//! Two line-oriented protocols run over plain TCP, one request per connection:
//! - Event protocol: `GET_LOGS`, `GET_LOGS:<n>`, `GET_COUNT`
//! - Artifact protocol: `GET_IMAGE:<name>`, `LIST_IMAGES`
//!
//! Every response is a single line, except a successful `GET_IMAGE`, which is
//! a `FILESIZE:<n>` header line followed by exactly `n` raw bytes.

pub mod command;
pub mod framing;
pub mod wire;

pub use command::{ArtifactCommand, CommandError, EventCommand};
pub use framing::ArtifactHeader;

/// Default port of the event protocol server
pub const DEFAULT_EVENT_PORT: u16 = 9001;

/// Default port of the artifact protocol server
pub const DEFAULT_ARTIFACT_PORT: u16 = 9002;

/// Longest command line a server accepts (excluding the newline)
pub const MAX_COMMAND_LEN: usize = 1024;

/// Prefix of every error response line
pub const ERROR_PREFIX: &str = "ERROR:";

/// Build an error response line (without trailing newline)
pub fn error_line(message: &str) -> String {
    format!("{}{}", ERROR_PREFIX, message)
}

/// Extract the message of an `ERROR:` response line, if it is one
pub fn error_message(line: &str) -> Option<&str> {
    line.trim().strip_prefix(ERROR_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_line_round_trip() {
        let line = error_line("Unknown command");
        assert_eq!(line, "ERROR:Unknown command");
        assert_eq!(error_message(&line), Some("Unknown command"));
    }

    #[test]
    fn test_error_message_ignores_other_lines() {
        assert_eq!(error_message("[]"), None);
        assert_eq!(error_message("FILESIZE:10"), None);
    }
}
