//! Command grammar for the event and artifact protocols

use thiserror::Error;

const GET_LOGS: &str = "GET_LOGS";
const GET_LOGS_PREFIX: &str = "GET_LOGS:";
const GET_COUNT: &str = "GET_COUNT";
const GET_IMAGE_PREFIX: &str = "GET_IMAGE:";
const LIST_IMAGES: &str = "LIST_IMAGES";

/// Command parse failures, reported to the peer as `ERROR:<message>`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Command word not recognised by this server
    #[error("Unknown command")]
    Unknown,

    /// Recognised command with an unusable argument
    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

/// Requests served by the event protocol server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventCommand {
    /// `GET_LOGS`: drain every pending event
    GetLogs,
    /// `GET_LOGS:<n>`: drain the newest `n` pending events
    GetLastLogs(usize),
    /// `GET_COUNT`: number of pending events, no draining
    GetCount,
}

impl EventCommand {
    /// Parse one command line (surrounding whitespace ignored)
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let line = line.trim();

        if line == GET_LOGS {
            return Ok(Self::GetLogs);
        }
        if line == GET_COUNT {
            return Ok(Self::GetCount);
        }
        if let Some(arg) = line.strip_prefix(GET_LOGS_PREFIX) {
            let arg = arg.trim();
            return arg
                .parse::<usize>()
                .map(Self::GetLastLogs)
                .map_err(|e| CommandError::InvalidFormat(format!("'{}' ({})", arg, e)));
        }

        Err(CommandError::Unknown)
    }

    /// Render as a request line (without trailing newline)
    pub fn to_line(&self) -> String {
        match self {
            Self::GetLogs => GET_LOGS.to_string(),
            Self::GetLastLogs(n) => format!("{}{}", GET_LOGS_PREFIX, n),
            Self::GetCount => GET_COUNT.to_string(),
        }
    }
}

/// Requests served by the artifact protocol server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactCommand {
    /// `GET_IMAGE:<name>`: stream one artifact (name not yet validated)
    GetImage(String),
    /// `LIST_IMAGES`: enumerate available artifacts
    ListImages,
}

impl ArtifactCommand {
    /// Parse one command line (surrounding whitespace ignored)
    ///
    /// The artifact name is returned as sent; validation against path
    /// traversal happens in [`crate::artifact::validate_artifact_name`].
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let line = line.trim();

        if line == LIST_IMAGES {
            return Ok(Self::ListImages);
        }
        if let Some(name) = line.strip_prefix(GET_IMAGE_PREFIX) {
            return Ok(Self::GetImage(name.trim().to_string()));
        }

        Err(CommandError::Unknown)
    }

    /// Render as a request line (without trailing newline)
    pub fn to_line(&self) -> String {
        match self {
            Self::GetImage(name) => format!("{}{}", GET_IMAGE_PREFIX, name),
            Self::ListImages => LIST_IMAGES.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_event_commands() {
        assert_eq!(EventCommand::parse("GET_LOGS"), Ok(EventCommand::GetLogs));
        assert_eq!(EventCommand::parse("  GET_LOGS\r\n"), Ok(EventCommand::GetLogs));
        assert_eq!(EventCommand::parse("GET_COUNT"), Ok(EventCommand::GetCount));
        assert_eq!(
            EventCommand::parse("GET_LOGS:25"),
            Ok(EventCommand::GetLastLogs(25))
        );
        assert_eq!(
            EventCommand::parse("GET_LOGS: 3 "),
            Ok(EventCommand::GetLastLogs(3))
        );
    }

    #[test]
    fn test_parse_get_logs_malformed_count() {
        for line in ["GET_LOGS:", "GET_LOGS:abc", "GET_LOGS:-4", "GET_LOGS:1.5"] {
            match EventCommand::parse(line) {
                Err(CommandError::InvalidFormat(_)) => {}
                other => panic!("expected InvalidFormat for {:?}, got {:?}", line, other),
            }
        }
    }

    #[test]
    fn test_parse_unknown_event_command() {
        assert_eq!(EventCommand::parse("HELLO"), Err(CommandError::Unknown));
        assert_eq!(EventCommand::parse(""), Err(CommandError::Unknown));
        assert_eq!(EventCommand::parse("get_logs"), Err(CommandError::Unknown));
        assert_eq!(EventCommand::parse("LIST_IMAGES"), Err(CommandError::Unknown));
    }

    #[test]
    fn test_event_command_lines() {
        assert_eq!(EventCommand::GetLogs.to_line(), "GET_LOGS");
        assert_eq!(EventCommand::GetLastLogs(7).to_line(), "GET_LOGS:7");
        assert_eq!(EventCommand::GetCount.to_line(), "GET_COUNT");
    }

    #[test]
    fn test_parse_artifact_commands() {
        assert_eq!(ArtifactCommand::parse("LIST_IMAGES"), Ok(ArtifactCommand::ListImages));
        assert_eq!(
            ArtifactCommand::parse("GET_IMAGE:abc.jpg\n"),
            Ok(ArtifactCommand::GetImage("abc.jpg".to_string()))
        );
        // Empty name is a valid parse; the server rejects it during validation
        assert_eq!(
            ArtifactCommand::parse("GET_IMAGE:"),
            Ok(ArtifactCommand::GetImage(String::new()))
        );
        assert_eq!(ArtifactCommand::parse("GET_LOGS"), Err(CommandError::Unknown));
    }

    #[test]
    fn test_command_error_messages() {
        assert_eq!(CommandError::Unknown.to_string(), "Unknown command");
        assert_eq!(
            CommandError::InvalidFormat("'x'".to_string()).to_string(),
            "Invalid format: 'x'"
        );
    }
}
