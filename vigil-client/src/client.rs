//! Protocol client
//!
//! Every request opens a new connection, sends one command line and reads
//! the response until the server closes (or, for images, until the declared
//! number of bytes arrived). Connect and the whole exchange share one
//! deadline.

use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};
use vigil_common::protocol::framing::{parse_artifact_header, parse_image_list, MAX_HEADER_LEN};
use vigil_common::protocol::wire::{decode_count, decode_events};
use vigil_common::protocol::{
    error_message, ArtifactCommand, ArtifactHeader, EventCommand, DEFAULT_ARTIFACT_PORT,
    DEFAULT_EVENT_PORT,
};
use vigil_common::DetectionEvent;

use crate::error::{ClientError, Result};

/// Default connect and I/O deadline
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Largest image the client accepts
pub const DEFAULT_MAX_ARTIFACT_SIZE: u64 = 64 * 1024 * 1024;

/// Client for the event and artifact protocols of one server host
#[derive(Debug, Clone)]
pub struct ProtocolClient {
    host: String,
    event_port: u16,
    artifact_port: u16,
    timeout: Duration,
    max_artifact_size: u64,
}

impl ProtocolClient {
    /// Client for `host` on the default ports
    pub fn new(host: impl Into<String>) -> Self {
        Self::with_ports(host, DEFAULT_EVENT_PORT, DEFAULT_ARTIFACT_PORT)
    }

    pub fn with_ports(host: impl Into<String>, event_port: u16, artifact_port: u16) -> Self {
        Self {
            host: host.into(),
            event_port,
            artifact_port,
            timeout: DEFAULT_TIMEOUT,
            max_artifact_size: DEFAULT_MAX_ARTIFACT_SIZE,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_artifact_size(mut self, max: u64) -> Self {
        self.max_artifact_size = max;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Drain all pending events (`GET_LOGS`)
    ///
    /// An `ERROR:` reply or a malformed line yields no events. Only transport
    /// failures are errors.
    pub async fn fetch_events(&self) -> Result<Vec<DetectionEvent>> {
        let command = EventCommand::GetLogs.to_line();
        let line = self.request_line(self.event_port, &command).await?;
        if let Some(message) = error_message(&line) {
            warn!("Server rejected {}: {}", command, message);
            return Ok(Vec::new());
        }
        let events = decode_events(&line);
        debug!("Received {} events", events.len());
        Ok(events)
    }

    /// Drain the newest `n` pending events (`GET_LOGS:<n>`)
    pub async fn fetch_last_events(&self, n: usize) -> Result<Vec<DetectionEvent>> {
        let line = self.event_request(&EventCommand::GetLastLogs(n)).await?;
        Ok(decode_events(&line))
    }

    /// Number of pending events (`GET_COUNT`), without draining
    pub async fn fetch_count(&self) -> Result<usize> {
        let line = self.event_request(&EventCommand::GetCount).await?;
        Ok(decode_count(&line)?)
    }

    /// Download one image (`GET_IMAGE:<name>`)
    pub async fn fetch_artifact(&self, name: &str) -> Result<Vec<u8>> {
        let command = ArtifactCommand::GetImage(name.to_string()).to_line();
        let data = self
            .with_deadline(async {
                let mut stream = self.connect(self.artifact_port).await?;
                send_line(&mut stream, &command).await?;
                read_artifact(&mut stream, self.max_artifact_size).await
            })
            .await?;

        info!("Received image {} ({} bytes)", name, data.len());
        Ok(data)
    }

    /// Download one image and write it to `dest`
    pub async fn download_artifact(&self, name: &str, dest: &Path) -> Result<u64> {
        let data = self.fetch_artifact(name).await?;
        tokio::fs::write(dest, &data).await?;
        Ok(data.len() as u64)
    }

    /// Names of the images available on the server (`LIST_IMAGES`)
    pub async fn list_artifacts(&self) -> Result<Vec<String>> {
        let command = ArtifactCommand::ListImages.to_line();
        let line = self.request_line(self.artifact_port, &command).await?;
        check_server_error(&line)?;
        Ok(parse_image_list(&line)?)
    }

    async fn event_request(&self, command: &EventCommand) -> Result<String> {
        let line = self.request_line(self.event_port, &command.to_line()).await?;
        check_server_error(&line)?;
        Ok(line)
    }

    /// Send `command` and read the single response line
    async fn request_line(&self, port: u16, command: &str) -> Result<String> {
        self.with_deadline(async {
            let mut stream = self.connect(port).await?;
            send_line(&mut stream, command).await?;

            let mut reader = BufReader::new(stream);
            let mut line = String::new();
            reader.read_line(&mut line).await?;
            Ok(line.trim_end_matches(['\r', '\n']).to_string())
        })
        .await
    }

    async fn connect(&self, port: u16) -> Result<TcpStream> {
        debug!("Connecting to {}:{}", self.host, port);
        Ok(TcpStream::connect((self.host.as_str(), port)).await?)
    }

    async fn with_deadline<T, F>(&self, request: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| ClientError::Timeout(self.timeout))?
    }
}

async fn send_line(stream: &mut TcpStream, line: &str) -> Result<()> {
    stream.write_all(line.as_bytes()).await?;
    stream.write_all(b"\n").await?;
    stream.flush().await?;
    Ok(())
}

fn check_server_error(line: &str) -> Result<()> {
    match error_message(line) {
        Some(message) => Err(ClientError::Server(message.to_string())),
        None => Ok(()),
    }
}

/// Read the header byte by byte, so no body byte is consumed with it
async fn read_header<R>(reader: &mut R) -> Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut header = Vec::with_capacity(MAX_HEADER_LEN);
    loop {
        let mut byte = [0u8; 1];
        if reader.read(&mut byte).await? == 0 {
            return Err(ClientError::Protocol(format!(
                "Connection closed inside header after {} bytes",
                header.len()
            )));
        }
        if byte[0] == b'\n' {
            break;
        }
        if header.len() == MAX_HEADER_LEN {
            return Err(ClientError::Protocol(format!(
                "Header longer than {} bytes",
                MAX_HEADER_LEN
            )));
        }
        header.push(byte[0]);
    }

    String::from_utf8(header).map_err(|_| ClientError::Protocol("Header is not valid UTF-8".to_string()))
}

/// Read a `GET_IMAGE` response: header, then exactly the declared body
pub async fn read_artifact<R>(reader: &mut R, max_size: u64) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let header = read_header(reader).await?;
    let size = match parse_artifact_header(&header)? {
        ArtifactHeader::FileSize(size) => size,
        ArtifactHeader::Error(message) => return Err(ClientError::Server(message)),
    };

    if size > max_size {
        return Err(ClientError::Protocol(format!(
            "Image too large: {} bytes (limit {})",
            size, max_size
        )));
    }

    let mut data = Vec::with_capacity(size as usize);
    let received = reader.take(size).read_to_end(&mut data).await? as u64;
    if received < size {
        return Err(ClientError::ShortBody {
            expected: size,
            received,
        });
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_artifact() {
        let mut input: &[u8] = b"FILESIZE:4\nabcdEXTRA";
        let data = read_artifact(&mut input, 1024).await.unwrap();
        assert_eq!(data, b"abcd");
        assert_eq!(input, b"EXTRA");
    }

    #[tokio::test]
    async fn test_read_artifact_empty_body() {
        let mut input: &[u8] = b"FILESIZE:0\n";
        assert!(read_artifact(&mut input, 1024).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_read_artifact_server_error() {
        let mut input: &[u8] = b"ERROR:Image not found\n";
        match read_artifact(&mut input, 1024).await {
            Err(ClientError::Server(message)) => assert_eq!(message, "Image not found"),
            other => panic!("expected Server error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_read_artifact_short_body() {
        let mut input: &[u8] = b"FILESIZE:10\nabc";
        match read_artifact(&mut input, 1024).await {
            Err(ClientError::ShortBody { expected, received }) => {
                assert_eq!(expected, 10);
                assert_eq!(received, 3);
            }
            other => panic!("expected ShortBody, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_read_artifact_bad_headers() {
        let mut input: &[u8] = b"SIZE:4\nabcd";
        assert!(matches!(read_artifact(&mut input, 1024).await, Err(ClientError::Protocol(_))));

        let mut input: &[u8] = b"FILESIZE:-1\n";
        assert!(matches!(read_artifact(&mut input, 1024).await, Err(ClientError::Protocol(_))));

        let long = [b'9'; 200];
        let mut input: &[u8] = &long;
        assert!(matches!(read_artifact(&mut input, 1024).await, Err(ClientError::Protocol(_))));

        let mut input: &[u8] = b"FILESIZE:4";
        assert!(matches!(read_artifact(&mut input, 1024).await, Err(ClientError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_read_artifact_oversized() {
        let mut input: &[u8] = b"FILESIZE:2048\n";
        assert!(matches!(read_artifact(&mut input, 1024).await, Err(ClientError::Protocol(_))));
    }

    #[test]
    fn test_check_server_error() {
        assert!(check_server_error("[]").is_ok());
        assert!(matches!(
            check_server_error("ERROR:Unknown command"),
            Err(ClientError::Server(m)) if m == "Unknown command"
        ));
    }

    #[tokio::test]
    async fn test_connection_refused_is_io_error() {
        // Bind then drop to obtain a port with no listener
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = ProtocolClient::with_ports("127.0.0.1", port, port);
        assert!(matches!(client.fetch_count().await, Err(ClientError::Io(_))));
    }
}
