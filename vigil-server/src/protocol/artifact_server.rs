//! Artifact protocol server
//!
//! Streams saved detection images out of the artifact directory. Requested
//! names are validated before any filesystem access, so a request can never
//! resolve outside that directory.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vigil_common::artifact::{has_allowed_extension, validate_artifact_name};
use vigil_common::protocol::framing::{encode_image_list, filesize_header};
use vigil_common::protocol::{error_line, ArtifactCommand, MAX_COMMAND_LEN};

use super::{
    accept_loop, discard_line, read_command_line, write_line, CommandLine, DEFAULT_IO_TIMEOUT,
};

const INVALID_FILENAME: &str = "Invalid filename";
const IMAGE_NOT_FOUND: &str = "Image not found";

/// Artifact protocol server over one directory
#[derive(Debug, Clone)]
pub struct ArtifactServer {
    dir: PathBuf,
    io_timeout: Duration,
}

impl ArtifactServer {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }

    pub fn with_io_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Accept and serve connections until `shutdown` is cancelled
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) {
        let io_timeout = self.io_timeout;
        let server = Arc::new(self);
        accept_loop("Artifact", listener, shutdown, io_timeout, move |stream, peer| {
            let server = Arc::clone(&server);
            async move { server.handle_connection(stream, peer).await }
        })
        .await;
    }

    /// Serve one request on `stream`, then close it
    pub async fn handle_connection(&self, stream: TcpStream, peer: SocketAddr) -> std::io::Result<()> {
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let line = match read_command_line(&mut reader, MAX_COMMAND_LEN).await? {
            CommandLine::Line(line) => line,
            CommandLine::Closed => {
                debug!("Artifact client {} closed without a request", peer);
                return Ok(());
            }
            CommandLine::TooLong => {
                discard_line(&mut reader).await?;
                return write_line(&mut write_half, &error_line("Command too long")).await;
            }
        };

        debug!("Artifact request from {}: {}", peer, line.trim());
        self.respond(&line, &mut write_half).await?;
        write_half.shutdown().await
    }

    /// Write the full response for one request line to `out`
    pub async fn respond<W>(&self, line: &str, out: &mut W) -> std::io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        match ArtifactCommand::parse(line) {
            Ok(ArtifactCommand::GetImage(name)) => self.send_image(&name, out).await,
            Ok(ArtifactCommand::ListImages) => {
                let names = self.list_images().await?;
                write_line(out, &encode_image_list(&names)).await
            }
            Err(e) => write_line(out, &error_line(&e.to_string())).await,
        }
    }

    async fn send_image<W>(&self, name: &str, out: &mut W) -> std::io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let name = match validate_artifact_name(name) {
            Ok(name) => name,
            Err(reason) => {
                warn!("Rejected artifact request '{}': {}", name.escape_debug(), reason);
                return write_line(out, &error_line(INVALID_FILENAME)).await;
            }
        };

        let path = self.dir.join(name);
        let file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) => {
                debug!("Artifact {} unavailable: {}", path.display(), e);
                return write_line(out, &error_line(IMAGE_NOT_FOUND)).await;
            }
        };

        let metadata = file.metadata().await?;
        if !metadata.is_file() {
            return write_line(out, &error_line(IMAGE_NOT_FOUND)).await;
        }

        let size = metadata.len();
        write_line(out, &filesize_header(size)).await?;

        // Exactly `size` bytes, even if the file grows while streaming
        let mut body = tokio::io::AsyncReadExt::take(file, size);
        let sent = tokio::io::copy(&mut body, out).await?;
        out.flush().await?;

        if sent < size {
            warn!("Artifact {} shrank while sending ({} of {} bytes)", name, sent, size);
        } else {
            info!("Sent image {} ({} bytes)", name, size);
        }
        Ok(())
    }

    /// Names of servable artifacts, sorted
    pub async fn list_images(&self) -> std::io::Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(e),
        };

        while let Some(entry) = entries.next_entry().await? {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.starts_with('.') || !has_allowed_extension(&name) || name.contains(',') {
                continue;
            }
            if entry.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
                names.push(name);
            }
        }

        names.sort();
        Ok(names)
    }
}
