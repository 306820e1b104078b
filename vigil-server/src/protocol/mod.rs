//! Socket protocol servers
//!
//! Both servers share the same connection model: an accept loop that never
//! waits on a client, one task per accepted connection, one request line per
//! connection, and a per-connection I/O deadline. The accept loop exits when
//! its `CancellationToken` is cancelled; connections already accepted run to
//! completion.

pub mod artifact_server;
pub mod event_server;

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use artifact_server::ArtifactServer;
pub use event_server::EventServer;

/// Default per-connection I/O deadline
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of reading a request line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandLine {
    /// A complete line, newline and trailing `\r` removed
    Line(String),
    /// Peer closed before sending anything
    Closed,
    /// Line exceeded the length limit
    TooLong,
}

/// Read one request line of at most `max_len` bytes (excluding the newline)
///
/// A final line without a newline before EOF is accepted as a command.
pub async fn read_command_line<R>(reader: &mut R, max_len: usize) -> std::io::Result<CommandLine>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let mut limited = (&mut *reader).take(max_len as u64 + 1);
    let n = limited.read_until(b'\n', &mut buf).await?;

    if n == 0 {
        return Ok(CommandLine::Closed);
    }

    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    } else if buf.len() > max_len {
        return Ok(CommandLine::TooLong);
    }

    Ok(CommandLine::Line(String::from_utf8_lossy(&buf).into_owned()))
}

/// Consume input up to and including the next newline (or EOF)
pub async fn discard_line<R>(reader: &mut R) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let buf = reader.fill_buf().await?;
        if buf.is_empty() {
            return Ok(());
        }
        if let Some(pos) = buf.iter().position(|&b| b == b'\n') {
            reader.consume(pos + 1);
            return Ok(());
        }
        let len = buf.len();
        reader.consume(len);
    }
}

/// Write `line` followed by a newline and flush
pub async fn write_line<W>(writer: &mut W, line: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

/// Accept connections on `listener` until `shutdown` is cancelled
///
/// `handler` runs on its own task for every connection and must finish
/// within `io_timeout`, or the connection is dropped.
pub(crate) async fn accept_loop<H, F>(
    name: &'static str,
    listener: TcpListener,
    shutdown: CancellationToken,
    io_timeout: Duration,
    handler: H,
) where
    H: Fn(TcpStream, SocketAddr) -> F + Send + Sync + 'static,
    F: Future<Output = std::io::Result<()>> + Send + 'static,
{
    match listener.local_addr() {
        Ok(addr) => info!("{} server listening on {}", name, addr),
        Err(_) => info!("{} server listening", name),
    }

    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                debug!("{} connection from {}", name, peer);
                let connection = handler(stream, peer);
                tokio::spawn(async move {
                    match tokio::time::timeout(io_timeout, connection).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => debug!("{} connection {} failed: {}", name, peer, e),
                        Err(_) => warn!("{} connection {} timed out after {:?}", name, peer, io_timeout),
                    }
                });
            }
            Err(e) => {
                warn!("{} server accept failed: {}", name, e);
                // Descriptor exhaustion would otherwise spin
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }

    info!("{} server stopped", name);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    async fn read(input: &[u8], max_len: usize) -> CommandLine {
        let mut reader = BufReader::new(input);
        read_command_line(&mut reader, max_len).await.unwrap()
    }

    #[tokio::test]
    async fn test_strips_line_terminator() {
        assert_eq!(read(b"GET_LOGS\n", 1024).await, CommandLine::Line("GET_LOGS".into()));
        assert_eq!(read(b"GET_COUNT\r\n", 1024).await, CommandLine::Line("GET_COUNT".into()));
    }

    #[tokio::test]
    async fn test_line_at_eof_is_accepted() {
        assert_eq!(read(b"GET_COUNT", 1024).await, CommandLine::Line("GET_COUNT".into()));
    }

    #[tokio::test]
    async fn test_empty_input_is_closed() {
        assert_eq!(read(b"", 1024).await, CommandLine::Closed);
    }

    #[tokio::test]
    async fn test_length_limit() {
        assert_eq!(read(b"abcd\n", 4).await, CommandLine::Line("abcd".into()));
        assert_eq!(read(b"abcde\n", 4).await, CommandLine::TooLong);
        assert_eq!(read(&[b'x'; 5000], 1024).await, CommandLine::TooLong);
    }

    #[tokio::test]
    async fn test_discard_line_stops_after_newline() {
        let mut reader = BufReader::new(&b"xxxxxxxx\nNEXT"[..]);
        discard_line(&mut reader).await.unwrap();
        let mut rest = String::new();
        reader.read_line(&mut rest).await.unwrap();
        assert_eq!(rest, "NEXT");
    }

    #[tokio::test]
    async fn test_write_line_appends_newline() {
        let mut out = Vec::new();
        write_line(&mut out, "[]").await.unwrap();
        assert_eq!(out, b"[]\n");
    }
}
