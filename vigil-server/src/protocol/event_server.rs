//! Event protocol server
//!
//! Serves the pending detection events of the shared [`EventStore`]:
//! `GET_LOGS` drains everything, `GET_LOGS:<n>` drains the newest `n`,
//! `GET_COUNT` reports the pending count without draining.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use vigil_common::protocol::wire::{encode_count, encode_events};
use vigil_common::protocol::{error_line, EventCommand, MAX_COMMAND_LEN};

use super::{
    accept_loop, discard_line, read_command_line, write_line, CommandLine, DEFAULT_IO_TIMEOUT,
};
use crate::store::EventStore;

/// Event protocol server over one shared store
#[derive(Clone)]
pub struct EventServer {
    store: Arc<EventStore>,
    io_timeout: Duration,
}

impl EventServer {
    pub fn new(store: Arc<EventStore>) -> Self {
        Self {
            store,
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }

    pub fn with_io_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    /// Accept and serve connections until `shutdown` is cancelled
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) {
        let io_timeout = self.io_timeout;
        let server = Arc::new(self);
        accept_loop("Event", listener, shutdown, io_timeout, move |stream, peer| {
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
                debug!("Event client {} closed without a request", peer);
                return Ok(());
            }
            CommandLine::TooLong => {
                discard_line(&mut reader).await?;
                return write_line(&mut write_half, &error_line("Command too long")).await;
            }
        };

        debug!("Event request from {}: {}", peer, line.trim());
        let response = self.respond(&line).await;
        write_line(&mut write_half, &response).await
    }

    /// Response line (without newline) for one request line
    pub async fn respond(&self, line: &str) -> String {
        match EventCommand::parse(line) {
            Ok(EventCommand::GetLogs) => {
                let events = self.store.drain_all().await;
                if !events.is_empty() {
                    info!("Sent {} events to client", events.len());
                }
                encode_events(&events)
            }
            Ok(EventCommand::GetLastLogs(n)) => {
                let events = self.store.drain_last(n).await;
                if !events.is_empty() {
                    info!("Sent last {} of {} requested events", events.len(), n);
                }
                encode_events(&events)
            }
            Ok(EventCommand::GetCount) => encode_count(self.store.size().await),
            Err(e) => error_line(&e.to_string()),
        }
    }
}
