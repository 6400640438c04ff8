//! Connection Handler
//!
//! Each accepted client runs in its own task: read bytes into the
//! connection's input buffer, parse as many complete RESP commands as the
//! buffer holds, dispatch each one, and write the replies back in order.
//!
//! ```text
//! 1. Client connects (TCP handshake)
//!        │
//!        ▼
//! 2. Handler task spawned
//!        │
//!        ▼
//! 3. ┌──────────────────────────────┐
//!    │  read into Buffer            │
//!    │      │                       │
//!    │      ▼                       │
//!    │  parse RESP commands         │◄─── pipelining: a single read
//!    │      │                       │     may yield many commands
//!    │      ▼                       │
//!    │  dispatch → reply            │
//!    └──────────────────────────────┘
//!        │
//!        ▼
//! 4. Disconnect, protocol error, or I/O error ends the task
//! ```
//!
//! A protocol violation is fatal: the error reply is sent and the
//! connection closed, discarding any buffered input and any pending
//! transaction queue. Effects already applied to the keyspace and the AOF
//! are retained.

use crate::commands::{DispatchOutcome, Dispatcher};
use crate::connection::buffer::Buffer;
use crate::protocol::{self, ParseError, RespValue};
use crate::transaction::TransactionSession;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tracing::{debug, info, trace, warn};

/// Ceiling on buffered input without a single complete command (64 MB).
const MAX_BUFFER_SIZE: usize = 64 * 1024 * 1024;

/// Statistics for connection handling.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written
            .fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Errors that end a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// RESP parse error; the connection was told and closed
    #[error("parse error: {0}")]
    ParseError(#[from] ParseError),

    /// Command shape violation; the connection was told and closed
    #[error("protocol violation")]
    ProtocolViolation,

    /// Client disconnected between commands
    #[error("client disconnected")]
    ClientDisconnected,

    /// Stream ended mid-command
    #[error("unexpected end of stream")]
    UnexpectedEof,

    /// Input buffer grew past its ceiling without a complete command
    #[error("input buffer limit exceeded")]
    BufferFull,
}

/// Serves a single client connection.
pub struct ConnectionHandler {
    stream: BufWriter<TcpStream>,
    addr: SocketAddr,
    buffer: Buffer,
    dispatcher: Arc<Dispatcher>,
    session: TransactionSession,
    stats: Arc<ConnectionStats>,
}

impl ConnectionHandler {
    pub fn new(
        stream: TcpStream,
        addr: SocketAddr,
        dispatcher: Arc<Dispatcher>,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        stats.connection_opened();

        Self {
            stream: BufWriter::new(stream),
            addr,
            buffer: Buffer::new(),
            dispatcher,
            session: TransactionSession::new(),
            stats,
        }
    }

    /// Runs the connection to completion.
    ///
    /// The per-connection transaction queue dies with the handler; applied
    /// side effects are retained.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, "client connected");

        let result = self.main_loop().await;

        match &result {
            Ok(()) => info!(client = %self.addr, "client disconnected"),
            Err(ConnectionError::ClientDisconnected) => {
                debug!(client = %self.addr, "client disconnected")
            }
            Err(ConnectionError::IoError(io_err))
                if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
            {
                debug!(client = %self.addr, "connection reset by client")
            }
            Err(e) => warn!(client = %self.addr, error = %e, "connection closed"),
        }

        self.stats.connection_closed();
        result
    }

    /// The read-parse-dispatch-reply loop.
    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            self.drain_buffered_commands().await?;
            self.read_more_data().await?;
        }
    }

    /// Parses and dispatches every complete command currently buffered.
    async fn drain_buffered_commands(&mut self) -> Result<(), ConnectionError> {
        loop {
            match protocol::parse(self.buffer.peek()) {
                Ok(Some((value, consumed))) => {
                    self.buffer.retrieve(consumed);
                    trace!(
                        client = %self.addr,
                        consumed,
                        remaining = self.buffer.readable_bytes(),
                        "parsed command"
                    );

                    match self.dispatcher.dispatch(&mut self.session, value) {
                        DispatchOutcome::Reply(reply) => self.send_reply(&reply).await?,
                        DispatchOutcome::FatalReply(reply) => {
                            self.send_reply(&reply).await?;
                            return Err(ConnectionError::ProtocolViolation);
                        }
                    }
                }
                Ok(None) => return Ok(()),
                Err(e) => {
                    warn!(client = %self.addr, error = %e, "protocol error");
                    self.send_reply(&RespValue::error("ERR Protocol error"))
                        .await?;
                    return Err(e.into());
                }
            }
        }
    }

    /// Reads more bytes from the socket into the input buffer.
    async fn read_more_data(&mut self) -> Result<(), ConnectionError> {
        if self.buffer.readable_bytes() >= MAX_BUFFER_SIZE {
            warn!(
                client = %self.addr,
                buffered = self.buffer.readable_bytes(),
                "input buffer limit exceeded"
            );
            return Err(ConnectionError::BufferFull);
        }

        let n = self.buffer.read_from(self.stream.get_mut()).await?;

        if n == 0 {
            if self.buffer.readable_bytes() == 0 {
                return Err(ConnectionError::ClientDisconnected);
            }
            return Err(ConnectionError::UnexpectedEof);
        }

        self.stats.bytes_read(n);
        trace!(client = %self.addr, bytes = n, "read data");

        Ok(())
    }

    /// Serializes one reply and writes it out.
    async fn send_reply(&mut self, reply: &RespValue) -> Result<(), ConnectionError> {
        let bytes = reply.serialize();
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        self.stats.bytes_written(bytes.len());
        trace!(client = %self.addr, bytes = bytes.len(), "sent reply");
        Ok(())
    }
}

/// Creates a handler for one accepted connection and runs it to
/// completion. Spawned per client from the accept loop.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    dispatcher: Arc<Dispatcher>,
    stats: Arc<ConnectionStats>,
) {
    let handler = ConnectionHandler::new(stream, addr, dispatcher, stats);
    if let Err(e) = handler.run().await {
        match e {
            ConnectionError::ClientDisconnected => {}
            ConnectionError::IoError(ref io_err)
                if io_err.kind() == std::io::ErrorKind::ConnectionReset => {}
            _ => {
                debug!(client = %addr, error = %e, "connection ended with error");
            }
        }
    }
}
