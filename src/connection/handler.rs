//! Connection Handler
//!
//! Each client connection runs this loop in its own task until the client
//! goes away or an I/O error occurs.
//!
//! ```text
//!  read bytes ──> buffer ──> decode request ──> execute ──> queue reply
//!       ▲                         │                              │
//!       │                   incomplete                           │
//!       └─────────────────────────┴──────── flush replies <──────┘
//! ```
//!
//! Every complete request already in the buffer is answered, in order, before
//! the next read. A request split across reads waits for the rest of its
//! bytes. A malformed request gets a single error reply, the unread input is
//! discarded, and the connection stays open.

use crate::commands::CommandHandler;
use crate::protocol::parser::MAX_BULK_SIZE;
use crate::protocol::{RespParser, RespValue};
use bytes::{Buf, BytesMut};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tracing::{debug, error, info, trace, warn};

/// Upper bound on buffered, not yet decoded input.
///
/// Large enough for one maximal bulk string plus its framing.
const MAX_BUFFER_SIZE: usize = MAX_BULK_SIZE + 64 * 1024;

const INITIAL_BUFFER_SIZE: usize = 4096;

/// Counters shared by every connection.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    pub connections_accepted: AtomicU64,
    pub active_connections: AtomicU64,
    pub commands_processed: AtomicU64,
    /// Malformed requests answered with an error
    pub protocol_errors: AtomicU64,
    pub bytes_read: AtomicU64,
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

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written.fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Serves one client over any byte stream.
pub struct ConnectionHandler<S> {
    stream: BufWriter<S>,

    /// Peer address, for logging
    addr: SocketAddr,

    /// Bytes read but not yet decoded
    buffer: BytesMut,

    command_handler: CommandHandler,
    parser: RespParser,
    stats: Arc<ConnectionStats>,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(
        stream: S,
        addr: SocketAddr,
        command_handler: CommandHandler,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        stats.connection_opened();

        Self {
            stream: BufWriter::new(stream),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            command_handler,
            parser: RespParser::new(),
            stats,
        }
    }

    /// Runs until the client disconnects or the connection fails.
    ///
    /// A clean disconnect between requests is reported as
    /// [`ConnectionError::ClientDisconnected`].
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, "Client connected");

        let result = self.main_loop().await;

        match &result {
            Ok(()) => info!(client = %self.addr, "Client disconnected gracefully"),
            Err(ConnectionError::ClientDisconnected) => {
                info!(client = %self.addr, "Client disconnected")
            }
            Err(ConnectionError::Io(e)) if e.kind() == std::io::ErrorKind::ConnectionReset => {
                debug!(client = %self.addr, "Connection reset by client")
            }
            Err(e) => warn!(client = %self.addr, error = %e, "Connection error"),
        }

        self.stats.connection_closed();
        result
    }

    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            self.process_buffer().await?;
            self.read_more_data().await?;
        }
    }

    /// Answers every complete request in the buffer, then flushes once.
    async fn process_buffer(&mut self) -> Result<(), ConnectionError> {
        let mut replied = false;

        while !self.buffer.is_empty() {
            match self.parser.parse_request(&self.buffer) {
                Ok(Some((request, consumed))) => {
                    self.buffer.advance(consumed);
                    trace!(
                        client = %self.addr,
                        consumed,
                        remaining = self.buffer.len(),
                        "Decoded request"
                    );

                    let response = self.command_handler.execute(&request);
                    self.stats.command_processed();
                    self.queue_response(&response).await?;
                    replied = true;
                }
                Ok(None) => {
                    trace!(
                        client = %self.addr,
                        buffered = self.buffer.len(),
                        "Incomplete request, need more data"
                    );
                    break;
                }
                Err(e) => {
                    warn!(
                        client = %self.addr,
                        error = %e,
                        discarded = self.buffer.len(),
                        "Malformed request"
                    );
                    self.stats.protocol_error();
                    self.buffer.clear();
                    self.queue_response(&RespValue::error(format!("ERR: {}", e)))
                        .await?;
                    replied = true;
                }
            }
        }

        if replied {
            self.stream.flush().await?;
        }
        Ok(())
    }

    async fn read_more_data(&mut self) -> Result<(), ConnectionError> {
        if self.buffer.len() >= MAX_BUFFER_SIZE {
            error!(
                client = %self.addr,
                size = self.buffer.len(),
                "Buffer size limit exceeded"
            );
            return Err(ConnectionError::BufferFull);
        }

        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(INITIAL_BUFFER_SIZE);
        }

        let n = self.stream.get_mut().read_buf(&mut self.buffer).await?;

        if n == 0 {
            return if self.buffer.is_empty() {
                Err(ConnectionError::ClientDisconnected)
            } else {
                Err(ConnectionError::UnexpectedEof)
            };
        }

        self.stats.bytes_read(n);
        trace!(client = %self.addr, bytes = n, "Read data");
        Ok(())
    }

    /// Encodes a reply into the write buffer without flushing.
    async fn queue_response(&mut self, response: &RespValue) -> Result<(), ConnectionError> {
        let bytes = response.serialize();
        self.stream.write_all(&bytes).await?;
        self.stats.bytes_written(bytes.len());
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Client disconnected")]
    ClientDisconnected,

    /// The stream closed in the middle of a request
    #[error("Unexpected end of stream")]
    UnexpectedEof,

    #[error("Buffer size limit exceeded")]
    BufferFull,
}

/// Serves one accepted TCP client to completion.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    command_handler: CommandHandler,
    stats: Arc<ConnectionStats>,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(client = %addr, error = %e, "Failed to set TCP_NODELAY");
    }

    let handler = ConnectionHandler::new(stream, addr, command_handler, stats);
    if let Err(e) = handler.run().await {
        match e {
            ConnectionError::ClientDisconnected => {}
            ConnectionError::Io(ref io_err)
                if io_err.kind() == std::io::ErrorKind::ConnectionReset => {}
            _ => {
                debug!(client = %addr, error = %e, "Connection ended with error");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{SnapshotStore, StorageEngine};
    use tempfile::TempDir;
    use tokio::net::TcpListener;
    use tokio::time::{timeout, Duration, Instant};
    use tokio_test::io::Builder;

    fn command_handler(dir: &TempDir) -> CommandHandler {
        let storage = Arc::new(StorageEngine::new());
        let snapshot = Arc::new(SnapshotStore::new(
            Arc::clone(&storage),
            dir.path().join("test.snapshot"),
        ));
        CommandHandler::new(storage, snapshot)
    }

    fn test_addr() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 0))
    }

    async fn create_test_server() -> (SocketAddr, Arc<ConnectionStats>, TempDir) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let dir = TempDir::new().unwrap();
        let handler = command_handler(&dir);
        let stats = Arc::new(ConnectionStats::new());

        let stats_clone = Arc::clone(&stats);
        tokio::spawn(async move {
            while let Ok((stream, client_addr)) = listener.accept().await {
                let stats = Arc::clone(&stats_clone);
                tokio::spawn(handle_connection(stream, client_addr, handler.clone(), stats));
            }
        });

        (addr, stats, dir)
    }

    /// Reads until `expected` bytes have arrived or two seconds pass.
    async fn read_exact_len(client: &mut TcpStream, expected: usize) -> Vec<u8> {
        let mut buf = vec![0u8; expected.max(256)];
        let mut total = 0;
        let deadline = Instant::now() + Duration::from_secs(2);

        while total < expected && Instant::now() < deadline {
            match timeout(Duration::from_millis(100), client.read(&mut buf[total..])).await {
                Ok(Ok(n)) if n > 0 => total += n,
                Ok(_) => break,
                Err(_) => continue,
            }
        }

        buf.truncate(total);
        buf
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let (addr, _stats, _dir) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
        assert_eq!(read_exact_len(&mut client, 10).await, b"$4\r\nPONG\r\n");
    }

    #[tokio::test]
    async fn test_set_get() {
        let (addr, _stats, _dir) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client
            .write_all(b"*3\r\n$3\r\nSET\r\n$4\r\nname\r\n$4\r\nAriz\r\n")
            .await
            .unwrap();
        assert_eq!(read_exact_len(&mut client, 5).await, b"+OK\r\n");

        client
            .write_all(b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n")
            .await
            .unwrap();
        assert_eq!(read_exact_len(&mut client, 10).await, b"$4\r\nAriz\r\n");
    }

    #[tokio::test]
    async fn test_pipelined_requests_answered_in_order() {
        let (addr, _stats, _dir) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client
            .write_all(b"*3\r\n$3\r\nSET\r\n$2\r\nk1\r\n$2\r\nv1\r\n*3\r\n$3\r\nSET\r\n$2\r\nk2\r\n$2\r\nv2\r\n*2\r\n$3\r\nGET\r\n$2\r\nk1\r\n*2\r\n$3\r\nGET\r\n$2\r\nk2\r\n")
            .await
            .unwrap();

        let expected = b"+OK\r\n+OK\r\n$2\r\nv1\r\n$2\r\nv2\r\n";
        assert_eq!(read_exact_len(&mut client, expected.len()).await, expected);
    }

    #[tokio::test]
    async fn test_connection_survives_malformed_request() {
        let (addr, stats, _dir) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"+PING\r\n").await.unwrap();
        let expected = b"-ERR: commands are Resp Arrays\r\n";
        assert_eq!(read_exact_len(&mut client, expected.len()).await, expected);

        client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
        assert_eq!(read_exact_len(&mut client, 10).await, b"$4\r\nPONG\r\n");
        assert_eq!(stats.protocol_errors.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_connection_stats() {
        let (addr, stats, _dir) = create_test_server().await;

        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);

        let mut client = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 1);
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 1);

        client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
        read_exact_len(&mut client, 10).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(stats.commands_processed.load(Ordering::Relaxed), 1);
        assert!(stats.bytes_read.load(Ordering::Relaxed) > 0);
        assert_eq!(stats.bytes_written.load(Ordering::Relaxed), 10);

        drop(client);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_request_split_across_reads() {
        let dir = TempDir::new().unwrap();
        let stream = Builder::new()
            .read(b"*2\r\n$4\r\nEC")
            .read(b"HO\r\n$5\r\nhel")
            .read(b"lo\r\n")
            .write(b"$5\r\nhello\r\n")
            .build();
        let stats = Arc::new(ConnectionStats::new());

        let handler = ConnectionHandler::new(stream, test_addr(), command_handler(&dir), stats);
        let result = handler.run().await;

        assert!(matches!(result, Err(ConnectionError::ClientDisconnected)));
    }

    #[tokio::test]
    async fn test_malformed_request_discards_buffered_input() {
        let dir = TempDir::new().unwrap();
        // The PING after the bad frame arrives in the same read and is dropped.
        let stream = Builder::new()
            .read(b"*1\r\n$4\r\nPINGxx*1\r\n$4\r\nPING\r\n")
            .write(b"-ERR: Missing CRLF after data.\r\n")
            .read(b"*1\r\n$4\r\nPING\r\n")
            .write(b"$4\r\nPONG\r\n")
            .build();
        let stats = Arc::new(ConnectionStats::new());

        let handler = ConnectionHandler::new(
            stream,
            test_addr(),
            command_handler(&dir),
            Arc::clone(&stats),
        );
        let _ = handler.run().await;

        assert_eq!(stats.commands_processed.load(Ordering::Relaxed), 1);
        assert_eq!(stats.protocol_errors.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_eof_mid_request() {
        let dir = TempDir::new().unwrap();
        let stream = Builder::new().read(b"*2\r\n$3\r\nGET\r\n").build();
        let stats = Arc::new(ConnectionStats::new());

        let handler = ConnectionHandler::new(
            stream,
            test_addr(),
            command_handler(&dir),
            Arc::clone(&stats),
        );
        let result = handler.run().await;

        assert!(matches!(result, Err(ConnectionError::UnexpectedEof)));
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_bad_length_reply_texts() {
        let dir = TempDir::new().unwrap();
        let stream = Builder::new()
            .read(b"*x\r\n")
            .write(b"-ERR: Missing length of data.\r\n")
            .read(b"*1\r\n#4\r\nPING\r\n")
            .write(b"-ERR: Invalid type char for Resp data type.\r\n")
            .read(b"*1\r\n$4\n")
            .write(b"-ERR: Missing CRLF before data.\r\n")
            .build();
        let stats = Arc::new(ConnectionStats::new());

        let handler = ConnectionHandler::new(
            stream,
            test_addr(),
            command_handler(&dir),
            Arc::clone(&stats),
        );
        let result = handler.run().await;

        assert!(matches!(result, Err(ConnectionError::ClientDisconnected)));
        assert_eq!(stats.protocol_errors.load(Ordering::Relaxed), 3);
    }
}
