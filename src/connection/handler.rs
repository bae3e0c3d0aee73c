//! Per-Client Connection Loop
//!
//! Each accepted client runs one [`ConnectionHandler`] on its own task:
//!
//! ```text
//!   ┌──────────────────────────────────────┐
//!   │ read bytes into buffer               │◄──┐
//!   │ parse every complete request         │   │
//!   │   execute, queue reply               │   │ more data
//!   │ flush queued replies                 │───┘
//!   └──────────────────────────────────────┘
//!         │ EOF / I/O error / framing error
//!         ▼
//!      task ends
//! ```
//!
//! TCP is a stream: one read may hold half a request or several pipelined
//! ones, so bytes accumulate in a `BytesMut` until the parser can frame them.
//! A request that can never be framed gets an error reply and the connection
//! is closed, since the stream position can no longer be trusted.

use crate::commands::CommandHandler;
use crate::protocol::{ParseError, RespParser, RespValue};
use bytes::{Buf, BytesMut};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::{debug, error, info, trace, warn};

/// Upper bound on buffered, not yet framed input per client (64 MB)
pub const MAX_BUFFER_SIZE: usize = 64 * 1024 * 1024;

const INITIAL_BUFFER_SIZE: usize = 4096;

/// Server-wide connection counters.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    pub connections_accepted: AtomicU64,
    pub active_connections: AtomicU64,
    pub commands_processed: AtomicU64,
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

    fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }
}

/// Errors that end a client connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// The client sent bytes that can never form a request
    #[error("Parse error: {0}")]
    ParseError(#[from] ParseError),

    #[error("Client disconnected")]
    ClientDisconnected,

    /// The client closed the stream in the middle of a request
    #[error("Unexpected end of stream")]
    UnexpectedEof,

    #[error("Buffer size limit exceeded")]
    BufferFull,
}

/// Serves one client over any byte stream.
pub struct ConnectionHandler<S> {
    stream: BufWriter<S>,
    addr: SocketAddr,
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

    /// Serves requests until the client goes away or the connection fails.
    ///
    /// A normal disconnect is reported as [`ConnectionError::ClientDisconnected`].
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, "Client connected");

        let result = self.serve().await;

        match &result {
            Ok(()) | Err(ConnectionError::ClientDisconnected) => {
                info!(client = %self.addr, "Client disconnected")
            }
            Err(ConnectionError::IoError(e)) if e.kind() == std::io::ErrorKind::ConnectionReset => {
                debug!(client = %self.addr, "Connection reset by client")
            }
            Err(e) => warn!(client = %self.addr, error = %e, "Connection closed with error"),
        }

        self.stats.connection_closed();
        result
    }

    async fn serve(&mut self) -> Result<(), ConnectionError> {
        loop {
            let mut replied = false;

            loop {
                let request = match self.next_request() {
                    Ok(Some(request)) => request,
                    Ok(None) => break,
                    Err(e) => {
                        self.reject(&e).await?;
                        return Err(e.into());
                    }
                };

                let reply = self.command_handler.execute(request);
                ConnectionStats::add(&self.stats.commands_processed, 1);
                self.queue_reply(&reply).await?;
                replied = true;
            }

            // One flush per batch of pipelined requests
            if replied {
                self.stream.flush().await?;
            }

            self.read_more().await?;
        }
    }

    /// Frames the next complete request out of the buffer, if there is one.
    fn next_request(&mut self) -> Result<Option<RespValue>, ParseError> {
        match self.parser.parse(&self.buffer)? {
            Some((request, consumed)) => {
                self.buffer.advance(consumed);
                trace!(
                    client = %self.addr,
                    consumed = consumed,
                    remaining = self.buffer.len(),
                    "Parsed request"
                );
                Ok(Some(request))
            }
            None => Ok(None),
        }
    }

    /// Tells the client why its stream is being dropped.
    async fn reject(&mut self, e: &ParseError) -> Result<(), ConnectionError> {
        warn!(client = %self.addr, error = %e, "Protocol error, closing connection");
        ConnectionStats::add(&self.stats.protocol_errors, 1);

        let reply = RespValue::error(format!("ERR Protocol error: {}", e));
        self.queue_reply(&reply).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn read_more(&mut self) -> Result<(), ConnectionError> {
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
            return Err(if self.buffer.is_empty() {
                ConnectionError::ClientDisconnected
            } else {
                ConnectionError::UnexpectedEof
            });
        }

        ConnectionStats::add(&self.stats.bytes_read, n);
        trace!(client = %self.addr, bytes = n, "Read data");
        Ok(())
    }

    async fn queue_reply(&mut self, reply: &RespValue) -> Result<(), ConnectionError> {
        let bytes = reply.serialize();
        self.stream.write_all(&bytes).await?;
        ConnectionStats::add(&self.stats.bytes_written, bytes.len());
        Ok(())
    }
}

/// Runs a [`ConnectionHandler`] to completion, logging only unusual endings.
pub async fn handle_connection<S>(
    stream: S,
    addr: SocketAddr,
    command_handler: CommandHandler,
    stats: Arc<ConnectionStats>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let handler = ConnectionHandler::new(stream, addr, command_handler, stats);
    match handler.run().await {
        Ok(()) | Err(ConnectionError::ClientDisconnected) => {}
        Err(e) => debug!(client = %addr, error = %e, "Connection ended with error"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageEngine;
    use tokio::net::{TcpListener, TcpStream};
    use tokio_test::io::Builder;

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    fn mock_handler<S>(stream: S) -> (ConnectionHandler<S>, Arc<ConnectionStats>)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let stats = Arc::new(ConnectionStats::new());
        let commands = CommandHandler::new(Arc::new(StorageEngine::new()));
        (
            ConnectionHandler::new(stream, peer(), commands, Arc::clone(&stats)),
            stats,
        )
    }

    async fn create_test_server() -> (SocketAddr, Arc<StorageEngine>, Arc<ConnectionStats>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let storage = Arc::new(StorageEngine::new());
        let stats = Arc::new(ConnectionStats::new());

        let storage_clone = Arc::clone(&storage);
        let stats_clone = Arc::clone(&stats);

        tokio::spawn(async move {
            while let Ok((stream, client_addr)) = listener.accept().await {
                let handler = CommandHandler::new(Arc::clone(&storage_clone));
                let stats = Arc::clone(&stats_clone);
                tokio::spawn(handle_connection(stream, client_addr, handler, stats));
            }
        });

        (addr, storage, stats)
    }

    /// Reads until `expected` bytes arrived or two seconds passed.
    async fn read_exactly(client: &mut TcpStream, expected: usize) -> Vec<u8> {
        let mut buf = vec![0u8; expected];
        tokio::time::timeout(
            std::time::Duration::from_secs(2),
            client.read_exact(&mut buf),
        )
        .await
        .unwrap()
        .unwrap();
        buf
    }

    #[tokio::test]
    async fn test_mock_ping() {
        let stream = Builder::new()
            .read(b"*1\r\n$4\r\nPING\r\n")
            .write(b"+PONG\r\n")
            .build();
        let (handler, stats) = mock_handler(stream);

        assert!(matches!(
            handler.run().await,
            Err(ConnectionError::ClientDisconnected)
        ));
        assert_eq!(stats.commands_processed.load(Ordering::Relaxed), 1);
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_mock_request_split_across_reads() {
        let stream = Builder::new()
            .read(b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$")
            .read(b"1\r\nv\r\n*2\r\n$3\r\nGET\r\n$1\r\nk\r\n")
            .write(b"+OK\r\n$1\r\nv\r\n")
            .build();
        let (handler, _) = mock_handler(stream);

        assert!(matches!(
            handler.run().await,
            Err(ConnectionError::ClientDisconnected)
        ));
    }

    #[tokio::test]
    async fn test_mock_protocol_error_closes_connection() {
        let stream = Builder::new()
            .read(b"*x\r\n")
            .write(b"-ERR Protocol error: invalid integer: invalid digit found in string\r\n")
            .build();
        let (handler, stats) = mock_handler(stream);

        assert!(matches!(
            handler.run().await,
            Err(ConnectionError::ParseError(ParseError::InvalidInteger(_)))
        ));
        assert_eq!(stats.protocol_errors.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_mock_eof_mid_request() {
        let stream = Builder::new().read(b"*2\r\n$3\r\nGET\r\n").build();
        let (handler, _) = mock_handler(stream);

        assert!(matches!(
            handler.run().await,
            Err(ConnectionError::UnexpectedEof)
        ));
    }

    #[tokio::test]
    async fn test_mock_validation_error_keeps_connection() {
        let stream = Builder::new()
            .read(b"*1\r\n$3\r\nGET\r\n")
            .write(b"-ERR wrong number of arguments for 'GET' command\r\n")
            .read(b"*1\r\n$4\r\nPING\r\n")
            .write(b"+PONG\r\n")
            .build();
        let (handler, _) = mock_handler(stream);

        assert!(matches!(
            handler.run().await,
            Err(ConnectionError::ClientDisconnected)
        ));
    }

    #[tokio::test]
    async fn test_tcp_set_get() {
        let (addr, storage, _) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client
            .write_all(b"*3\r\n$3\r\nSET\r\n$4\r\nname\r\n$4\r\nAriz\r\n")
            .await
            .unwrap();
        assert_eq!(read_exactly(&mut client, 5).await, b"+OK\r\n");

        client
            .write_all(b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n")
            .await
            .unwrap();
        assert_eq!(read_exactly(&mut client, 10).await, b"$4\r\nAriz\r\n");

        assert_eq!(storage.get(b"name"), Some(bytes::Bytes::from("Ariz")));
    }

    #[tokio::test]
    async fn test_tcp_pipelining() {
        let (addr, _, _) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client
            .write_all(
                b"*4\r\n$5\r\nRPUSH\r\n$1\r\nq\r\n$1\r\na\r\n$1\r\nb\r\n\
                  *4\r\n$6\r\nLRANGE\r\n$1\r\nq\r\n$1\r\n0\r\n$2\r\n-1\r\n\
                  *2\r\n$4\r\nLPOP\r\n$1\r\nq\r\n",
            )
            .await
            .unwrap();

        // :2\r\n *2\r\n$1\r\na\r\n$1\r\nb\r\n $1\r\na\r\n
        let expected: &[u8] = b":2\r\n*2\r\n$1\r\na\r\n$1\r\nb\r\n$1\r\na\r\n";
        assert_eq!(read_exactly(&mut client, expected.len()).await, expected);
    }

    #[tokio::test]
    async fn test_tcp_connection_stats() {
        let (addr, _, stats) = create_test_server().await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
        assert_eq!(read_exactly(&mut client, 7).await, b"+PONG\r\n");

        assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 1);
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 1);
        assert!(stats.bytes_read.load(Ordering::Relaxed) > 0);
        assert!(stats.bytes_written.load(Ordering::Relaxed) > 0);

        drop(client);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
    }
}
