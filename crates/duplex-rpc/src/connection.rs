//! Transport contract and stream-backed connections.
//!
//! The runtime never opens sockets or pipes itself. It talks to a
//! [`Connection`], which knows how to (re)connect, report its health, and move
//! raw bytes. [`StreamConnection`] implements the contract over any
//! `AsyncRead`/`AsyncWrite` pair produced by a [`Connector`].
//!
//! # Thread Safety
//!
//! Reads and writes take `&self` and use separate tokio mutexes, so the listen
//! loop can block in `read` while other tasks write. `close` and `connect`
//! interrupt any blocked read or write through a watch channel so a reconnect
//! never waits behind the old stream.

use crate::error::{Result, RpcError};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex as StdMutex, PoisonError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::sync::{watch, Mutex};
use tracing::debug;

/// Read half of a connected stream.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
/// Write half of a connected stream.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Opaque duplex transport consumed by the codec and the communicator.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// Establish (or re-establish) the underlying stream.
    async fn connect(&self) -> Result<()>;

    /// Tear down the underlying stream. Blocked reads and writes fail.
    async fn close(&self) -> Result<()>;

    /// Whether the stream is currently usable.
    fn is_connected(&self) -> bool;

    /// Whether reconnecting can ever succeed for this transport.
    fn is_recoverable(&self) -> bool;

    /// Read some bytes. `Ok(0)` means the peer closed the stream.
    async fn read(&self, buf: &mut [u8]) -> std::io::Result<usize>;

    /// Write all of `buf` and flush.
    async fn write(&self, buf: &[u8]) -> std::io::Result<()>;
}

/// A factory producing a fresh stream on every call.
///
/// Called on the initial connect and after each disconnect.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a new stream.
    async fn connect(&self) -> Result<(BoxedReader, BoxedWriter)>;

    /// Whether calling `connect` again after a failure is meaningful.
    fn is_recoverable(&self) -> bool {
        true
    }
}

/// [`Connection`] over the streams produced by a [`Connector`].
pub struct StreamConnection<C> {
    connector: C,
    reader: Mutex<Option<BoxedReader>>,
    writer: Mutex<Option<BoxedWriter>>,
    connected: AtomicBool,
    interrupt: watch::Sender<u64>,
}

impl<C: Connector> StreamConnection<C> {
    /// Create a disconnected connection; call `connect` to open it.
    pub fn new(connector: C) -> Self {
        let (interrupt, _) = watch::channel(0);
        Self {
            connector,
            reader: Mutex::new(None),
            writer: Mutex::new(None),
            connected: AtomicBool::new(false),
            interrupt,
        }
    }

    /// Access the connector.
    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Mark disconnected and wake any task blocked on the old stream.
    ///
    /// The flag must be cleared before the bump: a task that subscribes after
    /// the bump is then guaranteed to see `connected == false`.
    fn interrupt(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.interrupt.send_modify(|generation| *generation = generation.wrapping_add(1));
    }
}

fn not_connected() -> std::io::Error {
    std::io::Error::new(ErrorKind::NotConnected, "connection is not established")
}

fn interrupted() -> std::io::Error {
    std::io::Error::new(ErrorKind::ConnectionAborted, "connection was closed locally")
}

#[async_trait]
impl<C: Connector> Connection for StreamConnection<C> {
    async fn connect(&self) -> Result<()> {
        let (reader, writer) = self.connector.connect().await?;

        self.interrupt();
        *self.reader.lock().await = Some(reader);
        *self.writer.lock().await = Some(writer);
        self.connected.store(true, Ordering::SeqCst);

        debug!("Stream connection established");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.interrupt();

        let writer = self.writer.lock().await.take();
        self.reader.lock().await.take();

        if let Some(mut writer) = writer {
            // The peer may already be gone.
            let _ = writer.shutdown().await;
        }
        debug!("Stream connection closed");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn is_recoverable(&self) -> bool {
        self.connector.is_recoverable()
    }

    async fn read(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut closed = self.interrupt.subscribe();
        let mut guard = self.reader.lock().await;
        if !self.is_connected() {
            return Err(not_connected());
        }
        let Some(reader) = guard.as_mut() else {
            return Err(not_connected());
        };

        tokio::select! {
            result = reader.read(buf) => {
                if matches!(result, Ok(0) | Err(_)) {
                    self.connected.store(false, Ordering::SeqCst);
                }
                result
            }
            _ = closed.changed() => Err(interrupted()),
        }
    }

    async fn write(&self, buf: &[u8]) -> std::io::Result<()> {
        let mut closed = self.interrupt.subscribe();
        let mut guard = self.writer.lock().await;
        if !self.is_connected() {
            return Err(not_connected());
        }
        let Some(writer) = guard.as_mut() else {
            return Err(not_connected());
        };

        let write = async {
            writer.write_all(buf).await?;
            writer.flush().await
        };

        tokio::select! {
            result = write => {
                if result.is_err() {
                    self.connected.store(false, Ordering::SeqCst);
                }
                result
            }
            _ = closed.changed() => Err(interrupted()),
        }
    }
}

/// Connects to a TCP address, reconnecting on demand.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: String,
}

impl TcpConnector {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> Result<(BoxedReader, BoxedWriter)> {
        let stream = TcpStream::connect(&self.addr)
            .await
            .map_err(RpcError::connect_failed)?;
        stream.set_nodelay(true)?;

        debug!("TCP connected to {}", self.addr);
        let (reader, writer) = stream.into_split();
        Ok((Box::new(reader), Box::new(writer)))
    }
}

/// Spawns a child process and talks to it over its stdin/stdout.
///
/// Each connect respawns the child; the previous one is killed.
pub struct ProcessConnector {
    program: String,
    args: Vec<String>,
    child: StdMutex<Option<Child>>,
}

impl ProcessConnector {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            child: StdMutex::new(None),
        }
    }

    /// PID of the currently running child, if any.
    pub fn child_id(&self) -> Option<u32> {
        self.child
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(Child::id)
    }
}

#[async_trait]
impl Connector for ProcessConnector {
    async fn connect(&self) -> Result<(BoxedReader, BoxedWriter)> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(RpcError::connect_failed)?;

        let missing_pipe = || RpcError::Connect {
            message: format!("{} was spawned without piped stdio", self.program),
            recoverable: false,
        };
        let stdin = child.stdin.take().ok_or_else(missing_pipe)?;
        let stdout = child.stdout.take().ok_or_else(missing_pipe)?;

        debug!("Spawned {} (PID {:?})", self.program, child.id());

        // Dropping the previous child kills it.
        let previous = self
            .child
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(child);
        drop(previous);

        Ok((Box::new(stdout), Box::new(stdin)))
    }
}

/// Hands out one pre-established stream pair, exactly once.
///
/// Used for pipes the host already opened, such as the process's own stdio.
/// Once the pair is consumed the transport cannot be recovered.
pub struct StaticConnector {
    streams: StdMutex<Option<(BoxedReader, BoxedWriter)>>,
}

impl StaticConnector {
    pub fn new(
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            streams: StdMutex::new(Some((Box::new(reader), Box::new(writer)))),
        }
    }

    /// Connector over this process's stdin and stdout.
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }
}

#[async_trait]
impl Connector for StaticConnector {
    async fn connect(&self) -> Result<(BoxedReader, BoxedWriter)> {
        self.streams
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| RpcError::Connect {
                message: "static stream was already consumed".to_string(),
                recoverable: false,
            })
    }

    fn is_recoverable(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn duplex_connection() -> (StreamConnection<StaticConnector>, tokio::io::DuplexStream) {
        let (local, remote) = tokio::io::duplex(1024);
        let (reader, writer) = tokio::io::split(local);
        (StreamConnection::new(StaticConnector::new(reader, writer)), remote)
    }

    #[tokio::test]
    async fn test_read_write_after_connect() {
        let (conn, mut remote) = duplex_connection();
        assert!(!conn.is_connected());
        conn.connect().await.unwrap();
        assert!(conn.is_connected());

        conn.write(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        remote.write_all(b"pong").await.unwrap();
        let n = conn.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"pong");
    }

    #[tokio::test]
    async fn test_read_before_connect_fails() {
        let (conn, _remote) = duplex_connection();
        let mut buf = [0u8; 4];
        let err = conn.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotConnected);
    }

    #[tokio::test]
    async fn test_peer_eof_marks_disconnected() {
        let (conn, remote) = duplex_connection();
        conn.connect().await.unwrap();
        drop(remote);

        let mut buf = [0u8; 4];
        assert_eq!(conn.read(&mut buf).await.unwrap(), 0);
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn test_close_interrupts_blocked_read() {
        let (conn, _remote) = duplex_connection();
        let conn = Arc::new(conn);
        conn.connect().await.unwrap();

        let reader = {
            let conn = conn.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 4];
                conn.read(&mut buf).await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        conn.close().await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), reader)
            .await
            .expect("read should be interrupted")
            .unwrap();
        assert!(result.is_err());
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn test_static_connector_is_single_use() {
        let (conn, _remote) = duplex_connection();
        assert!(!conn.is_recoverable());
        conn.connect().await.unwrap();

        let err = conn.connect().await.unwrap_err();
        assert!(!err.is_recoverable());
    }

    #[tokio::test]
    async fn test_tcp_connector_refused_is_recoverable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let conn = StreamConnection::new(TcpConnector::new(addr.to_string()));
        let err = conn.connect().await.unwrap_err();
        assert!(matches!(err, RpcError::Connect { .. }));
        assert!(conn.is_recoverable());
    }

    #[tokio::test]
    async fn test_process_connector_missing_program_is_unrecoverable() {
        let connector = ProcessConnector::new("/nonexistent/duplex-peer-binary", Vec::new());
        let err = connector.connect().await.err().unwrap();
        assert!(!err.is_recoverable());
        assert!(connector.child_id().is_none());
    }
}
