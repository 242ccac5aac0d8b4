//! TCP connection to a networked board or a serial-to-network bridge.
//!
//! # Architecture
//!
//! ```text
//! Link::write ──> unbounded channel ──> writer task ──> FramedWrite<OwnedWriteHalf, BytesCodec>
//!
//! FramedRead<OwnedReadHalf, BytesCodec> ──> reader task ──> RawByteListener::received
//! ```
//!
//! Writes never block the caller; they are queued and flushed in order by
//! the writer task. Closing the connection drops the queue, which lets the
//! writer flush and shut the socket down, and aborts the reader.
//!
//! # Example
//!
//! ```no_run
//! use boardlink_link::{Link, LinkManager, Links};
//! use boardlink_transport::TcpLinkFactory;
//! use std::sync::Arc;
//!
//! # async fn example() -> boardlink_core::Result<()> {
//! let manager = LinkManager::builder().register(TcpLinkFactory).build();
//! let links = Links::new(Arc::new(manager));
//!
//! let link = links.get_link("boardlink://tcp?host=192.168.0.10&port=4478").await?;
//! link.switch_digital_pin(13, true)?;
//! link.close()?;
//! # Ok(())
//! # }
//! ```

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{BytesCodec, FramedRead, FramedWrite};
use tracing::{debug, error, info, trace, warn};

use boardlink_core::constants::{DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_TCP_PORT, LINE_PROTOCOL_NAME};
use boardlink_core::{Error, Result};
use boardlink_link::{
    AttributeDescriptor, AttributeTable, AttributeValue, Connection, ConnectionBasedLink, Link,
    LinkConfig, LinkFactory, ListenerSet, RawByteListener,
};
use boardlink_protocol::Protocols;

/// Configuration of a TCP link.
///
/// # Example
///
/// ```
/// use boardlink_transport::TcpConfig;
///
/// let config = TcpConfig::new("192.168.0.10").port(5000);
/// assert_eq!(config.target().as_deref(), Some("192.168.0.10:5000"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpConfig {
    /// Host name or address; required.
    pub host: Option<String>,
    pub port: u16,
    /// Protocol name in the global registry.
    pub proto: String,
    pub connect_timeout_ms: u64,
}

impl TcpConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: Some(host.into()),
            ..Self::default()
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn proto(mut self, proto: impl Into<String>) -> Self {
        self.proto = proto.into();
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// `host:port`, once a host is set.
    pub fn target(&self) -> Option<String> {
        self.host.as_ref().map(|host| format!("{host}:{}", self.port))
    }
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: DEFAULT_TCP_PORT,
            proto: LINE_PROTOCOL_NAME.to_string(),
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
        }
    }
}

impl LinkConfig for TcpConfig {
    fn attributes() -> AttributeTable<Self> {
        AttributeTable::new()
            .with(
                AttributeDescriptor::string(
                    "host",
                    |c: &TcpConfig| c.host.clone().map(AttributeValue::String),
                    |c: &mut TcpConfig, v| {
                        c.host = Some(v.into_string());
                        Ok(())
                    },
                )
                .describe("Host name or IP address of the board")
                .required(),
            )
            .with(
                AttributeDescriptor::int(
                    "port",
                    |c: &TcpConfig| Some(AttributeValue::Int(i64::from(c.port))),
                    |c: &mut TcpConfig, v| {
                        c.port = v.to_int("port")?;
                        Ok(())
                    },
                )
                .describe("TCP port"),
            )
            .with(
                AttributeDescriptor::enumeration(
                    "proto",
                    |c: &TcpConfig| Some(AttributeValue::Enum(c.proto.clone())),
                    |c: &mut TcpConfig, v| {
                        c.proto = v.into_string();
                        Ok(())
                    },
                    |_: &TcpConfig| Protocols::global().names(),
                )
                .describe("Wire protocol"),
            )
            .with(
                AttributeDescriptor::int(
                    "connecttimeout",
                    |c: &TcpConfig| {
                        Some(AttributeValue::Int(
                            i64::try_from(c.connect_timeout_ms).unwrap_or(i64::MAX),
                        ))
                    },
                    |c: &mut TcpConfig, v| {
                        c.connect_timeout_ms = v.to_int("connecttimeout")?;
                        Ok(())
                    },
                )
                .describe("Connect timeout in milliseconds"),
            )
    }
}

/// Byte connection over a TCP stream.
pub struct TcpConnection {
    target: String,
    writer: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    listeners: Arc<ListenerSet<dyn RawByteListener>>,
    closed: Arc<AtomicBool>,
}

impl TcpConnection {
    /// Connect to `target` (`host:port`) and start the reader and writer tasks.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn connect(target: &str, timeout: Duration) -> Result<Arc<Self>> {
        info!("Connecting to board at {}", target);

        let stream = match tokio::time::timeout(timeout, TcpStream::connect(target)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                error!("Connection to {} failed: {}", target, e);
                return Err(Error::connection_failed(target, e));
            }
            Err(_) => {
                warn!("Connection timeout after {}ms", timeout.as_millis());
                return Err(Error::ConnectTimeout {
                    target: target.to_string(),
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                });
            }
        };

        // Frames are small and latency bound.
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY on {}: {}", target, e);
        }

        let (read_half, write_half) = stream.into_split();
        let listeners: Arc<ListenerSet<dyn RawByteListener>> = Arc::new(ListenerSet::new());
        let closed = Arc::new(AtomicBool::new(false));
        let (sender, receiver) = mpsc::unbounded_channel();

        tokio::spawn(write_loop(target.to_string(), write_half, receiver));
        let reader = tokio::spawn(read_loop(
            target.to_string(),
            read_half,
            Arc::clone(&listeners),
            Arc::clone(&closed),
        ));

        info!("Connected to {}", target);
        Ok(Arc::new(Self {
            target: target.to_string(),
            writer: Mutex::new(Some(sender)),
            reader: Mutex::new(Some(reader)),
            listeners,
            closed,
        }))
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// `false` once closed locally or by the peer.
    pub fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }
}

async fn read_loop(
    target: String,
    read_half: OwnedReadHalf,
    listeners: Arc<ListenerSet<dyn RawByteListener>>,
    closed: Arc<AtomicBool>,
) {
    let mut frames = FramedRead::new(read_half, BytesCodec::new());
    while let Some(frame) = frames.next().await {
        match frame {
            Ok(bytes) => {
                trace!(bytes = bytes.len(), "Received from {}", target);
                for listener in listeners.snapshot().iter() {
                    listener.received(&bytes);
                }
            }
            Err(e) => {
                error!("Read from {} failed: {}", target, e);
                break;
            }
        }
    }

    if !closed.swap(true, Ordering::AcqRel) {
        warn!("Connection closed by {}", target);
    }
}

async fn write_loop(
    target: String,
    write_half: OwnedWriteHalf,
    mut receiver: mpsc::UnboundedReceiver<Bytes>,
) {
    let mut sink = FramedWrite::new(write_half, BytesCodec::new());
    while let Some(bytes) = receiver.recv().await {
        if let Err(e) = sink.send(bytes).await {
            error!("Write to {} failed: {}", target, e);
            return;
        }
    }

    if let Err(e) = SinkExt::<Bytes>::close(&mut sink).await {
        debug!("Shutdown of {} failed: {}", target, e);
    }
    debug!("Writer for {} stopped", target);
}

impl Connection for TcpConnection {
    fn write(&self, bytes: &[u8]) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::disconnected(&self.target));
        }

        let writer = self.writer.lock();
        let sender = writer
            .as_ref()
            .ok_or_else(|| Error::disconnected(&self.target))?;
        sender
            .send(Bytes::copy_from_slice(bytes))
            .map_err(|_| Error::disconnected(&self.target))?;
        drop(writer);

        for listener in self.listeners.snapshot().iter() {
            listener.sent(bytes);
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        let writer = self.writer.lock().take();
        let reader = self.reader.lock().take();
        if writer.is_none() && reader.is_none() {
            return Ok(());
        }

        drop(writer);
        if let Some(reader) = reader {
            reader.abort();
        }
        info!("Closed connection to {}", self.target);
        Ok(())
    }

    fn add_listener(&self, listener: Arc<dyn RawByteListener>) {
        self.listeners.add(listener);
    }

    fn remove_listener(&self, listener: &Arc<dyn RawByteListener>) {
        self.listeners.remove(listener);
    }
}

impl Drop for TcpConnection {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.get_mut().take() {
            reader.abort();
        }
    }
}

/// Factory of links over [`TcpConnection`]s, registered as `tcp`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpLinkFactory;

impl LinkFactory for TcpLinkFactory {
    type Config = TcpConfig;

    fn name(&self) -> &str {
        "tcp"
    }

    fn new_link(&self, config: TcpConfig) -> BoxFuture<'static, Result<Arc<dyn Link>>> {
        Box::pin(async move {
            let protocol = Protocols::global().get(&config.proto)?;
            let target = config.target().ok_or_else(|| Error::MissingAttribute {
                factory: "tcp".to_string(),
                name: "host".to_string(),
            })?;

            let timeout = Duration::from_millis(config.connect_timeout_ms);
            let connection = TcpConnection::connect(&target, timeout).await?;
            let link: Arc<dyn Link> = ConnectionBasedLink::new(connection, protocol);
            Ok(link)
        })
    }
}
