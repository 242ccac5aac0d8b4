//! Serial connection to a directly attached board.
//!
//! A dedicated reader thread blocks on the port with a short read timeout and
//! hands incoming bytes to the listeners; writes go straight to the port
//! under a lock. Most boards reset when the port opens, so the factory waits
//! `waitsecs` before handing the link out.

use futures::future::BoxFuture;
use parking_lot::Mutex;
use serialport::SerialPort;
use std::io::{ErrorKind, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

use boardlink_core::constants::{
    DEFAULT_BAUDRATE, DEFAULT_SERIAL_WAIT_SECS, LINE_PROTOCOL_NAME, SERIAL_READ_TIMEOUT_MS,
};
use boardlink_core::{Error, Result};
use boardlink_link::{
    AttributeDescriptor, AttributeTable, AttributeValue, Connection, ConnectionBasedLink,
    ConnectionGuard, Link, LinkConfig, LinkFactory, ListenerSet, RawByteListener,
};
use boardlink_protocol::Protocols;

const READ_BUFFER_SIZE: usize = 256;

/// Configuration of a serial link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    /// Port name such as `/dev/ttyACM0` or `COM3`; required.
    pub port: Option<String>,
    pub baudrate: u32,
    /// Protocol name in the global registry.
    pub proto: String,
    /// Seconds to wait after opening the port.
    pub wait_secs: u64,
}

impl SerialConfig {
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: Some(port.into()),
            ..Self::default()
        }
    }

    pub fn baudrate(mut self, baudrate: u32) -> Self {
        self.baudrate = baudrate;
        self
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: None,
            baudrate: DEFAULT_BAUDRATE,
            proto: LINE_PROTOCOL_NAME.to_string(),
            wait_secs: DEFAULT_SERIAL_WAIT_SECS,
        }
    }
}

/// Names of the serial ports present right now.
pub fn available_ports() -> Vec<String> {
    match serialport::available_ports() {
        Ok(ports) => ports.into_iter().map(|p| p.port_name).collect(),
        Err(e) => {
            debug!("Cannot enumerate serial ports: {}", e);
            Vec::new()
        }
    }
}

impl LinkConfig for SerialConfig {
    fn attributes() -> AttributeTable<Self> {
        AttributeTable::new()
            .with(
                AttributeDescriptor::string(
                    "port",
                    |c: &SerialConfig| c.port.clone().map(AttributeValue::String),
                    |c: &mut SerialConfig, v| {
                        c.port = Some(v.into_string());
                        Ok(())
                    },
                )
                .describe("Serial port name")
                .required()
                .with_choices(|_: &SerialConfig| available_ports()),
            )
            .with(
                AttributeDescriptor::int(
                    "baudrate",
                    |c: &SerialConfig| Some(AttributeValue::Int(i64::from(c.baudrate))),
                    |c: &mut SerialConfig, v| {
                        c.baudrate = v.to_int("baudrate")?;
                        Ok(())
                    },
                )
                .describe("Baud rate"),
            )
            .with(
                AttributeDescriptor::enumeration(
                    "proto",
                    |c: &SerialConfig| Some(AttributeValue::Enum(c.proto.clone())),
                    |c: &mut SerialConfig, v| {
                        c.proto = v.into_string();
                        Ok(())
                    },
                    |_: &SerialConfig| Protocols::global().names(),
                )
                .describe("Wire protocol"),
            )
            .with(
                AttributeDescriptor::int(
                    "waitsecs",
                    |c: &SerialConfig| {
                        Some(AttributeValue::Int(
                            i64::try_from(c.wait_secs).unwrap_or(i64::MAX),
                        ))
                    },
                    |c: &mut SerialConfig, v| {
                        c.wait_secs = v.to_int("waitsecs")?;
                        Ok(())
                    },
                )
                .describe("Seconds to wait for the board to reset after opening"),
            )
    }
}

fn serial_error(port: &str, reason: impl ToString) -> Error {
    Error::Serial {
        port: port.to_string(),
        reason: reason.to_string(),
    }
}

/// Byte connection over a serial port.
pub struct SerialConnection {
    port_name: String,
    port: Mutex<Box<dyn SerialPort>>,
    listeners: Arc<ListenerSet<dyn RawByteListener>>,
    closed: Arc<AtomicBool>,
}

impl SerialConnection {
    /// Open `port_name` and start the reader thread. Blocking.
    pub fn open(port_name: &str, baudrate: u32) -> Result<Arc<Self>> {
        info!("Opening serial port {} at {} baud", port_name, baudrate);

        let port = serialport::new(port_name, baudrate)
            .timeout(Duration::from_millis(SERIAL_READ_TIMEOUT_MS))
            .open()
            .map_err(|e| serial_error(port_name, e))?;
        let reader = port.try_clone().map_err(|e| serial_error(port_name, e))?;

        let listeners: Arc<ListenerSet<dyn RawByteListener>> = Arc::new(ListenerSet::new());
        let closed = Arc::new(AtomicBool::new(false));

        let name = port_name.to_string();
        let output = Arc::clone(&listeners);
        let stop = Arc::clone(&closed);
        thread::Builder::new()
            .name(format!("serial-reader-{port_name}"))
            .spawn(move || read_loop(name, reader, output, stop))?;

        Ok(Arc::new(Self {
            port_name: port_name.to_string(),
            port: Mutex::new(port),
            listeners,
            closed,
        }))
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

/// Runs until the connection closes or the port fails; checks the closed
/// flag at least once per read timeout.
fn read_loop(
    port_name: String,
    mut reader: Box<dyn SerialPort>,
    listeners: Arc<ListenerSet<dyn RawByteListener>>,
    closed: Arc<AtomicBool>,
) {
    let mut buffer = [0u8; READ_BUFFER_SIZE];
    while !closed.load(Ordering::Acquire) {
        match reader.read(&mut buffer) {
            Ok(0) => continue,
            Ok(n) => {
                trace!(bytes = n, "Received from {}", port_name);
                for listener in listeners.snapshot().iter() {
                    listener.received(&buffer[..n]);
                }
            }
            Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::Interrupted => {
                continue;
            }
            Err(e) => {
                error!("Read from {} failed: {}", port_name, e);
                closed.store(true, Ordering::Release);
                break;
            }
        }
    }
    debug!("Serial reader for {} stopped", port_name);
}

impl Connection for SerialConnection {
    fn write(&self, bytes: &[u8]) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::disconnected(&self.port_name));
        }

        {
            let mut port = self.port.lock();
            port.write_all(bytes)?;
            port.flush()?;
        }

        for listener in self.listeners.snapshot().iter() {
            listener.sent(bytes);
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!("Closed serial port {}", self.port_name);
        }
        Ok(())
    }

    fn add_listener(&self, listener: Arc<dyn RawByteListener>) {
        self.listeners.add(listener);
    }

    fn remove_listener(&self, listener: &Arc<dyn RawByteListener>) {
        self.listeners.remove(listener);
    }
}

impl Drop for SerialConnection {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Factory of links over [`SerialConnection`]s, registered as `serial`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialLinkFactory;

impl LinkFactory for SerialLinkFactory {
    type Config = SerialConfig;

    fn name(&self) -> &str {
        "serial"
    }

    fn is_serial(&self) -> bool {
        true
    }

    fn new_link(&self, config: SerialConfig) -> BoxFuture<'static, Result<Arc<dyn Link>>> {
        Box::pin(async move {
            let protocol = Protocols::global().get(&config.proto)?;
            let port = config.port.ok_or_else(|| Error::MissingAttribute {
                factory: "serial".to_string(),
                name: "port".to_string(),
            })?;

            let baudrate = config.baudrate;
            let name = port.clone();
            let connection = tokio::task::spawn_blocking(move || SerialConnection::open(&name, baudrate))
                .await
                .map_err(|e| serial_error(&port, e))??;

            let guard = ConnectionGuard::new(connection);
            if config.wait_secs > 0 {
                debug!("Waiting {}s for the board on {} to reset", config.wait_secs, port);
                tokio::time::sleep(Duration::from_secs(config.wait_secs)).await;
            }

            let link: Arc<dyn Link> = ConnectionBasedLink::new(guard.disarm(), protocol);
            Ok(link)
        })
    }
}
