//! Simulated board running in-process.
//!
//! The virtual board understands line protocol commands: it acknowledges
//! every message carrying an id with a positive reply, reports the configured
//! pin state when listening starts, and reports pin switches on pins that are
//! being listened to. With other protocols it accepts writes and stays silent.
//!
//! ```text
//!  link ──write──> channel ──> "virtual-board" thread ──received──> link
//! ```

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use boardlink_core::constants::{DEFAULT_LINE_SEPARATOR, LINE_PROTOCOL_NAME, MAX_ANALOG_READ};
use boardlink_core::{Error, Pin, PinState, Result};
use boardlink_protocol::{
    Command, FromDeviceMessage, LineProtocol, Protocol, Protocols, Reply, ToDeviceMessage,
};
use futures::future::BoxFuture;

use crate::attribute::{AttributeDescriptor, AttributeTable, AttributeValue};
use crate::config::{LinkConfig, LinkFactory};
use crate::connection::{Connection, RawByteListener};
use crate::connection_link::ConnectionBasedLink;
use crate::link::Link;
use crate::listener::ListenerSet;

/// Configuration of the virtual board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualConfig {
    /// Protocol name in the global registry.
    pub proto: String,
    /// Acknowledge messages carrying an id.
    pub reply: bool,
    /// Value reported for analog pins that were never switched.
    pub analog_value: u16,
    /// Level reported for digital pins that were never switched.
    pub digital_state: bool,
}

impl VirtualConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn proto(mut self, proto: impl Into<String>) -> Self {
        self.proto = proto.into();
        self
    }

    pub fn reply(mut self, reply: bool) -> Self {
        self.reply = reply;
        self
    }

    /// Values above the 10-bit ADC range are clamped to 1023.
    pub fn analog_value(mut self, value: u16) -> Self {
        self.analog_value = value.min(MAX_ANALOG_READ);
        self
    }

    pub fn digital_state(mut self, state: bool) -> Self {
        self.digital_state = state;
        self
    }
}

impl Default for VirtualConfig {
    fn default() -> Self {
        Self {
            proto: LINE_PROTOCOL_NAME.to_string(),
            reply: true,
            analog_value: 0,
            digital_state: false,
        }
    }
}

fn protocol_choices(_: &VirtualConfig) -> Vec<String> {
    Protocols::global().names()
}

impl LinkConfig for VirtualConfig {
    fn attributes() -> AttributeTable<Self> {
        AttributeTable::new()
            .with(
                AttributeDescriptor::enumeration(
                    "proto",
                    |c: &VirtualConfig| Some(AttributeValue::Enum(c.proto.clone())),
                    |c: &mut VirtualConfig, v| {
                        c.proto = v.into_string();
                        Ok(())
                    },
                    protocol_choices,
                )
                .describe("Wire protocol"),
            )
            .with(
                AttributeDescriptor::bool(
                    "reply",
                    |c: &VirtualConfig| Some(AttributeValue::Bool(c.reply)),
                    |c: &mut VirtualConfig, v| {
                        c.reply = v.as_bool().unwrap_or(c.reply);
                        Ok(())
                    },
                )
                .describe("Acknowledge messages that carry an id"),
            )
            .with(
                AttributeDescriptor::int(
                    "analogvalue",
                    |c: &VirtualConfig| Some(AttributeValue::Int(i64::from(c.analog_value))),
                    |c: &mut VirtualConfig, v| {
                        let value: u16 = v.to_int("analogvalue")?;
                        if value > MAX_ANALOG_READ {
                            return Err(Error::invalid_value(
                                "analogvalue",
                                value.to_string(),
                                format!("0..={MAX_ANALOG_READ}"),
                            ));
                        }
                        c.analog_value = value;
                        Ok(())
                    },
                )
                .describe("Initial value of analog pins (0-1023)"),
            )
            .with(
                AttributeDescriptor::bool(
                    "digitalstate",
                    |c: &VirtualConfig| Some(AttributeValue::Bool(c.digital_state)),
                    |c: &mut VirtualConfig, v| {
                        c.digital_state = v.as_bool().unwrap_or(c.digital_state);
                        Ok(())
                    },
                )
                .describe("Initial level of digital pins"),
            )
    }
}

/// Factory of links to a [`VirtualConnection`].
#[derive(Debug, Clone, Copy, Default)]
pub struct VirtualLinkFactory;

impl LinkFactory for VirtualLinkFactory {
    type Config = VirtualConfig;

    fn name(&self) -> &str {
        "virtual"
    }

    fn new_link(&self, config: VirtualConfig) -> BoxFuture<'static, Result<Arc<dyn Link>>> {
        Box::pin(async move {
            let protocol = Protocols::global().get(&config.proto)?;
            let connection = VirtualConnection::spawn(Arc::clone(&protocol), &config)?;
            let link: Arc<dyn Link> = ConnectionBasedLink::new(connection, protocol);
            Ok(link)
        })
    }
}

/// Pin table and reply policy of the simulated board.
struct Board {
    protocol: Arc<dyn Protocol>,
    config: VirtualConfig,
    states: HashMap<Pin, PinState>,
    listening: HashSet<Pin>,
    pending: Vec<u8>,
}

impl Board {
    fn new(protocol: Arc<dyn Protocol>, config: VirtualConfig) -> Self {
        Self {
            protocol,
            config,
            states: HashMap::new(),
            listening: HashSet::new(),
            pending: Vec::new(),
        }
    }

    /// Consume bytes written by the link and return the bytes to send back.
    fn handle(&mut self, bytes: &[u8]) -> Vec<u8> {
        if self.protocol.name() != LINE_PROTOCOL_NAME {
            return Vec::new();
        }

        self.pending.extend_from_slice(bytes);
        let mut out = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == DEFAULT_LINE_SEPARATOR) {
            let frame: Vec<u8> = self.pending.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&frame[..pos]).into_owned();
            match LineProtocol::parse_to_device(&text) {
                Some(message) => {
                    for event in self.respond(message) {
                        match self.protocol.encode_from_device(&event) {
                            Ok(encoded) => out.extend(encoded),
                            Err(e) => trace!("Virtual board cannot encode {}: {}", event.name(), e),
                        }
                    }
                }
                None => trace!(frame = %text, "Virtual board ignoring frame"),
            }
        }
        out
    }

    fn respond(&mut self, message: ToDeviceMessage) -> Vec<FromDeviceMessage> {
        let mut events = Vec::new();
        match message.command {
            Command::StartListening(pin) => {
                self.listening.insert(pin);
                events.push(FromDeviceMessage::PinStateChanged(self.state(pin)));
            }
            Command::StopListening(pin) => {
                self.listening.remove(&pin);
            }
            Command::PinStateChange(state) => {
                self.states.insert(state.pin(), state);
                if self.listening.contains(&state.pin()) {
                    events.push(FromDeviceMessage::PinStateChanged(state));
                }
            }
            _ => {}
        }

        if let Some(id) = message.id
            && self.config.reply
        {
            events.push(FromDeviceMessage::Reply(Reply::new(id, true)));
        }
        events
    }

    fn state(&self, pin: Pin) -> PinState {
        self.states.get(&pin).copied().unwrap_or(match pin {
            Pin::Analog(n) => PinState::analog(n, self.config.analog_value),
            Pin::Digital(n) => PinState::digital(n, self.config.digital_state),
        })
    }
}

/// Connection to a board simulated on a dedicated thread.
pub struct VirtualConnection {
    sender: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    listeners: Arc<ListenerSet<dyn RawByteListener>>,
    closed: AtomicBool,
}

impl VirtualConnection {
    /// Start the board thread.
    pub fn spawn(protocol: Arc<dyn Protocol>, config: &VirtualConfig) -> Result<Arc<Self>> {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Vec<u8>>();
        let listeners: Arc<ListenerSet<dyn RawByteListener>> = Arc::new(ListenerSet::new());
        let mut board = Board::new(protocol, config.clone());

        let output = Arc::clone(&listeners);
        thread::Builder::new()
            .name("virtual-board".to_string())
            .spawn(move || {
                while let Some(bytes) = receiver.blocking_recv() {
                    let reply = board.handle(&bytes);
                    if reply.is_empty() {
                        continue;
                    }
                    for listener in output.snapshot().iter() {
                        listener.received(&reply);
                    }
                }
                debug!("Virtual board stopped");
            })?;

        Ok(Arc::new(Self {
            sender: Mutex::new(Some(sender)),
            listeners,
            closed: AtomicBool::new(false),
        }))
    }
}

impl Connection for VirtualConnection {
    fn write(&self, bytes: &[u8]) -> Result<()> {
        let sender = self.sender.lock();
        let sender = sender
            .as_ref()
            .ok_or_else(|| Error::disconnected("virtual"))?;
        sender
            .send(bytes.to_vec())
            .map_err(|_| Error::disconnected("virtual"))?;

        for listener in self.listeners.snapshot().iter() {
            listener.sent(bytes);
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.sender.lock().take();
            debug!("Virtual connection closed");
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

#[cfg(test)]
mod tests {
    use super::*;

    fn board(config: VirtualConfig) -> Board {
        Board::new(Arc::new(LineProtocol::new()), config)
    }

    #[test]
    fn test_acknowledges_messages_with_id() {
        let mut board = board(VirtualConfig::new());
        let out = board.handle(b"alp://ppsw/13/1?id=7\n");
        assert_eq!(out, b"alp://rply/ok?id=7\n");
    }

    #[test]
    fn test_silent_without_reply() {
        let mut board = board(VirtualConfig::new().reply(false));
        assert!(board.handle(b"alp://ppsw/13/1?id=7\n").is_empty());
    }

    #[test]
    fn test_start_listening_reports_initial_state() {
        let mut board = board(VirtualConfig::new().reply(false).analog_value(300));
        let out = board.handle(b"alp://srla/2?id=1\n");
        assert_eq!(out, b"alp://ared/2/300\n");
    }

    #[test]
    fn test_switch_reported_while_listening() {
        let mut board = board(VirtualConfig::new().reply(false));
        board.handle(b"alp://srld/4\n");

        let out = board.handle(b"alp://ppsw/4/1\nalp://ppsw/5/1\n");
        assert_eq!(out, b"alp://dred/4/1\n");
    }

    #[test]
    fn test_frames_split_across_writes() {
        let mut board = board(VirtualConfig::new());
        assert!(board.handle(b"alp://notn/3?i").is_empty());
        assert_eq!(board.handle(b"d=2\n"), b"alp://rply/ok?id=2\n");
    }

    #[test]
    fn test_attribute_table() {
        let table = VirtualConfig::attributes();
        assert_eq!(
            table.names(),
            vec!["proto", "reply", "analogvalue", "digitalstate"]
        );

        let mut config = VirtualConfig::default();
        assert!(table.set_from_str(&mut config, "virtual", "proto", "morse").is_err());
        table
            .set_from_str(&mut config, "virtual", "proto", "firmata")
            .unwrap();
        assert_eq!(config.proto, "firmata");
    }

    #[test]
    fn test_analog_value_limited_to_adc_range() {
        let table = VirtualConfig::attributes();
        let mut config = VirtualConfig::default();

        table
            .set_from_str(&mut config, "virtual", "analogvalue", "1023")
            .unwrap();
        assert_eq!(config.analog_value, 1023);

        let err = table
            .set_from_str(&mut config, "virtual", "analogvalue", "2000")
            .unwrap_err();
        assert!(matches!(err, Error::InvalidAttributeValue { .. }));
        assert_eq!(config.analog_value, 1023);
        assert_eq!(VirtualConfig::new().analog_value(5000).analog_value, 1023);
    }
}
