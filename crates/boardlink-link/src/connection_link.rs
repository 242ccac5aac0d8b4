//! Link over a byte connection and a protocol.
//!
//! # Data flow
//!
//! ```text
//!  application ──> Link::switch_digital_pin ──> Protocol::encode ──> Connection::write
//!
//!  Connection reader ──> RawByteListener::received ──> ByteStreamProcessor::feed
//!                                                        │
//!                             EventListener::on_event <──┘ (in arrival order)
//! ```
//!
//! Decoded messages are taken from the processor under its lock and
//! dispatched after the lock is released, so listeners may call back into the
//! link. A panicking listener is logged and skipped.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};

use boardlink_core::{Error, Pin, PinState, Result};
use boardlink_protocol::{
    ByteStreamProcessor, Command, FromDeviceMessage, KeyPress, MessageId, Protocol,
    ToDeviceMessage, Tone,
};

use crate::connection::{Connection, RawByteListener};
use crate::link::Link;
use crate::listener::{EventListener, ListenerSet};

/// Raw byte listener registered on the connection; holds the link weakly.
struct LinkInput {
    link: Weak<ConnectionBasedLink>,
}

impl RawByteListener for LinkInput {
    fn received(&self, bytes: &[u8]) {
        if let Some(link) = self.link.upgrade() {
            link.receive(bytes);
        }
    }

    fn sent(&self, bytes: &[u8]) {
        trace!(bytes = bytes.len(), "Wrote to device");
    }
}

/// A [`Link`] driving a board through a [`Connection`] with a [`Protocol`].
///
/// # Example
///
/// ```
/// use boardlink_link::{ConnectionBasedLink, Link, MockConnection};
/// use boardlink_protocol::LineProtocol;
/// use std::sync::Arc;
///
/// let (connection, handle) = MockConnection::new();
/// let link = ConnectionBasedLink::new(connection, Arc::new(LineProtocol::new()));
///
/// let id = link.switch_digital_pin(13, true).unwrap();
/// assert_eq!(handle.written_text(), vec![format!("alp://ppsw/13/1?id={id}\n")]);
/// ```
pub struct ConnectionBasedLink {
    connection: Arc<dyn Connection>,
    protocol: Arc<dyn Protocol>,
    input: Arc<dyn RawByteListener>,
    processor: Mutex<Box<dyn ByteStreamProcessor>>,
    listeners: ListenerSet<dyn EventListener>,
    /// Listeners and explicit start requests per pin. Held while the
    /// matching start or stop frame is written, so frames follow the count.
    pin_refs: Mutex<HashMap<Pin, usize>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl ConnectionBasedLink {
    /// Create the link and register it as a listener of `connection`.
    pub fn new(connection: Arc<dyn Connection>, protocol: Arc<dyn Protocol>) -> Arc<Self> {
        let link = Arc::new_cyclic(|weak: &Weak<Self>| {
            let input: Arc<dyn RawByteListener> = Arc::new(LinkInput { link: weak.clone() });
            Self {
                processor: Mutex::new(protocol.new_processor()),
                connection,
                protocol,
                input,
                listeners: ListenerSet::new(),
                pin_refs: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }
        });

        link.connection.add_listener(Arc::clone(&link.input));
        debug!(protocol = link.protocol.name(), "Link created");
        link
    }

    pub fn protocol(&self) -> &Arc<dyn Protocol> {
        &self.protocol
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Frames discarded by the decoder so far.
    pub fn discarded(&self) -> u64 {
        self.processor.lock().discarded()
    }

    /// Number of users currently listening to `pin`.
    pub fn listening_count(&self, pin: Pin) -> usize {
        self.pin_refs.lock().get(&pin).copied().unwrap_or(0)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::LinkClosed);
        }
        Ok(())
    }

    fn send(&self, command: Command) -> Result<MessageId> {
        self.ensure_open()?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let message = ToDeviceMessage::new(command).with_id(id);
        let bytes = self.protocol.encode(&message)?;

        trace!(id, command = message.command.name(), bytes = bytes.len(), "Sending message");
        self.connection.write(&bytes)?;
        Ok(id)
    }

    /// Count one more user of `pin`; the start frame is sent on the first one
    /// unless `always_send` is set.
    fn acquire_pin(&self, pin: Pin, always_send: bool) -> Result<Option<MessageId>> {
        let mut refs = self.pin_refs.lock();
        let count = refs.get(&pin).copied().unwrap_or(0);

        let id = if count == 0 || always_send {
            Some(self.send(Command::StartListening(pin))?)
        } else {
            None
        };

        refs.insert(pin, count + 1);
        Ok(id)
    }

    /// Drop one user of `pin`; the stop frame is sent when none is left.
    fn release_pin(&self, pin: Pin) -> Result<Option<MessageId>> {
        let mut refs = self.pin_refs.lock();
        match refs.get(&pin).copied() {
            Some(count) if count > 1 => {
                refs.insert(pin, count - 1);
                debug!(%pin, remaining = count - 1, "Stop listening suppressed");
                Ok(None)
            }
            Some(_) => {
                refs.remove(&pin);
                self.send(Command::StopListening(pin)).map(Some)
            }
            None => self.send(Command::StopListening(pin)).map(Some),
        }
    }

    fn receive(&self, bytes: &[u8]) {
        if self.is_closed() {
            return;
        }

        let messages: Vec<FromDeviceMessage> = {
            let mut processor = self.processor.lock();
            let before = processor.discarded();
            processor.feed(bytes);
            let dropped = processor.discarded() - before;
            if dropped > 0 {
                warn!(dropped, "Discarded undecodable input from device");
            }
            processor.drain_messages().collect()
        };

        for message in &messages {
            self.dispatch(message);
        }
    }

    fn dispatch(&self, message: &FromDeviceMessage) {
        trace!(event = message.name(), "Dispatching event");
        let pin = message.as_pin_state().map(PinState::pin);

        for listener in self.listeners.snapshot().iter() {
            if let Some(filter) = listener.pin_filter()
                && pin != Some(filter)
            {
                continue;
            }

            if catch_unwind(AssertUnwindSafe(|| listener.on_event(message))).is_err() {
                warn!(
                    event = message.name(),
                    "Listener panicked, continuing with remaining listeners"
                );
            }
        }
    }
}

impl Link for ConnectionBasedLink {
    fn switch_digital_pin(&self, pin: u8, value: bool) -> Result<MessageId> {
        self.send(Command::PinStateChange(PinState::digital(pin, value)))
    }

    fn switch_analog_pin(&self, pin: u8, value: u16) -> Result<MessageId> {
        self.send(Command::PinStateChange(PinState::analog(pin, value)))
    }

    fn start_listening(&self, pin: Pin) -> Result<MessageId> {
        self.ensure_open()?;
        self.acquire_pin(pin, true)?
            .ok_or(Error::LinkClosed)
    }

    fn stop_listening(&self, pin: Pin) -> Result<Option<MessageId>> {
        self.ensure_open()?;
        self.release_pin(pin)
    }

    fn send_custom_message(&self, parts: &[&str]) -> Result<MessageId> {
        self.send(Command::Custom(
            parts.iter().map(|part| part.to_string()).collect(),
        ))
    }

    fn send_tone(&self, tone: Tone) -> Result<MessageId> {
        self.send(Command::Tone(tone))
    }

    fn send_no_tone(&self, pin: u8) -> Result<MessageId> {
        self.send(Command::NoTone(pin))
    }

    fn send_key_press_event(&self, key: KeyPress) -> Result<MessageId> {
        self.send(Command::KeyPress(key))
    }

    fn add_listener(&self, listener: Arc<dyn EventListener>) -> Result<()> {
        self.ensure_open()?;
        if let Some(pin) = listener.pin_filter() {
            self.acquire_pin(pin, false)?;
        }
        self.listeners.add(listener);
        Ok(())
    }

    fn remove_listener(&self, listener: &Arc<dyn EventListener>) -> Result<()> {
        if !self.listeners.remove(listener) {
            return Ok(());
        }
        match listener.pin_filter() {
            Some(pin) if !self.is_closed() => self.release_pin(pin).map(|_| ()),
            _ => Ok(()),
        }
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        debug!(protocol = self.protocol.name(), "Closing link");
        self.connection.remove_listener(&self.input);
        self.listeners.clear();
        self.pin_refs.lock().clear();
        self.connection.close()
    }
}

impl Drop for ConnectionBasedLink {
    fn drop(&mut self) {
        if !self.is_closed()
            && let Err(e) = self.close()
        {
            warn!("Failed to close link on drop: {}", e);
        }
    }
}
