use std::sync::Arc;

use boardlink_core::{Pin, Result};
use boardlink_protocol::{KeyPress, MessageId, Tone};

use crate::listener::EventListener;

/// Handle for controlling and observing one board.
///
/// Every sending operation encodes one message, writes it to the device and
/// returns the id it was tagged with, which can be used to wait for the
/// device reply (see [`ResponseAwaiter`](crate::ResponseAwaiter)).
///
/// After [`Link::close`] every operation fails with
/// [`Error::LinkClosed`](boardlink_core::Error::LinkClosed); closing again is a no-op.
pub trait Link: Send + Sync {
    fn switch_digital_pin(&self, pin: u8, value: bool) -> Result<MessageId>;

    fn switch_analog_pin(&self, pin: u8, value: u16) -> Result<MessageId>;

    /// Ask the device to report state changes of `pin`.
    fn start_listening(&self, pin: Pin) -> Result<MessageId>;

    /// Ask the device to stop reporting `pin`.
    ///
    /// Returns `None` without sending anything while other users of the link
    /// still listen to the pin.
    fn stop_listening(&self, pin: Pin) -> Result<Option<MessageId>>;

    fn send_custom_message(&self, parts: &[&str]) -> Result<MessageId>;

    fn send_tone(&self, tone: Tone) -> Result<MessageId>;

    fn send_no_tone(&self, pin: u8) -> Result<MessageId>;

    fn send_key_press_event(&self, key: KeyPress) -> Result<MessageId>;

    /// Register a listener; a listener with a pin filter also starts listening on that pin.
    fn add_listener(&self, listener: Arc<dyn EventListener>) -> Result<()>;

    /// Unregister the listener added with the same `Arc`.
    fn remove_listener(&self, listener: &Arc<dyn EventListener>) -> Result<()>;

    fn close(&self) -> Result<()>;
}
