//! Incremental decoding of device byte streams.
//!
//! Every protocol hands out a fresh [`ByteStreamProcessor`] per connection.
//! The processor accumulates bytes as they arrive from the transport and
//! queues a [`FromDeviceMessage`] whenever a complete message is recognized.
//!
//! # State Machine
//!
//! ```text
//! ┌──────┐  first byte   ┌──────────────┐  complete    ┌──────┐
//! │ Idle │──────────────>│ Accumulating │─────────────>│ Idle │
//! └──────┘               └──────────────┘              └──────┘
//!                               │ overflow / malformed     ^
//!                               v                          │ delimiter
//!                        ┌──────────────┐                  │
//!                        │    Resync    │──────────────────┘
//!                        └──────────────┘
//! ```
//!
//! Processors never fail: malformed input is discarded and counted, and decoding
//! resumes at the next frame boundary. Output is independent of how the input
//! is chunked, so a message delivered one byte at a time decodes exactly like
//! the same message delivered in a single call.
//!
//! # Usage
//!
//! ```
//! use boardlink_protocol::{ByteStreamProcessor, LineProcessor};
//!
//! let mut processor = LineProcessor::new(b'\n');
//! processor.feed(b"alp://dred/");
//! processor.feed(b"13/1\n");
//!
//! let messages: Vec<_> = processor.drain_messages().collect();
//! assert_eq!(messages.len(), 1);
//! ```

use crate::message::FromDeviceMessage;

/// States shared by all decoders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    /// No partial message is buffered.
    Idle,

    /// A message has started and more bytes are needed.
    Accumulating,

    /// Input is being skipped until the next frame boundary.
    Resync,
}

/// Per-connection accumulating decoder.
pub trait ByteStreamProcessor: Send {
    /// Consume bytes received from the device.
    fn feed(&mut self, bytes: &[u8]);

    /// Pop the oldest decoded message.
    fn next_message(&mut self) -> Option<FromDeviceMessage>;

    /// Number of decoded messages waiting to be taken.
    fn messages_available(&self) -> usize;

    fn state(&self) -> ProcessorState;

    /// Number of frames or bytes discarded as undecodable since creation.
    fn discarded(&self) -> u64;

    /// Drop buffered input and queued messages and return to [`ProcessorState::Idle`].
    fn clear(&mut self);

    /// Iterate over the queued messages, removing them.
    fn drain_messages(&mut self) -> DrainMessages<'_, Self>
    where
        Self: Sized,
    {
        DrainMessages { processor: self }
    }
}

impl ByteStreamProcessor for Box<dyn ByteStreamProcessor> {
    fn feed(&mut self, bytes: &[u8]) {
        (**self).feed(bytes)
    }

    fn next_message(&mut self) -> Option<FromDeviceMessage> {
        (**self).next_message()
    }

    fn messages_available(&self) -> usize {
        (**self).messages_available()
    }

    fn state(&self) -> ProcessorState {
        (**self).state()
    }

    fn discarded(&self) -> u64 {
        (**self).discarded()
    }

    fn clear(&mut self) {
        (**self).clear()
    }
}

/// Iterator returned by [`ByteStreamProcessor::drain_messages`].
///
/// Yields the messages already decoded; it does not consume further input.
pub struct DrainMessages<'a, P: ByteStreamProcessor> {
    processor: &'a mut P,
}

impl<P: ByteStreamProcessor> Iterator for DrainMessages<'_, P> {
    type Item = FromDeviceMessage;

    fn next(&mut self) -> Option<Self::Item> {
        self.processor.next_message()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = self.processor.messages_available();
        (len, Some(len))
    }
}

impl<P: ByteStreamProcessor> ExactSizeIterator for DrainMessages<'_, P> {
    fn len(&self) -> usize {
        self.processor.messages_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FirmataProcessor, LineProcessor};

    #[test]
    fn test_boxed_processor_delegates() {
        let mut processor: Box<dyn ByteStreamProcessor> = Box::new(LineProcessor::new(b'\n'));
        processor.feed(b"alp://info/hello\n");

        assert_eq!(processor.messages_available(), 1);
        let drained: Vec<_> = processor.drain_messages().collect();
        assert_eq!(drained, vec![FromDeviceMessage::Info("hello".into())]);
        assert_eq!(processor.state(), ProcessorState::Idle);
    }

    #[test]
    fn test_drain_reports_exact_len() {
        let mut processor = FirmataProcessor::new();
        processor.feed(&[0x90, 0x03, 0x00]);

        let drain = processor.drain_messages();
        assert_eq!(drain.len(), 8);
    }
}
