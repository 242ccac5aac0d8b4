//! Shared helpers for protocol integration tests.
//!
//! Decoding helpers feed a processor in arbitrary chunk sizes so tests can
//! check that framing never depends on how the transport split the stream.

#![allow(dead_code)]

use boardlink_core::PinState;
use boardlink_protocol::{ByteStreamProcessor, FromDeviceMessage, Protocol, Protocols};
use std::sync::Arc;

pub fn protocol(name: &str) -> Arc<dyn Protocol> {
    Protocols::builder()
        .build()
        .get(name)
        .expect("built-in protocol")
}

/// Feed `bytes` in one call and return everything decoded.
pub fn decode_whole(protocol: &dyn Protocol, bytes: &[u8]) -> Vec<FromDeviceMessage> {
    let mut processor = protocol.new_processor();
    processor.feed(bytes);
    processor.drain_messages().collect()
}

/// Feed `bytes` split at the given chunk size.
pub fn decode_chunked(
    protocol: &dyn Protocol,
    bytes: &[u8],
    chunk: usize,
) -> Vec<FromDeviceMessage> {
    let mut processor = protocol.new_processor();
    for part in bytes.chunks(chunk.max(1)) {
        processor.feed(part);
    }
    processor.drain_messages().collect()
}

/// Feed `bytes` one byte at a time.
pub fn decode_bytewise(protocol: &dyn Protocol, bytes: &[u8]) -> Vec<FromDeviceMessage> {
    decode_chunked(protocol, bytes, 1)
}

pub fn pin_states(messages: &[FromDeviceMessage]) -> Vec<PinState> {
    messages
        .iter()
        .filter_map(|m| m.as_pin_state().copied())
        .collect()
}

/// Encode a sequence of device-side messages back to back.
pub fn device_stream(protocol: &dyn Protocol, messages: &[FromDeviceMessage]) -> Vec<u8> {
    messages
        .iter()
        .flat_map(|m| protocol.encode_from_device(m).expect("encodable message"))
        .collect()
}
