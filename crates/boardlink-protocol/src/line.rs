//! Textual line protocol (`alp`).
//!
//! Every frame is an ASCII URI terminated by a single separator byte
//! (`\n` unless configured otherwise):
//!
//! ```text
//! alp://ppsw/13/1?id=7\n        switch digital pin 13 on, message id 7
//! alp://ared/2/512\n            analog pin 2 now reads 512
//! alp://rply/ok?id=7&value=1\n  positive reply to message 7
//! ```
//!
//! | Direction | Command | Shape |
//! |-----------|---------|-------|
//! | to device | `ppsw` | `ppsw/<pin>/<0\|1>` |
//! | to device | `ppin` | `ppin/<pin>/<value>` |
//! | to device | `srld` / `spld` | `srld/<pin>` start / stop listening digital |
//! | to device | `srla` / `spla` | `srla/<pin>` start / stop listening analog |
//! | to device | `kprs` | `kprs/chr<c>cod<code>loc<location>mod<modifiers>` |
//! | to device | `tone` | `tone/<pin>/<frequency>/<duration or -1>` |
//! | to device | `notn` | `notn/<pin>` |
//! | to device | `cust` | `cust/<part>/<part>...` |
//! | from device | `dred` | `dred/<pin>/<0\|1>` |
//! | from device | `ared` | `ared/<pin>/<0-1023>` |
//! | from device | `rply` | `rply/<ok\|ko>?id=<n>&<k>=<v>...` |
//! | from device | `info` | `info/<text>` |
//! | from device | `cevnt` | `cevnt/<text>` |
//!
//! Outgoing frames append `?id=<n>` when the message carries an id.

use bytes::BytesMut;
use std::collections::VecDeque;
use tracing::{trace, warn};
use url::form_urlencoded;

use boardlink_core::constants::{
    DEFAULT_LINE_SEPARATOR, LINE_FRAME_PREFIX, LINE_PROTOCOL_NAME, MAX_ANALOG_READ, MAX_LINE_FRAME,
};
use boardlink_core::{Error, Pin, PinState, Result};

use crate::message::{Command, FromDeviceMessage, KeyPress, MessageId, Reply, ToDeviceMessage, Tone};
use crate::processor::{ByteStreamProcessor, ProcessorState};
use crate::protocol::Protocol;

/// Initial capacity of the frame buffer; typical frames are well below this.
const INITIAL_BUFFER_CAPACITY: usize = 128;

/// The `alp` line protocol.
///
/// # Example
///
/// ```
/// use boardlink_protocol::{Command, LineProtocol, Protocol, ToDeviceMessage};
/// use boardlink_core::PinState;
///
/// let protocol = LineProtocol::new();
/// let msg = ToDeviceMessage::new(Command::PinStateChange(PinState::digital(13, true))).with_id(7);
///
/// assert_eq!(protocol.encode(&msg).unwrap(), b"alp://ppsw/13/1?id=7\n");
/// ```
#[derive(Debug, Clone)]
pub struct LineProtocol {
    name: String,
    separator: u8,
}

impl LineProtocol {
    /// The `alp` protocol with the default `\n` separator.
    pub fn new() -> Self {
        Self {
            name: LINE_PROTOCOL_NAME.to_string(),
            separator: DEFAULT_LINE_SEPARATOR,
        }
    }

    /// Use another frame separator, e.g. `\r` for boards that never send `\n`.
    pub fn with_separator(mut self, separator: u8) -> Self {
        self.separator = separator;
        self
    }

    /// Register this variant under another name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn separator(&self) -> u8 {
        self.separator
    }

    /// Parse an outgoing frame (without separator) back into a message.
    ///
    /// Boards and simulators use this to understand what the link sent.
    /// Returns `None` for anything that is not a well formed outgoing frame.
    pub fn parse_to_device(frame: &str) -> Option<ToDeviceMessage> {
        let body = strip_frame(frame)?;
        let (path, id) = split_id(body)?;
        let (command, args) = path.split_once('/').unwrap_or((path, ""));

        let command = match command {
            "ppsw" => {
                let (pin, value) = args.split_once('/')?;
                Command::PinStateChange(PinState::digital(pin.parse().ok()?, parse_bit(value)?))
            }
            "ppin" => {
                let (pin, value) = args.split_once('/')?;
                Command::PinStateChange(PinState::analog(pin.parse().ok()?, value.parse().ok()?))
            }
            "srld" => Command::StartListening(Pin::digital(args.parse().ok()?)),
            "spld" => Command::StopListening(Pin::digital(args.parse().ok()?)),
            "srla" => Command::StartListening(Pin::analog(args.parse().ok()?)),
            "spla" => Command::StopListening(Pin::analog(args.parse().ok()?)),
            "kprs" => Command::KeyPress(parse_key_press(args)?),
            "tone" => {
                let mut parts = args.splitn(3, '/');
                let pin = parts.next()?.parse().ok()?;
                let frequency_hz = parts.next()?.parse().ok()?;
                let duration: i64 = parts.next()?.parse().ok()?;
                let mut tone = Tone::new(pin, frequency_hz);
                if duration >= 0 {
                    tone = tone.with_duration(u32::try_from(duration).ok()?);
                }
                Command::Tone(tone)
            }
            "notn" => Command::NoTone(args.parse().ok()?),
            "cust" => Command::Custom(args.split('/').map(str::to_string).collect()),
            _ => return None,
        };

        Some(ToDeviceMessage { id, command })
    }

    fn unsupported(&self, message: &'static str) -> Error {
        Error::UnsupportedMessage {
            protocol: self.name.clone(),
            message,
        }
    }

    /// Free text must not contain the separator, or it would end the frame early.
    fn check_text(&self, text: &str, message: &'static str) -> Result<()> {
        if text.bytes().any(|b| b == self.separator) {
            return Err(self.unsupported(message));
        }
        Ok(())
    }

    fn frame(&self, body: String) -> Vec<u8> {
        let mut bytes = body.into_bytes();
        bytes.push(self.separator);
        bytes
    }
}

impl Default for LineProtocol {
    fn default() -> Self {
        Self::new()
    }
}

impl Protocol for LineProtocol {
    fn name(&self) -> &str {
        &self.name
    }

    fn encode(&self, message: &ToDeviceMessage) -> Result<Vec<u8>> {
        let mut body = String::from(LINE_FRAME_PREFIX);
        match &message.command {
            Command::PinStateChange(PinState::Digital { pin, value }) => {
                body.push_str(&format!("ppsw/{pin}/{}", u8::from(*value)));
            }
            Command::PinStateChange(PinState::Analog { pin, value }) => {
                body.push_str(&format!("ppin/{pin}/{value}"));
            }
            Command::StartListening(Pin::Digital(pin)) => body.push_str(&format!("srld/{pin}")),
            Command::StopListening(Pin::Digital(pin)) => body.push_str(&format!("spld/{pin}")),
            Command::StartListening(Pin::Analog(pin)) => body.push_str(&format!("srla/{pin}")),
            Command::StopListening(Pin::Analog(pin)) => body.push_str(&format!("spla/{pin}")),
            Command::KeyPress(key) => body.push_str(&format!(
                "kprs/chr{}cod{}loc{}mod{}",
                key.key_char, key.key_code, key.location, key.modifiers
            )),
            Command::Tone(tone) => {
                let duration = tone.duration_ms.map_or(-1, i64::from);
                body.push_str(&format!(
                    "tone/{}/{}/{duration}",
                    tone.pin, tone.frequency_hz
                ));
            }
            Command::NoTone(pin) => body.push_str(&format!("notn/{pin}")),
            Command::Custom(parts) => {
                for part in parts {
                    self.check_text(part, "custom message part containing the separator")?;
                    // `?` would be read back as the start of the id suffix.
                    if part.contains('?') {
                        return Err(self.unsupported("custom message part containing '?'"));
                    }
                }
                body.push_str("cust/");
                body.push_str(&parts.join("/"));
            }
        }

        if let Some(id) = message.id {
            body.push_str(&format!("?id={id}"));
        }

        Ok(self.frame(body))
    }

    fn encode_from_device(&self, message: &FromDeviceMessage) -> Result<Vec<u8>> {
        let mut body = String::from(LINE_FRAME_PREFIX);
        match message {
            FromDeviceMessage::PinStateChanged(PinState::Digital { pin, value }) => {
                body.push_str(&format!("dred/{pin}/{}", u8::from(*value)));
            }
            FromDeviceMessage::PinStateChanged(PinState::Analog { pin, value }) => {
                if *value > MAX_ANALOG_READ {
                    return Err(self.unsupported("analog report above 1023"));
                }
                body.push_str(&format!("ared/{pin}/{value}"));
            }
            FromDeviceMessage::Reply(reply) => {
                let mut query = form_urlencoded::Serializer::new(String::new());
                query.append_pair("id", &reply.id.to_string());
                for (key, value) in &reply.params {
                    query.append_pair(key, value);
                }
                let status = if reply.ok { "ok" } else { "ko" };
                body.push_str(&format!("rply/{status}?{}", query.finish()));
            }
            FromDeviceMessage::Info(text) => {
                self.check_text(text, "info text containing the separator")?;
                body.push_str(&format!("info/{text}"));
            }
            FromDeviceMessage::Custom(text) => {
                self.check_text(text, "custom event containing the separator")?;
                body.push_str(&format!("cevnt/{text}"));
            }
        }
        Ok(self.frame(body))
    }

    fn new_processor(&self) -> Box<dyn ByteStreamProcessor> {
        Box::new(LineProcessor::new(self.separator))
    }
}

/// Incremental decoder for the line protocol.
///
/// Bytes are buffered until the separator arrives; the buffered frame is then
/// parsed and the buffer reset. Frames that fail to parse are dropped without
/// affecting the next frame. Frames longer than [`MAX_LINE_FRAME`] switch the
/// decoder to [`ProcessorState::Resync`] until the next separator.
///
/// # Example
///
/// ```
/// use boardlink_protocol::{ByteStreamProcessor, FromDeviceMessage, LineProcessor};
/// use boardlink_core::PinState;
///
/// let mut processor = LineProcessor::new(b'\n');
/// processor.feed(b"boot banner\nalp://dred/13/1\n");
///
/// assert_eq!(
///     processor.next_message(),
///     Some(FromDeviceMessage::PinStateChanged(PinState::digital(13, true)))
/// );
/// assert_eq!(processor.discarded(), 1);
/// ```
#[derive(Debug)]
pub struct LineProcessor {
    separator: u8,
    buffer: BytesMut,
    state: ProcessorState,
    messages: VecDeque<FromDeviceMessage>,
    discarded: u64,
}

impl LineProcessor {
    pub fn new(separator: u8) -> Self {
        Self {
            separator,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            state: ProcessorState::Idle,
            messages: VecDeque::new(),
            discarded: 0,
        }
    }

    /// Buffer bytes of a frame whose separator has not arrived yet.
    fn accumulate(&mut self, bytes: &[u8]) {
        if self.state == ProcessorState::Resync || bytes.is_empty() {
            return;
        }

        if self.buffer.len() + bytes.len() > MAX_LINE_FRAME {
            warn!(
                buffered = self.buffer.len() + bytes.len(),
                "Line frame exceeds {MAX_LINE_FRAME} bytes, skipping to next separator"
            );
            self.drop_frame();
            self.state = ProcessorState::Resync;
            return;
        }

        self.buffer.extend_from_slice(bytes);
        self.state = ProcessorState::Accumulating;
    }

    /// Handle the separator: `tail` holds the bytes of this chunk preceding it.
    fn complete_frame(&mut self, tail: &[u8]) {
        if self.state == ProcessorState::Resync {
            self.buffer.clear();
            self.state = ProcessorState::Idle;
            return;
        }

        if self.buffer.len() + tail.len() > MAX_LINE_FRAME {
            self.drop_frame();
            self.state = ProcessorState::Idle;
            return;
        }

        self.buffer.extend_from_slice(tail);
        let frame = self.buffer.split().freeze();
        self.state = ProcessorState::Idle;

        let text = match std::str::from_utf8(&frame) {
            Ok(text) => text.trim_end_matches('\r'),
            Err(_) => {
                self.drop_frame();
                return;
            }
        };

        if text.is_empty() {
            return;
        }

        match parse_from_device(text) {
            Some(message) => {
                trace!(frame = text, "Decoded {}", message.name());
                self.messages.push_back(message);
            }
            None => {
                trace!(frame = text, "Discarding undecodable frame");
                self.drop_frame();
            }
        }
    }

    fn drop_frame(&mut self) {
        self.buffer.clear();
        self.discarded += 1;
    }
}

impl ByteStreamProcessor for LineProcessor {
    fn feed(&mut self, bytes: &[u8]) {
        let mut rest = bytes;
        while let Some(pos) = rest.iter().position(|&b| b == self.separator) {
            self.complete_frame(&rest[..pos]);
            rest = &rest[pos + 1..];
        }
        self.accumulate(rest);
    }

    fn next_message(&mut self) -> Option<FromDeviceMessage> {
        self.messages.pop_front()
    }

    fn messages_available(&self) -> usize {
        self.messages.len()
    }

    fn state(&self) -> ProcessorState {
        self.state
    }

    fn discarded(&self) -> u64 {
        self.discarded
    }

    fn clear(&mut self) {
        self.buffer.clear();
        self.messages.clear();
        self.state = ProcessorState::Idle;
    }
}

/// Parse one incoming frame (separator and trailing `\r` already removed).
fn parse_from_device(frame: &str) -> Option<FromDeviceMessage> {
    let body = strip_frame(frame)?;
    let (command, args) = body.split_once('/').unwrap_or((body, ""));

    match command {
        "dred" => {
            let (pin, value) = args.split_once('/')?;
            Some(FromDeviceMessage::PinStateChanged(PinState::digital(
                pin.parse().ok()?,
                parse_bit(value)?,
            )))
        }
        "ared" => {
            let (pin, value) = args.split_once('/')?;
            let value: u16 = value.parse().ok()?;
            if value > MAX_ANALOG_READ {
                return None;
            }
            Some(FromDeviceMessage::PinStateChanged(PinState::analog(
                pin.parse().ok()?,
                value,
            )))
        }
        "rply" => parse_reply(args).map(FromDeviceMessage::Reply),
        "info" => Some(FromDeviceMessage::Info(args.to_string())),
        "cevnt" => Some(FromDeviceMessage::Custom(args.to_string())),
        _ => None,
    }
}

fn parse_reply(args: &str) -> Option<Reply> {
    let (status, query) = args.split_once('?')?;
    let ok = match status {
        "ok" => true,
        "ko" => false,
        _ => return None,
    };

    let mut id: Option<MessageId> = None;
    let mut reply = Reply::new(0, ok);
    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        if key == "id" {
            id = Some(value.parse().ok()?);
        } else {
            reply.params.insert(key.into_owned(), value.into_owned());
        }
    }

    reply.id = id?;
    Some(reply)
}

/// `chr<c>cod<code>loc<location>mod<modifiers>`
fn parse_key_press(args: &str) -> Option<KeyPress> {
    let rest = args.strip_prefix("chr")?;
    let key_char = rest.chars().next()?;
    let rest = rest[key_char.len_utf8()..].strip_prefix("cod")?;
    let (key_code, rest) = rest.split_once("loc")?;
    let (location, modifiers) = rest.split_once("mod")?;

    Some(KeyPress::new(
        key_char,
        key_code.parse().ok()?,
        location.parse().ok()?,
        modifiers.parse().ok()?,
    ))
}

fn strip_frame(frame: &str) -> Option<&str> {
    frame
        .trim_end_matches(['\r', '\n'])
        .strip_prefix(LINE_FRAME_PREFIX)
}

/// Split `path?id=<n>`; a trailing query that is not an id stays part of the path.
fn split_id(body: &str) -> Option<(&str, Option<MessageId>)> {
    match body.rsplit_once('?') {
        Some((path, query)) if query.starts_with("id=") => {
            let id = query.strip_prefix("id=")?.parse().ok()?;
            Some((path, Some(id)))
        }
        _ => Some((body, None)),
    }
}

fn parse_bit(value: &str) -> Option<bool> {
    match value {
        "0" => Some(false),
        "1" => Some(true),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn encode(message: ToDeviceMessage) -> String {
        String::from_utf8(LineProtocol::new().encode(&message).unwrap()).unwrap()
    }

    fn decode_all(bytes: &[u8]) -> Vec<FromDeviceMessage> {
        let mut processor = LineProcessor::new(b'\n');
        processor.feed(bytes);
        processor.drain_messages().collect()
    }

    #[test]
    fn test_encode_digital_switch_with_id() {
        let msg = ToDeviceMessage::new(Command::PinStateChange(PinState::digital(13, true)))
            .with_id(7);
        assert_eq!(encode(msg), "alp://ppsw/13/1?id=7\n");
    }

    #[rstest]
    #[case(Command::PinStateChange(PinState::analog(9, 255)), "alp://ppin/9/255\n")]
    #[case(Command::StartListening(Pin::digital(4)), "alp://srld/4\n")]
    #[case(Command::StopListening(Pin::digital(4)), "alp://spld/4\n")]
    #[case(Command::StartListening(Pin::analog(1)), "alp://srla/1\n")]
    #[case(Command::StopListening(Pin::analog(1)), "alp://spla/1\n")]
    #[case(Command::NoTone(3), "alp://notn/3\n")]
    #[case(Command::Tone(Tone::new(3, 440)), "alp://tone/3/440/-1\n")]
    #[case(Command::Tone(Tone::new(3, 440).with_duration(100)), "alp://tone/3/440/100\n")]
    #[case(Command::KeyPress(KeyPress::new('a', 65, 1, 0)), "alp://kprs/chracod65loc1mod0\n")]
    #[case(Command::Custom(vec!["led".into(), "blink".into()]), "alp://cust/led/blink\n")]
    fn test_encode_commands(#[case] command: Command, #[case] expected: &str) {
        assert_eq!(encode(ToDeviceMessage::new(command)), expected);
    }

    #[test]
    fn test_custom_separator() {
        let protocol = LineProtocol::new().with_separator(b'\r');
        let bytes = protocol
            .encode(&ToDeviceMessage::new(Command::NoTone(1)))
            .unwrap();
        assert_eq!(bytes, b"alp://notn/1\r");

        let mut processor = protocol.new_processor();
        processor.feed(b"alp://dred/2/0\r");
        assert_eq!(
            processor.next_message(),
            Some(FromDeviceMessage::PinStateChanged(PinState::digital(2, false)))
        );
    }

    #[test]
    fn test_decode_pin_events() {
        let messages = decode_all(b"alp://dred/13/1\nalp://ared/2/1023\n");
        assert_eq!(
            messages,
            vec![
                FromDeviceMessage::PinStateChanged(PinState::digital(13, true)),
                FromDeviceMessage::PinStateChanged(PinState::analog(2, 1023)),
            ]
        );
    }

    #[test]
    fn test_decode_reply_with_params() {
        let messages = decode_all(b"alp://rply/ok?id=7&state=on&name=a%20b\n");
        let reply = messages[0].as_reply().unwrap();
        assert_eq!(reply.id, 7);
        assert!(reply.ok);
        assert_eq!(reply.param("state"), Some("on"));
        assert_eq!(reply.param("name"), Some("a b"));
    }

    #[test]
    fn test_decode_negative_reply() {
        let messages = decode_all(b"alp://rply/ko?id=3\n");
        assert_eq!(messages, vec![FromDeviceMessage::Reply(Reply::new(3, false))]);
    }

    #[test]
    fn test_decode_info_and_custom_events() {
        let messages = decode_all(b"alp://info/ready\nalp://cevnt/button/pressed\n");
        assert_eq!(
            messages,
            vec![
                FromDeviceMessage::Info("ready".into()),
                FromDeviceMessage::Custom("button/pressed".into()),
            ]
        );
    }

    #[test]
    fn test_decode_tolerates_crlf() {
        let messages = decode_all(b"alp://dred/5/0\r\n");
        assert_eq!(
            messages,
            vec![FromDeviceMessage::PinStateChanged(PinState::digital(5, false))]
        );
    }

    #[rstest]
    #[case(b"garbage\n".as_slice())]
    #[case(b"alp://dred/13/2\n".as_slice())]
    #[case(b"alp://ared/1/1024\n".as_slice())]
    #[case(b"alp://rply/ok\n".as_slice())]
    #[case(b"alp://rply/maybe?id=1\n".as_slice())]
    #[case(b"alp://xxxx/1\n".as_slice())]
    #[case(b"\xff\xfe\n".as_slice())]
    fn test_malformed_frames_are_discarded(#[case] input: &[u8]) {
        let mut processor = LineProcessor::new(b'\n');
        processor.feed(input);

        assert_eq!(processor.messages_available(), 0);
        assert_eq!(processor.discarded(), 1);
        assert_eq!(processor.state(), ProcessorState::Idle);
    }

    #[test]
    fn test_resync_after_garbage() {
        let messages = decode_all(b"\x00\x13noise!!\nalp://dred/1/1\n");
        assert_eq!(
            messages,
            vec![FromDeviceMessage::PinStateChanged(PinState::digital(1, true))]
        );
    }

    #[test]
    fn test_blank_lines_are_ignored() {
        let mut processor = LineProcessor::new(b'\n');
        processor.feed(b"\n\r\nalp://info/x\n");

        assert_eq!(processor.messages_available(), 1);
        assert_eq!(processor.discarded(), 0);
    }

    #[test]
    fn test_partial_frame_waits_for_separator() {
        let mut processor = LineProcessor::new(b'\n');
        processor.feed(b"alp://dred/1");

        assert_eq!(processor.state(), ProcessorState::Accumulating);
        assert_eq!(processor.messages_available(), 0);

        processor.feed(b"3/1\n");
        assert_eq!(processor.state(), ProcessorState::Idle);
        assert_eq!(
            processor.next_message(),
            Some(FromDeviceMessage::PinStateChanged(PinState::digital(13, true)))
        );
    }

    #[test]
    fn test_oversized_frame_resyncs_on_separator() {
        let mut processor = LineProcessor::new(b'\n');
        processor.feed(&vec![b'x'; MAX_LINE_FRAME + 1]);
        assert_eq!(processor.state(), ProcessorState::Resync);

        processor.feed(b"still garbage");
        assert_eq!(processor.state(), ProcessorState::Resync);

        processor.feed(b"\nalp://info/back\n");
        assert_eq!(processor.state(), ProcessorState::Idle);
        assert_eq!(
            processor.next_message(),
            Some(FromDeviceMessage::Info("back".into()))
        );
        assert_eq!(processor.discarded(), 1);
    }

    #[test]
    fn test_clear_resets_processor() {
        let mut processor = LineProcessor::new(b'\n');
        processor.feed(b"alp://info/a\nalp://dr");
        processor.clear();

        assert_eq!(processor.state(), ProcessorState::Idle);
        assert_eq!(processor.messages_available(), 0);

        processor.feed(b"ed/1/1\n");
        assert_eq!(processor.discarded(), 1);
    }

    #[rstest]
    #[case("alp://ppsw/13/1?id=7")]
    #[case("alp://ppin/3/128")]
    #[case("alp://srla/0?id=1")]
    #[case("alp://kprs/chr?cod63loc0mod1?id=2")]
    #[case("alp://tone/4/880/-1?id=9")]
    #[case("alp://cust/a/b/c")]
    fn test_parse_to_device_inverts_encode(#[case] frame: &str) {
        let message = LineProtocol::parse_to_device(frame).unwrap();
        let encoded = encode(message);
        assert_eq!(encoded.trim_end(), frame);
    }

    #[test]
    fn test_parse_to_device_rejects_incoming_frames() {
        assert!(LineProtocol::parse_to_device("alp://dred/1/1").is_none());
        assert!(LineProtocol::parse_to_device("ppsw/1/1").is_none());
        assert!(LineProtocol::parse_to_device("alp://ppsw/1/x").is_none());
    }

    #[test]
    fn test_encode_from_device_reply_escapes_params() {
        let protocol = LineProtocol::new();
        let reply = Reply::new(4, true).with_param("msg", "a&b");
        let bytes = protocol
            .encode_from_device(&FromDeviceMessage::Reply(reply.clone()))
            .unwrap();
        assert_eq!(bytes, b"alp://rply/ok?id=4&msg=a%26b\n");

        assert_eq!(decode_all(&bytes), vec![FromDeviceMessage::Reply(reply)]);
    }

    #[rstest]
    #[case(vec!["x\nalp://ppsw/13/1".to_string()])]
    #[case(vec!["ok".to_string(), "a?id=9".to_string()])]
    fn test_custom_part_cannot_forge_frames(#[case] parts: Vec<String>) {
        let msg = ToDeviceMessage::new(Command::Custom(parts)).with_id(5);
        let err = LineProtocol::new().encode(&msg).unwrap_err();
        assert!(matches!(err, Error::UnsupportedMessage { .. }));
    }

    #[test]
    fn test_custom_part_checked_against_configured_separator() {
        let protocol = LineProtocol::new().with_separator(b';');
        let msg = ToDeviceMessage::new(Command::Custom(vec!["a;b".into()]));
        assert!(protocol.encode(&msg).is_err());

        let msg = ToDeviceMessage::new(Command::Custom(vec!["a\nb".into()]));
        assert_eq!(protocol.encode(&msg).unwrap(), b"alp://cust/a\nb;");
    }

    #[rstest]
    #[case(FromDeviceMessage::Info("up\nalp://dred/1/1".into()))]
    #[case(FromDeviceMessage::Custom("a\nb".into()))]
    #[case(FromDeviceMessage::PinStateChanged(PinState::analog(0, 2000)))]
    fn test_encode_from_device_rejects_undecodable(#[case] message: FromDeviceMessage) {
        let err = LineProtocol::new().encode_from_device(&message).unwrap_err();
        assert!(matches!(err, Error::UnsupportedMessage { .. }));
    }

    #[test]
    fn test_max_analog_report_decodes() {
        let protocol = LineProtocol::new();
        let message = FromDeviceMessage::PinStateChanged(PinState::analog(0, MAX_ANALOG_READ));
        let bytes = protocol.encode_from_device(&message).unwrap();

        let mut processor = protocol.new_processor();
        processor.feed(&bytes);
        assert_eq!(processor.next_message(), Some(message));
        assert_eq!(processor.discarded(), 0);
    }
}
