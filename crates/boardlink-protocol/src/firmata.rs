//! Binary event protocol (`firmata`).
//!
//! A subset of the Firmata wire format: enough to switch pins, start and stop
//! pin reporting, and decode the pin reports a board sends back.
//!
//! Command bytes have the high bit set; data bytes are 7-bit. Values wider
//! than 7 bits are sent LSB first as two data bytes.
//!
//! ```text
//! E0|pin  lsb msb          analog report for pin (0-15)
//! 90|port lsb msb          digital report for pins port*8 .. port*8+7
//! F9      major minor      protocol version
//! F0 cmd  data... F7       sysex (firmware report, string data, ...)
//! ```
//!
//! Tone, no-tone and key press commands have no Firmata counterpart;
//! encoding them fails with [`Error::UnsupportedMessage`].

use std::collections::VecDeque;
use tracing::{trace, warn};

use boardlink_core::constants::{
    FIRMATA_ANALOG_MESSAGE, FIRMATA_DIGITAL_MESSAGE, FIRMATA_END_SYSEX, FIRMATA_EXTENDED_ANALOG,
    FIRMATA_PINS_PER_PORT, FIRMATA_PROTOCOL_NAME, FIRMATA_REPORT_ANALOG, FIRMATA_REPORT_DIGITAL,
    FIRMATA_REPORT_FIRMWARE, FIRMATA_REPORT_VERSION, FIRMATA_SET_DIGITAL_PIN_VALUE,
    FIRMATA_SET_PIN_MODE, FIRMATA_START_SYSEX, FIRMATA_STRING_DATA, MAX_SYSEX_SIZE,
};
use boardlink_core::{Error, Pin, PinState, Result};

use crate::message::{Command, FromDeviceMessage, ToDeviceMessage};
use crate::processor::{ByteStreamProcessor, ProcessorState};
use crate::protocol::Protocol;

const PIN_MODE_INPUT: u8 = 0x00;
const PIN_MODE_OUTPUT: u8 = 0x01;
const PIN_MODE_PWM: u8 = 0x03;

/// Highest pin addressable by the 4-bit channel of analog messages.
const MAX_CHANNEL_PIN: u8 = 0x0F;

/// The `firmata` protocol.
#[derive(Debug, Clone, Default)]
pub struct FirmataProtocol;

impl FirmataProtocol {
    pub fn new() -> Self {
        Self
    }

    /// Encode a digital port report as a board sends it.
    ///
    /// `bits` holds the levels of pins `port*8 .. port*8+7`, LSB first.
    pub fn encode_port_report(port: u8, bits: u8) -> Vec<u8> {
        vec![
            FIRMATA_DIGITAL_MESSAGE | (port & 0x0F),
            bits & 0x7F,
            bits >> 7,
        ]
    }

    fn unsupported(message: &'static str) -> Error {
        Error::UnsupportedMessage {
            protocol: FIRMATA_PROTOCOL_NAME.to_string(),
            message,
        }
    }
}

impl Protocol for FirmataProtocol {
    fn name(&self) -> &str {
        FIRMATA_PROTOCOL_NAME
    }

    fn encode(&self, message: &ToDeviceMessage) -> Result<Vec<u8>> {
        let bytes = match &message.command {
            Command::PinStateChange(PinState::Digital { pin, value }) => {
                let pin = data_byte(*pin)?;
                vec![
                    FIRMATA_SET_PIN_MODE,
                    pin,
                    PIN_MODE_OUTPUT,
                    FIRMATA_SET_DIGITAL_PIN_VALUE,
                    pin,
                    u8::from(*value),
                ]
            }
            Command::PinStateChange(PinState::Analog { pin, value }) => {
                let pin = data_byte(*pin)?;
                let (lsb, msb) = split_14bit(*value);
                let mut bytes = vec![FIRMATA_SET_PIN_MODE, pin, PIN_MODE_PWM];
                if pin <= MAX_CHANNEL_PIN {
                    bytes.extend_from_slice(&[FIRMATA_ANALOG_MESSAGE | pin, lsb, msb]);
                } else {
                    bytes.extend_from_slice(&[
                        FIRMATA_START_SYSEX,
                        FIRMATA_EXTENDED_ANALOG,
                        pin,
                        lsb,
                        msb,
                        FIRMATA_END_SYSEX,
                    ]);
                }
                bytes
            }
            Command::StartListening(pin) => report_pin(*pin, true)?,
            Command::StopListening(pin) => report_pin(*pin, false)?,
            Command::Custom(parts) => string_sysex(&parts.join("/")),
            other => return Err(Self::unsupported(other.name())),
        };
        Ok(bytes)
    }

    fn encode_from_device(&self, message: &FromDeviceMessage) -> Result<Vec<u8>> {
        match message {
            FromDeviceMessage::PinStateChanged(PinState::Analog { pin, value })
                if *pin <= MAX_CHANNEL_PIN =>
            {
                let (lsb, msb) = split_14bit(*value);
                Ok(vec![FIRMATA_ANALOG_MESSAGE | pin, lsb, msb])
            }
            FromDeviceMessage::PinStateChanged(PinState::Analog { .. }) => {
                Err(Self::unsupported("analog report above pin 15"))
            }
            FromDeviceMessage::PinStateChanged(PinState::Digital { .. }) => {
                Err(Self::unsupported("single digital pin report"))
            }
            FromDeviceMessage::Custom(text) => Ok(string_sysex(text)),
            other => Err(Self::unsupported(other.name())),
        }
    }

    fn new_processor(&self) -> Box<dyn ByteStreamProcessor> {
        Box::new(FirmataProcessor::new())
    }
}

fn report_pin(pin: Pin, enable: bool) -> Result<Vec<u8>> {
    let flag = u8::from(enable);
    match pin {
        Pin::Analog(number) if number <= MAX_CHANNEL_PIN => {
            Ok(vec![FIRMATA_REPORT_ANALOG | number, flag])
        }
        Pin::Analog(_) => Err(FirmataProtocol::unsupported("analog pin above 15")),
        Pin::Digital(number) => {
            let number = data_byte(number)?;
            let port = number / FIRMATA_PINS_PER_PORT;
            let mut bytes = Vec::with_capacity(5);
            if enable {
                bytes.extend_from_slice(&[FIRMATA_SET_PIN_MODE, number, PIN_MODE_INPUT]);
            }
            bytes.extend_from_slice(&[FIRMATA_REPORT_DIGITAL | port, flag]);
            Ok(bytes)
        }
    }
}

fn data_byte(pin: u8) -> Result<u8> {
    if pin > 0x7F {
        return Err(FirmataProtocol::unsupported("pin above 127"));
    }
    Ok(pin)
}

fn split_14bit(value: u16) -> (u8, u8) {
    ((value & 0x7F) as u8, ((value >> 7) & 0x7F) as u8)
}

/// STRING_DATA sysex: every byte split into two 7-bit data bytes.
fn string_sysex(text: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(text.len() * 2 + 3);
    bytes.push(FIRMATA_START_SYSEX);
    bytes.push(FIRMATA_STRING_DATA);
    for byte in text.bytes() {
        bytes.push(byte & 0x7F);
        bytes.push(byte >> 7);
    }
    bytes.push(FIRMATA_END_SYSEX);
    bytes
}

fn decode_7bit_string(data: &[u8]) -> String {
    let bytes: Vec<u8> = data
        .chunks_exact(2)
        .map(|pair| pair[0] | (pair[1] << 7))
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

/// What the decoder is in the middle of.
#[derive(Debug)]
enum Pending {
    None,
    /// Fixed-size message waiting for its two data bytes.
    Message { command: u8, data: [u8; 2], len: usize },
    Sysex(Vec<u8>),
    /// Oversized sysex being skipped until END_SYSEX.
    SkipSysex,
}

/// Incremental decoder for the binary protocol.
///
/// Decodes analog reports, digital port reports (one event per pin of the
/// port), the protocol version report, and the firmware and string sysex
/// messages. Stray data bytes are discarded; a command byte arriving while a
/// message is incomplete abandons that message.
///
/// # Example
///
/// ```
/// use boardlink_protocol::{ByteStreamProcessor, FirmataProcessor, FromDeviceMessage};
/// use boardlink_core::PinState;
///
/// let mut processor = FirmataProcessor::new();
/// processor.feed(&[0xE2, 0x7F, 0x07]);
///
/// assert_eq!(
///     processor.next_message(),
///     Some(FromDeviceMessage::PinStateChanged(PinState::analog(2, 1023)))
/// );
/// ```
#[derive(Debug)]
pub struct FirmataProcessor {
    pending: Pending,
    messages: VecDeque<FromDeviceMessage>,
    discarded: u64,
}

impl FirmataProcessor {
    pub fn new() -> Self {
        Self {
            pending: Pending::None,
            messages: VecDeque::new(),
            discarded: 0,
        }
    }

    fn push_byte(&mut self, byte: u8) {
        if byte & 0x80 != 0 {
            self.push_command(byte);
        } else {
            self.push_data(byte);
        }
    }

    fn push_command(&mut self, byte: u8) {
        if byte == FIRMATA_END_SYSEX {
            match std::mem::replace(&mut self.pending, Pending::None) {
                Pending::Sysex(data) => self.finish_sysex(&data),
                Pending::SkipSysex => {}
                Pending::Message { .. } => self.discarded += 1,
                Pending::None => self.discarded += 1,
            }
            return;
        }

        if !matches!(self.pending, Pending::None | Pending::SkipSysex) {
            trace!(command = byte, "Command byte interrupts partial message");
            self.discarded += 1;
        }

        self.pending = match byte {
            FIRMATA_START_SYSEX => Pending::Sysex(Vec::new()),
            FIRMATA_REPORT_VERSION => Pending::Message {
                command: byte,
                data: [0; 2],
                len: 0,
            },
            _ if matches!(byte & 0xF0, FIRMATA_ANALOG_MESSAGE | FIRMATA_DIGITAL_MESSAGE) => {
                Pending::Message {
                    command: byte,
                    data: [0; 2],
                    len: 0,
                }
            }
            _ => {
                trace!(command = byte, "Ignoring unsupported command");
                self.discarded += 1;
                Pending::None
            }
        };
    }

    fn push_data(&mut self, byte: u8) {
        match &mut self.pending {
            Pending::None => self.discarded += 1,
            Pending::SkipSysex => {}
            Pending::Sysex(data) => {
                if data.len() >= MAX_SYSEX_SIZE {
                    warn!("Sysex exceeds {MAX_SYSEX_SIZE} bytes, skipping to END_SYSEX");
                    self.discarded += 1;
                    self.pending = Pending::SkipSysex;
                } else {
                    data.push(byte);
                }
            }
            Pending::Message { command, data, len } => {
                data[*len] = byte;
                *len += 1;
                if *len == data.len() {
                    let (command, data) = (*command, *data);
                    self.pending = Pending::None;
                    self.finish_message(command, data);
                }
            }
        }
    }

    fn finish_message(&mut self, command: u8, data: [u8; 2]) {
        let value = u16::from(data[0]) | (u16::from(data[1]) << 7);

        if command == FIRMATA_REPORT_VERSION {
            self.messages.push_back(FromDeviceMessage::Info(format!(
                "firmata protocol {}.{}",
                data[0], data[1]
            )));
            return;
        }

        let channel = command & 0x0F;
        match command & 0xF0 {
            FIRMATA_ANALOG_MESSAGE => {
                self.messages
                    .push_back(FromDeviceMessage::PinStateChanged(PinState::analog(
                        channel, value,
                    )));
            }
            FIRMATA_DIGITAL_MESSAGE => {
                let first = channel * FIRMATA_PINS_PER_PORT;
                for offset in 0..FIRMATA_PINS_PER_PORT {
                    let high = (value >> offset) & 1 == 1;
                    self.messages
                        .push_back(FromDeviceMessage::PinStateChanged(PinState::digital(
                            first + offset,
                            high,
                        )));
                }
            }
            _ => self.discarded += 1,
        }
    }

    fn finish_sysex(&mut self, data: &[u8]) {
        let Some((&command, payload)) = data.split_first() else {
            self.discarded += 1;
            return;
        };

        match command {
            FIRMATA_REPORT_FIRMWARE if payload.len() >= 2 => {
                let name = decode_7bit_string(&payload[2..]);
                self.messages.push_back(FromDeviceMessage::Info(format!(
                    "{name} {}.{}",
                    payload[0], payload[1]
                )));
            }
            FIRMATA_STRING_DATA => {
                self.messages
                    .push_back(FromDeviceMessage::Custom(decode_7bit_string(payload)));
            }
            _ => {
                trace!(command, len = payload.len(), "Skipping sysex");
            }
        }
    }
}

impl Default for FirmataProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl ByteStreamProcessor for FirmataProcessor {
    fn feed(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.push_byte(byte);
        }
    }

    fn next_message(&mut self) -> Option<FromDeviceMessage> {
        self.messages.pop_front()
    }

    fn messages_available(&self) -> usize {
        self.messages.len()
    }

    fn state(&self) -> ProcessorState {
        match self.pending {
            Pending::None => ProcessorState::Idle,
            Pending::Message { .. } | Pending::Sysex(_) => ProcessorState::Accumulating,
            Pending::SkipSysex => ProcessorState::Resync,
        }
    }

    fn discarded(&self) -> u64 {
        self.discarded
    }

    fn clear(&mut self) {
        self.pending = Pending::None;
        self.messages.clear();
    }
}
