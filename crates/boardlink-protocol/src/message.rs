//! Messages exchanged with a board, independent of the wire format.
//!
//! [`ToDeviceMessage`] wraps a [`Command`] and an optional [`MessageId`];
//! boards answer messages carrying an id with a [`Reply`]. Everything the
//! board sends on its own is a [`FromDeviceMessage`].

use boardlink_core::{Pin, PinState, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identifier attached to an outgoing message so the device reply can be matched.
pub type MessageId = u64;

/// A key press forwarded to the board (e.g. for HID emulation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPress {
    pub key_char: char,
    pub key_code: i32,
    pub location: i32,
    pub modifiers: i32,
}

impl KeyPress {
    pub fn new(key_char: char, key_code: i32, location: i32, modifiers: i32) -> Self {
        Self {
            key_char,
            key_code,
            location,
            modifiers,
        }
    }
}

/// A tone on a pin; without a duration it plays until a no-tone command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tone {
    pub pin: u8,
    pub frequency_hz: u32,
    pub duration_ms: Option<u32>,
}

impl Tone {
    pub fn new(pin: u8, frequency_hz: u32) -> Self {
        Self {
            pin,
            frequency_hz,
            duration_ms: None,
        }
    }

    pub fn with_duration(mut self, duration_ms: u32) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }
}

/// Commands an application can send to a board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    StartListening(Pin),
    StopListening(Pin),
    PinStateChange(PinState),
    KeyPress(KeyPress),
    Tone(Tone),
    NoTone(u8),
    Custom(Vec<String>),
}

impl Command {
    /// Short name used in logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            Self::StartListening(_) => "start-listening",
            Self::StopListening(_) => "stop-listening",
            Self::PinStateChange(_) => "pin-state-change",
            Self::KeyPress(_) => "key-press",
            Self::Tone(_) => "tone",
            Self::NoTone(_) => "no-tone",
            Self::Custom(_) => "custom",
        }
    }
}

/// An outgoing message: a command plus the optional id used for reply correlation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToDeviceMessage {
    pub id: Option<MessageId>,
    pub command: Command,
}

impl ToDeviceMessage {
    pub fn new(command: Command) -> Self {
        Self { id: None, command }
    }

    pub fn with_id(mut self, id: MessageId) -> Self {
        self.id = Some(id);
        self
    }
}

impl From<Command> for ToDeviceMessage {
    fn from(command: Command) -> Self {
        Self::new(command)
    }
}

/// Device answer to a message that carried an id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub id: MessageId,
    pub ok: bool,
    pub params: BTreeMap<String, String>,
}

impl Reply {
    pub fn new(id: MessageId, ok: bool) -> Self {
        Self {
            id,
            ok,
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(|s| s.as_str())
    }

    /// Convert a negative reply into [`Error::ReplyRejected`](boardlink_core::Error::ReplyRejected).
    pub fn into_result(self) -> Result<Self> {
        if self.ok {
            Ok(self)
        } else {
            Err(boardlink_core::Error::ReplyRejected { id: self.id })
        }
    }
}

/// Events produced by the decoder from bytes sent by a board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FromDeviceMessage {
    PinStateChanged(PinState),
    Reply(Reply),
    Info(String),
    Custom(String),
}

impl FromDeviceMessage {
    pub fn name(&self) -> &'static str {
        match self {
            Self::PinStateChanged(_) => "pin-state-changed",
            Self::Reply(_) => "reply",
            Self::Info(_) => "info",
            Self::Custom(_) => "custom",
        }
    }

    /// The reply carried by this message, if any.
    pub fn as_reply(&self) -> Option<&Reply> {
        match self {
            Self::Reply(reply) => Some(reply),
            _ => None,
        }
    }

    pub fn as_pin_state(&self) -> Option<&PinState> {
        match self {
            Self::PinStateChanged(state) => Some(state),
            _ => None,
        }
    }
}
