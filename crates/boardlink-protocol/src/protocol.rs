//! Protocol trait and the protocol registry.
//!
//! Protocols are looked up by name when a link is configured (the `proto`
//! attribute of most link factories). The process-wide registry is built once
//! and never mutated afterwards; [`Protocols::install`] lets an application
//! replace the built-in set before first use.

use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::warn;

use boardlink_core::{Error, Result};

use crate::firmata::FirmataProtocol;
use crate::line::LineProtocol;
use crate::message::{FromDeviceMessage, ToDeviceMessage};
use crate::processor::ByteStreamProcessor;

/// A named codec between messages and bytes.
///
/// Encoding is stateless and may be called from any thread. Decoding is
/// stateful, so every connection gets its own processor from
/// [`Protocol::new_processor`].
pub trait Protocol: Send + Sync + fmt::Debug {
    /// Unique registry name.
    fn name(&self) -> &str;

    /// Encode a message for the device.
    ///
    /// Fails with [`Error::UnsupportedMessage`] when the wire format cannot
    /// carry the command.
    fn encode(&self, message: &ToDeviceMessage) -> Result<Vec<u8>>;

    /// Encode a message the way a device would send it.
    ///
    /// Used by simulated boards and tests.
    fn encode_from_device(&self, message: &FromDeviceMessage) -> Result<Vec<u8>>;

    /// A fresh decoder for one connection.
    fn new_processor(&self) -> Box<dyn ByteStreamProcessor>;
}

static GLOBAL: OnceLock<Protocols> = OnceLock::new();

/// Ordered set of protocols with unique names.
#[derive(Debug, Clone)]
pub struct Protocols {
    protocols: Vec<Arc<dyn Protocol>>,
}

impl Protocols {
    /// Builder pre-populated with the built-in protocols.
    pub fn builder() -> ProtocolsBuilder {
        ProtocolsBuilder::new()
            .register(LineProtocol::new())
            .register(FirmataProtocol::new())
    }

    /// Builder without any protocol.
    pub fn empty() -> ProtocolsBuilder {
        ProtocolsBuilder::new()
    }

    /// The process-wide registry, initialized with the built-ins on first use.
    pub fn global() -> &'static Protocols {
        GLOBAL.get_or_init(|| Protocols::builder().build())
    }

    /// Make this set the process-wide registry.
    ///
    /// Fails once the registry has been installed or read.
    pub fn install(self) -> Result<()> {
        GLOBAL
            .set(self)
            .map_err(|_| Error::AlreadyInstalled("protocol"))
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Protocol>> {
        self.protocols
            .iter()
            .find(|p| p.name() == name)
            .cloned()
            .ok_or_else(|| Error::UnknownProtocol(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.protocols.iter().any(|p| p.name() == name)
    }

    /// Names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.protocols.iter().map(|p| p.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.protocols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.protocols.is_empty()
    }
}

/// Builder for [`Protocols`].
#[derive(Debug, Default)]
pub struct ProtocolsBuilder {
    protocols: Vec<Arc<dyn Protocol>>,
}

impl ProtocolsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a protocol. A second protocol with an already registered name is ignored.
    pub fn register<P: Protocol + 'static>(self, protocol: P) -> Self {
        self.register_arc(Arc::new(protocol))
    }

    pub fn register_arc(mut self, protocol: Arc<dyn Protocol>) -> Self {
        if self.protocols.iter().any(|p| p.name() == protocol.name()) {
            warn!(
                protocol = protocol.name(),
                "Protocol already registered, keeping the first one"
            );
            return self;
        }
        self.protocols.push(protocol);
        self
    }

    pub fn build(self) -> Protocols {
        Protocols {
            protocols: self.protocols,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boardlink_core::constants::{FIRMATA_PROTOCOL_NAME, LINE_PROTOCOL_NAME};

    #[test]
    fn test_builtins_registered_in_order() {
        let protocols = Protocols::builder().build();
        assert_eq!(
            protocols.names(),
            vec![LINE_PROTOCOL_NAME.to_string(), FIRMATA_PROTOCOL_NAME.to_string()]
        );
    }

    #[test]
    fn test_get_unknown_protocol() {
        let protocols = Protocols::builder().build();
        let err = protocols.get("morse").unwrap_err();
        assert!(matches!(err, Error::UnknownProtocol(name) if name == "morse"));
    }

    #[test]
    fn test_duplicate_name_keeps_first() {
        let protocols = Protocols::empty()
            .register(LineProtocol::new())
            .register(LineProtocol::new().with_separator(b'\r'))
            .build();

        assert_eq!(protocols.len(), 1);
        let line = protocols.get(LINE_PROTOCOL_NAME).unwrap();
        let bytes = line
            .encode(&ToDeviceMessage::new(crate::Command::NoTone(1)))
            .unwrap();
        assert_eq!(bytes.last(), Some(&b'\n'));
    }

    #[test]
    fn test_renamed_variant_registers_alongside() {
        let protocols = Protocols::builder()
            .register(LineProtocol::new().with_separator(b'\r').named("alp-cr"))
            .build();

        assert!(protocols.contains("alp-cr"));
        assert_eq!(protocols.len(), 3);
    }

    #[test]
    fn test_global_contains_builtins() {
        let global = Protocols::global();
        assert!(global.contains(LINE_PROTOCOL_NAME));
        assert!(global.contains(FIRMATA_PROTOCOL_NAME));
        assert!(matches!(
            Protocols::empty().build().install(),
            Err(Error::AlreadyInstalled(_))
        ));
    }
}
