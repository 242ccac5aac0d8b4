//! Core constants shared by the protocol, link and transport crates.
//!
//! # Link URIs
//!
//! Links are described by URIs of the form:
//!
//! ```text
//! boardlink://<factory>?<attribute>=<value>&...
//! ```
//!
//! ```
//! use boardlink_core::constants::*;
//!
//! let uri = format!("{LINK_SCHEME}://{DEFAULT_FACTORY_NAME}");
//! assert_eq!(uri, "boardlink://default");
//! ```

// ============================================================================
// Link URIs
// ============================================================================

/// URI scheme accepted by the link manager.
pub const LINK_SCHEME: &str = "boardlink";

/// Reserved factory name resolving to the first serial-like factory,
/// falling back to the first registered one.
pub const DEFAULT_FACTORY_NAME: &str = "default";

// ============================================================================
// Line protocol (alp)
// ============================================================================

/// Registry name of the line protocol.
pub const LINE_PROTOCOL_NAME: &str = "alp";

/// Prefix of every line protocol frame.
pub const LINE_FRAME_PREFIX: &str = "alp://";

/// Default frame separator of the line protocol.
pub const DEFAULT_LINE_SEPARATOR: u8 = b'\n';

/// Longest line frame accepted before the decoder drops it and resynchronizes.
pub const MAX_LINE_FRAME: usize = 4 * 1024;

/// Highest value reported by an analog read (10-bit ADC).
pub const MAX_ANALOG_READ: u16 = 1023;

// ============================================================================
// Binary protocol (firmata)
// ============================================================================

/// Registry name of the binary event protocol.
pub const FIRMATA_PROTOCOL_NAME: &str = "firmata";

/// Analog report / analog write (high nibble).
pub const FIRMATA_ANALOG_MESSAGE: u8 = 0xE0;

/// Digital port report / port write (high nibble).
pub const FIRMATA_DIGITAL_MESSAGE: u8 = 0x90;

/// Enable or disable analog pin reporting (high nibble).
pub const FIRMATA_REPORT_ANALOG: u8 = 0xC0;

/// Enable or disable digital port reporting (high nibble).
pub const FIRMATA_REPORT_DIGITAL: u8 = 0xD0;

/// Set pin mode.
pub const FIRMATA_SET_PIN_MODE: u8 = 0xF4;

/// Set a single digital pin value.
pub const FIRMATA_SET_DIGITAL_PIN_VALUE: u8 = 0xF5;

/// Protocol version report.
pub const FIRMATA_REPORT_VERSION: u8 = 0xF9;

/// Start of a sysex message.
pub const FIRMATA_START_SYSEX: u8 = 0xF0;

/// End of a sysex message.
pub const FIRMATA_END_SYSEX: u8 = 0xF7;

/// Sysex command: 7-bit encoded string.
pub const FIRMATA_STRING_DATA: u8 = 0x71;

/// Sysex command: firmware name and version.
pub const FIRMATA_REPORT_FIRMWARE: u8 = 0x79;

/// Sysex command: analog write for pins beyond the 4-bit range.
pub const FIRMATA_EXTENDED_ANALOG: u8 = 0x6F;

/// Pins carried by one digital port report.
pub const FIRMATA_PINS_PER_PORT: u8 = 8;

/// Longest sysex payload accepted before the decoder drops it.
pub const MAX_SYSEX_SIZE: usize = 1024;

// ============================================================================
// Transports
// ============================================================================

/// Default TCP port of a networked board or link proxy.
pub const DEFAULT_TCP_PORT: u16 = 4478;

/// Default TCP connect timeout in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 3000;

/// Default serial baud rate.
pub const DEFAULT_BAUDRATE: u32 = 115_200;

/// Seconds to wait after opening a serial port; most boards reset on open.
pub const DEFAULT_SERIAL_WAIT_SECS: u64 = 2;

/// Read timeout of the serial reader thread in milliseconds.
///
/// Bounds how long a closed serial connection keeps its reader alive.
pub const SERIAL_READ_TIMEOUT_MS: u64 = 100;

// ============================================================================
// QoS
// ============================================================================

/// Default time to wait for a device reply in milliseconds.
pub const DEFAULT_REPLY_TIMEOUT_MS: u64 = 5000;
