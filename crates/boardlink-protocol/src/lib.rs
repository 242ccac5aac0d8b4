pub mod firmata;
pub mod line;
pub mod message;
pub mod processor;
pub mod protocol;

pub use firmata::{FirmataProcessor, FirmataProtocol};
pub use line::{LineProcessor, LineProtocol};
pub use message::{
    Command, FromDeviceMessage, KeyPress, MessageId, Reply, ToDeviceMessage, Tone,
};
pub use processor::{ByteStreamProcessor, DrainMessages, ProcessorState};
pub use protocol::{Protocol, Protocols, ProtocolsBuilder};
