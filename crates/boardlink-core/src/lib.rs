pub mod constants;
pub mod error;
pub mod pin;

pub use error::{Error, Result};
pub use pin::{Pin, PinState};

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
