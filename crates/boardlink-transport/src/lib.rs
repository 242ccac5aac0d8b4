//! Transports for boardlink: TCP and serial connections and their link factories.
//!
//! Call [`install`] once at startup to make the serial, TCP and virtual
//! factories available to [`Links::global`](boardlink_link::Links::global):
//!
//! ```no_run
//! use boardlink_link::{Link, Links};
//!
//! # async fn example() -> boardlink_core::Result<()> {
//! boardlink_transport::install()?;
//!
//! // `default` picks the serial factory.
//! let link = Links::global()
//!     .get_link("boardlink://default?port=/dev/ttyACM0")
//!     .await?;
//! link.switch_digital_pin(13, true)?;
//! link.close()?;
//! # Ok(())
//! # }
//! ```

pub mod serial;
pub mod tcp;

pub use serial::{SerialConfig, SerialConnection, SerialLinkFactory, available_ports};
pub use tcp::{TcpConfig, TcpConnection, TcpLinkFactory};

use boardlink_core::Result;
use boardlink_link::{LinkManager, LinkManagerBuilder, VirtualLinkFactory};

/// A manager builder with every transport of this crate plus the virtual board.
pub fn link_manager_builder() -> LinkManagerBuilder {
    LinkManager::builder()
        .register(SerialLinkFactory)
        .register(TcpLinkFactory)
        .register(VirtualLinkFactory)
}

/// Install the transports as the process-wide link manager.
///
/// Fails if the global manager was already installed or used.
pub fn install() -> Result<()> {
    link_manager_builder().build().install()
}
