//! Links: the application-facing handle to one board.
//!
//! A [`Link`] switches pins, starts and stops pin reporting, sends tones, key
//! presses and custom messages, and fans device events out to listeners. The
//! usual implementation is [`ConnectionBasedLink`], which pairs a byte-level
//! [`Connection`] with a [`Protocol`](boardlink_protocol::Protocol).
//!
//! Links are normally obtained from a URI:
//!
//! ```no_run
//! use boardlink_link::{Link, Links};
//!
//! # async fn example() -> boardlink_core::Result<()> {
//! let link = Links::global().get_link("boardlink://virtual?reply=true").await?;
//! link.switch_digital_pin(13, true)?;
//! link.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`connection`]: byte channel contract implemented by transports
//! - [`listener`]: event listeners and the copy-on-write listener set
//! - [`connection_link`]: link over a connection and a protocol
//! - [`attribute`], [`config`], [`manager`]: URI driven configuration
//! - [`cache`]: process-wide link sharing
//! - [`qos`]: reply correlation
//! - [`mock`], [`virtual_board`]: in-process connections

pub mod attribute;
pub mod cache;
pub mod config;
pub mod connection;
pub mod connection_link;
pub mod link;
pub mod listener;
pub mod manager;
pub mod mock;
pub mod qos;
pub mod virtual_board;

pub use attribute::{AttributeDescriptor, AttributeInfo, AttributeKind, AttributeTable, AttributeValue};
pub use cache::{CacheKey, Links, SharedLink};
pub use config::{Configurer, LinkConfig, LinkFactory};
pub use connection::{Connection, ConnectionGuard, RawByteListener};
pub use connection_link::ConnectionBasedLink;
pub use link::Link;
pub use listener::{EventListener, FnListener, ListenerSet, PinListener};
pub use manager::{LinkManager, LinkManagerBuilder};
pub use mock::{MockConnection, MockConnectionHandle};
pub use qos::{PendingReply, ResponseAwaiter};
pub use virtual_board::{VirtualConfig, VirtualConnection, VirtualLinkFactory};
