//! Byte channel contract implemented by every transport.

use std::sync::Arc;
use tracing::{debug, warn};

use boardlink_core::Result;

/// Receives raw bytes flowing through a [`Connection`].
pub trait RawByteListener: Send + Sync {
    /// Bytes read from the device, in arrival order.
    fn received(&self, bytes: &[u8]);

    /// Bytes written to the device.
    fn sent(&self, _bytes: &[u8]) {}
}

/// An open byte channel to a board.
///
/// Implementations own one reader that delivers incoming bytes to the
/// registered listeners in order. `write` may be called from any thread.
/// `close` is idempotent.
pub trait Connection: Send + Sync {
    fn write(&self, bytes: &[u8]) -> Result<()>;

    fn close(&self) -> Result<()>;

    fn add_listener(&self, listener: Arc<dyn RawByteListener>);

    fn remove_listener(&self, listener: &Arc<dyn RawByteListener>);
}

/// Closes a connection on drop unless it was handed over with [`ConnectionGuard::disarm`].
///
/// Factories wrap a freshly opened connection in a guard while they finish
/// setting up the link, so a failure or a cancelled future never leaks it.
///
/// ```
/// use boardlink_link::{ConnectionGuard, MockConnection};
///
/// let (connection, handle) = MockConnection::new();
/// {
///     let _guard = ConnectionGuard::new(connection);
/// }
/// assert_eq!(handle.close_count(), 1);
/// ```
pub struct ConnectionGuard {
    connection: Arc<dyn Connection>,
    armed: bool,
}

impl ConnectionGuard {
    pub fn new(connection: Arc<dyn Connection>) -> Self {
        Self {
            connection,
            armed: true,
        }
    }

    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    /// Take the connection out of the guard, leaving it open.
    pub fn disarm(mut self) -> Arc<dyn Connection> {
        self.armed = false;
        Arc::clone(&self.connection)
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if self.armed {
            debug!("Releasing connection of unfinished link");
            if let Err(e) = self.connection.close() {
                warn!("Failed to close connection: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MockConnection;

    #[test]
    fn test_disarmed_guard_keeps_connection_open() {
        let (connection, handle) = MockConnection::new();
        let guard = ConnectionGuard::new(connection);

        let connection = guard.disarm();
        assert_eq!(handle.close_count(), 0);

        connection.write(b"x").unwrap();
        assert_eq!(handle.written(), vec![b"x".to_vec()]);
    }
}
