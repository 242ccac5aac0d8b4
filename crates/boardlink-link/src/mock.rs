//! In-memory connection for testing links without a board.
//!
//! The connection records every write; its handle injects device bytes and
//! inspects what the link sent.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use boardlink_core::{Error, Result};

use crate::connection::{Connection, RawByteListener};
use crate::listener::ListenerSet;

#[derive(Default)]
struct MockState {
    written: Mutex<Vec<Vec<u8>>>,
    listeners: ListenerSet<dyn RawByteListener>,
    closed: AtomicBool,
    close_count: AtomicUsize,
    fail_writes: AtomicBool,
}

/// Mock connection for testing and development.
///
/// # Examples
///
/// ```
/// use boardlink_link::{Connection, MockConnection};
///
/// let (connection, handle) = MockConnection::new();
/// connection.write(b"alp://notn/3\n").unwrap();
///
/// assert_eq!(handle.written_text(), vec!["alp://notn/3\n".to_string()]);
/// ```
pub struct MockConnection {
    state: Arc<MockState>,
}

impl MockConnection {
    /// Create a mock connection and the handle controlling it.
    pub fn new() -> (Arc<Self>, MockConnectionHandle) {
        let state = Arc::new(MockState::default());
        let connection = Arc::new(Self {
            state: Arc::clone(&state),
        });
        (connection, MockConnectionHandle { state })
    }
}

impl Connection for MockConnection {
    fn write(&self, bytes: &[u8]) -> Result<()> {
        if self.state.closed.load(Ordering::Acquire) {
            return Err(Error::disconnected("mock"));
        }
        if self.state.fail_writes.load(Ordering::Acquire) {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "mock write failure",
            )));
        }

        self.state.written.lock().push(bytes.to_vec());
        for listener in self.state.listeners.snapshot().iter() {
            listener.sent(bytes);
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        if !self.state.closed.swap(true, Ordering::AcqRel) {
            self.state.close_count.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn add_listener(&self, listener: Arc<dyn RawByteListener>) {
        self.state.listeners.add(listener);
    }

    fn remove_listener(&self, listener: &Arc<dyn RawByteListener>) {
        self.state.listeners.remove(listener);
    }
}

/// Handle for controlling a [`MockConnection`].
#[derive(Clone)]
pub struct MockConnectionHandle {
    state: Arc<MockState>,
}

impl MockConnectionHandle {
    /// Deliver bytes as if the device had sent them.
    pub fn inject(&self, bytes: &[u8]) {
        for listener in self.state.listeners.snapshot().iter() {
            listener.received(bytes);
        }
    }

    /// Every write, one entry per call.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.state.written.lock().clone()
    }

    /// Writes decoded as UTF-8, for line protocol assertions.
    pub fn written_text(&self) -> Vec<String> {
        self.written()
            .iter()
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
            .collect()
    }

    pub fn clear_written(&self) {
        self.state.written.lock().clear();
    }

    /// Number of times the connection actually closed (0 or 1).
    pub fn close_count(&self) -> usize {
        self.state.close_count.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::Acquire)
    }

    pub fn listener_count(&self) -> usize {
        self.state.listeners.len()
    }

    /// Make subsequent writes fail with an I/O error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.state.fail_writes.store(fail, Ordering::Release);
    }
}
