//! Shared fixtures for link integration tests.
//!
//! [`CountingFactory`] builds links over [`MockConnection`]s and keeps every
//! connection handle, so tests can count opened and closed transports.

#![allow(dead_code)]

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use boardlink_core::{Error, Result};
use boardlink_link::{
    AttributeDescriptor, AttributeTable, AttributeValue, ConnectionBasedLink, Link, LinkConfig,
    LinkFactory, LinkManager, Links, MockConnection, MockConnectionHandle,
};
use boardlink_protocol::LineProtocol;

#[derive(Debug, Clone)]
pub struct CountingConfig {
    pub board: String,
    pub fail: bool,
    pub delay_ms: u64,
}

impl Default for CountingConfig {
    fn default() -> Self {
        Self {
            board: "uno".to_string(),
            fail: false,
            delay_ms: 0,
        }
    }
}

impl LinkConfig for CountingConfig {
    fn attributes() -> AttributeTable<Self> {
        AttributeTable::new()
            .with(AttributeDescriptor::string(
                "board",
                |c: &CountingConfig| Some(AttributeValue::String(c.board.clone())),
                |c: &mut CountingConfig, v| {
                    c.board = v.into_string();
                    Ok(())
                },
            ))
            .with(AttributeDescriptor::bool(
                "fail",
                |c: &CountingConfig| Some(AttributeValue::Bool(c.fail)),
                |c: &mut CountingConfig, v| {
                    c.fail = v.as_bool().unwrap_or_default();
                    Ok(())
                },
            ))
            .with(AttributeDescriptor::int(
                "delay",
                |c: &CountingConfig| {
                    Some(AttributeValue::Int(
                        i64::try_from(c.delay_ms).unwrap_or(i64::MAX),
                    ))
                },
                |c: &mut CountingConfig, v| {
                    c.delay_ms = v.to_int("delay")?;
                    Ok(())
                },
            ))
    }
}

/// Factory recording every connection it opens.
#[derive(Clone, Default)]
pub struct CountingFactory {
    attempts: Arc<AtomicUsize>,
    handles: Arc<Mutex<Vec<MockConnectionHandle>>>,
}

impl CountingFactory {
    /// Number of `new_link` calls, failed ones included.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn opened(&self) -> usize {
        self.handles.lock().len()
    }

    pub fn closed(&self) -> usize {
        self.handles.lock().iter().map(|h| h.close_count()).sum()
    }

    pub fn handle(&self, index: usize) -> MockConnectionHandle {
        self.handles.lock()[index].clone()
    }
}

impl LinkFactory for CountingFactory {
    type Config = CountingConfig;

    fn name(&self) -> &str {
        "counting"
    }

    fn new_link(&self, config: CountingConfig) -> BoxFuture<'static, Result<Arc<dyn Link>>> {
        let attempts = Arc::clone(&self.attempts);
        let handles = Arc::clone(&self.handles);
        Box::pin(async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            if config.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(config.delay_ms)).await;
            }
            if config.fail {
                return Err(Error::connection_failed(config.board, "refused"));
            }

            let (connection, handle) = MockConnection::new();
            handles.lock().push(handle);
            let link: Arc<dyn Link> =
                ConnectionBasedLink::new(connection, Arc::new(LineProtocol::new()));
            Ok(link)
        })
    }
}

/// A fresh cache over a manager with the counting factory.
pub fn links() -> (Links, CountingFactory) {
    let factory = CountingFactory::default();
    let manager = LinkManager::builder().register(factory.clone()).build();
    (Links::new(Arc::new(manager)), factory)
}
