//! Reply correlation for messages carrying an id.
//!
//! A [`ResponseAwaiter`] registers a transient listener on the link *before*
//! the message is sent. Replies seen while the id is still unknown are
//! buffered, so a board answering faster than `send` returns is not missed.
//! The listener is removed when the reply arrives, when waiting times out and
//! when the [`PendingReply`] is dropped.
//!
//! # Example
//!
//! ```
//! use boardlink_link::{Link, Links, ResponseAwaiter};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() -> boardlink_core::Result<()> {
//! let link: Arc<dyn Link> = Arc::new(Links::global().get_link("boardlink://virtual").await?);
//! let awaiter = ResponseAwaiter::on_link(Arc::clone(&link)).with_timeout(Duration::from_secs(1));
//!
//! let reply = awaiter
//!     .send(|link| link.switch_digital_pin(13, true))?
//!     .wait()
//!     .await?
//!     .into_result()?;
//! assert!(reply.ok);
//! link.close()?;
//! # Ok(())
//! # }
//! ```

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use boardlink_core::constants::DEFAULT_REPLY_TIMEOUT_MS;
use boardlink_core::{Error, Result};
use boardlink_protocol::{FromDeviceMessage, MessageId, Reply};

use crate::link::Link;
use crate::listener::EventListener;

/// Sends messages and waits for the matching device reply.
#[derive(Clone)]
pub struct ResponseAwaiter {
    link: Arc<dyn Link>,
    timeout: Duration,
}

impl ResponseAwaiter {
    pub fn on_link(link: Arc<dyn Link>) -> Self {
        Self {
            link,
            timeout: Duration::from_millis(DEFAULT_REPLY_TIMEOUT_MS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send through `send_fn` and return a handle on the reply to the id it returns.
    ///
    /// If sending fails the reply listener is removed before the error is returned.
    pub fn send<F>(&self, send_fn: F) -> Result<PendingReply>
    where
        F: FnOnce(&dyn Link) -> Result<MessageId>,
    {
        let registration = self.register()?;
        let id = send_fn(self.link.as_ref())?;
        let receiver = registration.collector.watch_for(id);
        trace!(id, "Awaiting reply");
        Ok(PendingReply {
            id,
            receiver,
            timeout: self.timeout,
            _registration: registration,
        })
    }

    /// Send and wait in one step.
    pub async fn send_and_wait<F>(&self, send_fn: F) -> Result<Reply>
    where
        F: FnOnce(&dyn Link) -> Result<MessageId>,
    {
        self.send(send_fn)?.wait().await
    }

    /// Wait for the reply to a message that was sent elsewhere.
    ///
    /// Only replies arriving after this call are seen.
    pub async fn wait_for_response(&self, id: MessageId) -> Result<Reply> {
        let registration = self.register()?;
        let receiver = registration.collector.watch_for(id);
        PendingReply {
            id,
            receiver,
            timeout: self.timeout,
            _registration: registration,
        }
        .wait()
        .await
    }

    fn register(&self) -> Result<ListenerRegistration> {
        let collector = Arc::new(ReplyCollector::default());
        let listener: Arc<dyn EventListener> = Arc::clone(&collector) as Arc<dyn EventListener>;
        self.link.add_listener(Arc::clone(&listener))?;
        Ok(ListenerRegistration {
            link: Arc::clone(&self.link),
            listener,
            collector,
        })
    }
}

impl fmt::Debug for ResponseAwaiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseAwaiter")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// A reply that may not have arrived yet.
pub struct PendingReply {
    id: MessageId,
    receiver: oneshot::Receiver<Reply>,
    timeout: Duration,
    _registration: ListenerRegistration,
}

impl PendingReply {
    pub fn id(&self) -> MessageId {
        self.id
    }

    /// Wait for the reply, positive or negative.
    ///
    /// Fails with [`Error::ReplyTimeout`] once the timeout elapses. Use
    /// [`Reply::into_result`] to treat a negative reply as an error.
    pub async fn wait(self) -> Result<Reply> {
        let Self {
            id,
            receiver,
            timeout,
            _registration,
        } = self;

        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(reply)) => {
                debug!(id, ok = reply.ok, "Reply received");
                Ok(reply)
            }
            Ok(Err(_)) => Err(Error::LinkClosed),
            Err(_) => {
                warn!(id, "No reply within {}ms", timeout.as_millis());
                Err(Error::ReplyTimeout {
                    id,
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                })
            }
        }
    }
}

impl fmt::Debug for PendingReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingReply")
            .field("id", &self.id)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct CollectorState {
    target: Option<MessageId>,
    buffered: Vec<Reply>,
    sender: Option<oneshot::Sender<Reply>>,
}

/// Transient listener delivering the first reply with the expected id.
#[derive(Default)]
struct ReplyCollector {
    state: Mutex<CollectorState>,
}

impl ReplyCollector {
    /// Fix the expected id and take any reply already buffered for it.
    fn watch_for(&self, id: MessageId) -> oneshot::Receiver<Reply> {
        let (sender, receiver) = oneshot::channel();
        let mut state = self.state.lock();
        let buffered = std::mem::take(&mut state.buffered);
        state.target = Some(id);

        match buffered.into_iter().find(|reply| reply.id == id) {
            Some(reply) => {
                let _ = sender.send(reply);
            }
            None => state.sender = Some(sender),
        }
        receiver
    }
}

impl EventListener for ReplyCollector {
    fn on_event(&self, event: &FromDeviceMessage) {
        let Some(reply) = event.as_reply() else {
            return;
        };

        let mut state = self.state.lock();
        match state.target {
            None => state.buffered.push(reply.clone()),
            Some(id) if id == reply.id => {
                if let Some(sender) = state.sender.take() {
                    let _ = sender.send(reply.clone());
                }
            }
            Some(_) => {}
        }
    }
}

/// Removes the collector from the link on drop.
struct ListenerRegistration {
    link: Arc<dyn Link>,
    listener: Arc<dyn EventListener>,
    collector: Arc<ReplyCollector>,
}

impl Drop for ListenerRegistration {
    fn drop(&mut self) {
        if let Err(e) = self.link.remove_listener(&self.listener) {
            trace!("Reply listener not removed: {}", e);
        }
    }
}
