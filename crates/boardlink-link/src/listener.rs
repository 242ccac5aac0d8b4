//! Event listeners and the listener set shared by links and connections.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

use boardlink_core::{Pin, PinState};
use boardlink_protocol::FromDeviceMessage;

/// Receives events decoded from a board.
///
/// Callbacks run on the connection's reader and must not block.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &FromDeviceMessage);

    /// Restrict delivery to state changes of one pin.
    ///
    /// Adding a listener with a filter to a link starts listening on the pin;
    /// removing it stops listening once no other listener needs the pin.
    fn pin_filter(&self) -> Option<Pin> {
        None
    }
}

/// Listener backed by a closure receiving every event.
///
/// # Example
///
/// ```
/// use boardlink_link::{EventListener, FnListener};
/// use std::sync::Arc;
///
/// let listener: Arc<dyn EventListener> = Arc::new(FnListener::new(|event| {
///     println!("{}", event.name());
/// }));
/// assert!(listener.pin_filter().is_none());
/// ```
pub struct FnListener<F> {
    callback: F,
}

impl<F> FnListener<F>
where
    F: Fn(&FromDeviceMessage) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> EventListener for FnListener<F>
where
    F: Fn(&FromDeviceMessage) + Send + Sync,
{
    fn on_event(&self, event: &FromDeviceMessage) {
        (self.callback)(event)
    }
}

impl<F> fmt::Debug for FnListener<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnListener").finish_non_exhaustive()
    }
}

/// Listener for the state changes of a single pin.
pub struct PinListener<F> {
    pin: Pin,
    callback: F,
}

impl<F> PinListener<F>
where
    F: Fn(PinState) + Send + Sync,
{
    pub fn new(pin: Pin, callback: F) -> Self {
        Self { pin, callback }
    }

    pub fn pin(&self) -> Pin {
        self.pin
    }
}

impl<F> EventListener for PinListener<F>
where
    F: Fn(PinState) + Send + Sync,
{
    fn on_event(&self, event: &FromDeviceMessage) {
        if let Some(state) = event.as_pin_state()
            && state.pin() == self.pin
        {
            (self.callback)(*state)
        }
    }

    fn pin_filter(&self) -> Option<Pin> {
        Some(self.pin)
    }
}

impl<F> fmt::Debug for PinListener<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PinListener")
            .field("pin", &self.pin)
            .finish_non_exhaustive()
    }
}

/// Copy-on-write list of listeners.
///
/// Dispatch iterates over a snapshot, so listeners may add or remove
/// listeners (including themselves) from inside a callback. Listeners are
/// identified by pointer, so the same `Arc` used to add one must be used to
/// remove it.
pub struct ListenerSet<T: ?Sized> {
    listeners: Mutex<Arc<Vec<Arc<T>>>>,
}

impl<T: ?Sized> ListenerSet<T> {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Arc::new(Vec::new())),
        }
    }

    pub fn add(&self, listener: Arc<T>) {
        let mut listeners = self.listeners.lock();
        let mut next = Vec::with_capacity(listeners.len() + 1);
        next.extend(listeners.iter().cloned());
        next.push(listener);
        *listeners = Arc::new(next);
    }

    /// Remove a listener; returns `false` if it was not registered.
    pub fn remove(&self, listener: &Arc<T>) -> bool {
        let mut listeners = self.listeners.lock();
        let Some(pos) = listeners.iter().position(|l| Arc::ptr_eq(l, listener)) else {
            return false;
        };
        let mut next: Vec<Arc<T>> = listeners.iter().cloned().collect();
        next.remove(pos);
        *listeners = Arc::new(next);
        true
    }

    /// The listeners registered right now.
    pub fn snapshot(&self) -> Arc<Vec<Arc<T>>> {
        self.listeners.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        *self.listeners.lock() = Arc::new(Vec::new());
    }
}

impl<T: ?Sized> Default for ListenerSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> fmt::Debug for ListenerSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerSet")
            .field("len", &self.len())
            .finish()
    }
}
