//! Process-wide link sharing.
//!
//! [`Links`] hands out one link per distinct configuration. Every acquisition
//! returns a [`SharedLink`] handle and counts one usage; closing or dropping
//! the handle releases it, and the real link is closed when the last usage is
//! released.
//!
//! # Locking
//!
//! The entry map is locked only for lookups, inserts and removals. The link
//! itself is built outside the lock in a per-entry async once-cell, so
//! concurrent acquirers of the same key wait for one shared construction and
//! acquirers of other keys are never blocked by it. An entry is removed under
//! the lock in the same step that takes its usage to zero, so no acquirer can
//! obtain a link that is about to be closed.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use boardlink_core::constants::{DEFAULT_FACTORY_NAME, LINK_SCHEME};
use boardlink_core::{Pin, Result};
use boardlink_protocol::{KeyPress, MessageId, Tone};

use crate::config::Configurer;
use crate::link::Link;
use crate::listener::EventListener;
use crate::manager::LinkManager;

/// Identity of a link configuration: factory name plus every attribute value.
///
/// Two configurations are shared only if all rendered values are equal;
/// values that merely resolve to the same device stay distinct.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    factory: String,
    attributes: BTreeMap<String, String>,
}

impl CacheKey {
    pub fn new(factory: impl Into<String>, attributes: BTreeMap<String, String>) -> Self {
        Self {
            factory: factory.into(),
            attributes,
        }
    }

    pub fn factory(&self) -> &str {
        &self.factory
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{LINK_SCHEME}://{}", self.factory)?;
        for (i, (name, value)) in self.attributes.iter().enumerate() {
            let sep = if i == 0 { '?' } else { '&' };
            write!(f, "{sep}{name}={value}")?;
        }
        Ok(())
    }
}

type LinkCell = Arc<OnceCell<Arc<dyn Link>>>;

struct CacheEntry {
    cell: LinkCell,
    usage: usize,
}

#[derive(Default)]
struct CacheState {
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl CacheState {
    fn acquire(&self, key: &CacheKey) -> LinkCell {
        let mut entries = self.entries.lock();
        let entry = entries.entry(key.clone()).or_insert_with(|| CacheEntry {
            cell: Arc::new(OnceCell::new()),
            usage: 0,
        });
        entry.usage += 1;
        Arc::clone(&entry.cell)
    }

    /// Release one usage of the entry owning `cell`.
    fn release(&self, key: &CacheKey, cell: &LinkCell) {
        let to_close = {
            let mut entries = self.entries.lock();
            match entries.get_mut(key) {
                Some(entry) if Arc::ptr_eq(&entry.cell, cell) => {
                    entry.usage = entry.usage.saturating_sub(1);
                    if entry.usage == 0 {
                        entries.remove(key).and_then(|e| e.cell.get().cloned())
                    } else {
                        None
                    }
                }
                _ => None,
            }
        };

        if let Some(link) = to_close {
            debug!(key = %key, "Closing last usage of cached link");
            if let Err(e) = link.close() {
                warn!(key = %key, "Failed to close cached link: {}", e);
            }
        }
    }
}

/// Releases an acquisition whose link was never handed out.
struct AcquireGuard<'a> {
    state: &'a Arc<CacheState>,
    key: &'a CacheKey,
    cell: &'a LinkCell,
    armed: bool,
}

impl Drop for AcquireGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.state.release(self.key, self.cell);
        }
    }
}

static GLOBAL: OnceLock<Links> = OnceLock::new();

/// Cache of shared links.
///
/// # Example
///
/// ```
/// use boardlink_link::{Link, Links};
///
/// # #[tokio::main]
/// # async fn main() -> boardlink_core::Result<()> {
/// let links = Links::global();
/// let first = links.get_link("boardlink://virtual").await?;
/// let second = links.get_link("boardlink://virtual").await?;
/// assert!(first.same_link(&second));
///
/// first.close()?;
/// second.close()?;
/// assert_eq!(links.active_links(), 0);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Links {
    manager: Arc<LinkManager>,
    state: Arc<CacheState>,
}

impl Links {
    pub fn new(manager: Arc<LinkManager>) -> Self {
        Self {
            manager,
            state: Arc::new(CacheState::default()),
        }
    }

    /// The process-wide cache over [`LinkManager::global`].
    pub fn global() -> &'static Links {
        GLOBAL.get_or_init(|| Links::new(LinkManager::global()))
    }

    pub fn manager(&self) -> &Arc<LinkManager> {
        &self.manager
    }

    /// Shared link for a URI.
    pub async fn get_link(&self, uri: &str) -> Result<SharedLink> {
        let configurer = self.manager.get_configurer(uri)?;
        self.get_link_for(configurer.as_ref()).await
    }

    /// Shared link for the `default` factory.
    pub async fn default_link(&self) -> Result<SharedLink> {
        self.get_link(&format!("{LINK_SCHEME}://{DEFAULT_FACTORY_NAME}"))
            .await
    }

    /// Shared link for an already bound configuration.
    pub async fn get_link_for(&self, configurer: &dyn Configurer) -> Result<SharedLink> {
        let key = configurer.cache_key();
        let cell = self.state.acquire(&key);
        let mut guard = AcquireGuard {
            state: &self.state,
            key: &key,
            cell: &cell,
            armed: true,
        };

        let link = cell
            .get_or_try_init(|| configurer.new_link())
            .await?
            .clone();
        guard.armed = false;
        drop(guard);

        debug!(key = %key, "Acquired cached link");
        Ok(SharedLink {
            link,
            key,
            cell,
            state: Arc::clone(&self.state),
            released: AtomicBool::new(false),
        })
    }

    /// Number of distinct links currently cached.
    pub fn active_links(&self) -> usize {
        self.state.entries.lock().len()
    }
}

impl fmt::Debug for Links {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Links")
            .field("active_links", &self.active_links())
            .finish()
    }
}

/// Handle to a cached link.
///
/// Behaves like the underlying link except that [`Link::close`] releases this
/// handle's usage instead of closing the transport. Releasing twice is a
/// no-op; dropping an unreleased handle releases it.
pub struct SharedLink {
    link: Arc<dyn Link>,
    key: CacheKey,
    cell: LinkCell,
    state: Arc<CacheState>,
    released: AtomicBool,
}

impl SharedLink {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// The underlying link shared by every handle of this key.
    pub fn inner(&self) -> &Arc<dyn Link> {
        &self.link
    }

    /// Whether both handles refer to the same underlying link.
    pub fn same_link(&self, other: &SharedLink) -> bool {
        Arc::ptr_eq(&self.link, &other.link)
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    fn release(&self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            self.state.release(&self.key, &self.cell);
        }
    }

    fn live(&self) -> Result<&Arc<dyn Link>> {
        if self.is_released() {
            return Err(boardlink_core::Error::LinkClosed);
        }
        Ok(&self.link)
    }
}

impl Link for SharedLink {
    fn switch_digital_pin(&self, pin: u8, value: bool) -> Result<MessageId> {
        self.live()?.switch_digital_pin(pin, value)
    }

    fn switch_analog_pin(&self, pin: u8, value: u16) -> Result<MessageId> {
        self.live()?.switch_analog_pin(pin, value)
    }

    fn start_listening(&self, pin: Pin) -> Result<MessageId> {
        self.live()?.start_listening(pin)
    }

    fn stop_listening(&self, pin: Pin) -> Result<Option<MessageId>> {
        self.live()?.stop_listening(pin)
    }

    fn send_custom_message(&self, parts: &[&str]) -> Result<MessageId> {
        self.live()?.send_custom_message(parts)
    }

    fn send_tone(&self, tone: Tone) -> Result<MessageId> {
        self.live()?.send_tone(tone)
    }

    fn send_no_tone(&self, pin: u8) -> Result<MessageId> {
        self.live()?.send_no_tone(pin)
    }

    fn send_key_press_event(&self, key: KeyPress) -> Result<MessageId> {
        self.live()?.send_key_press_event(key)
    }

    fn add_listener(&self, listener: Arc<dyn EventListener>) -> Result<()> {
        self.live()?.add_listener(listener)
    }

    fn remove_listener(&self, listener: &Arc<dyn EventListener>) -> Result<()> {
        self.link.remove_listener(listener)
    }

    fn close(&self) -> Result<()> {
        self.release();
        Ok(())
    }
}

impl Drop for SharedLink {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for SharedLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedLink")
            .field("key", &self.key)
            .field("released", &self.is_released())
            .finish()
    }
}
