//! URI driven link configuration.
//!
//! ```text
//! boardlink://tcp?host=192.168.0.10&port=4478&proto=alp
//! └──┬────┘   └┬┘ └──────────────┬──────────────────┘
//!  scheme   factory     attributes, bound in order
//! ```
//!
//! The reserved factory name `default` resolves to the first serial-like
//! factory, or the first registered factory when none is serial-like.

use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};
use url::Url;

use boardlink_core::constants::{DEFAULT_FACTORY_NAME, LINK_SCHEME};
use boardlink_core::{Error, Result};

use crate::config::{Configurer, LinkFactory, RegisteredFactory, Registration};
use crate::virtual_board::VirtualLinkFactory;

static GLOBAL: OnceLock<Arc<LinkManager>> = OnceLock::new();

/// Registry of link factories.
///
/// The process-wide manager is built once and immutable afterwards. Without
/// an explicit [`LinkManager::install`] it only knows the `virtual` factory;
/// transport crates provide an `install` function registering theirs.
pub struct LinkManager {
    factories: Vec<Arc<dyn RegisteredFactory>>,
}

impl LinkManager {
    pub fn builder() -> LinkManagerBuilder {
        LinkManagerBuilder::default()
    }

    /// The process-wide manager.
    pub fn global() -> Arc<LinkManager> {
        Arc::clone(GLOBAL.get_or_init(|| {
            Arc::new(LinkManager::builder().register(VirtualLinkFactory).build())
        }))
    }

    /// Make this manager the process-wide one.
    ///
    /// Fails once the global manager has been installed or used.
    pub fn install(self) -> Result<()> {
        GLOBAL
            .set(Arc::new(self))
            .map_err(|_| Error::AlreadyInstalled("link factory"))
    }

    /// One URI without attributes per registered factory.
    pub fn list_uris(&self) -> Vec<Url> {
        self.factories
            .iter()
            .filter_map(|f| Url::parse(&format!("{LINK_SCHEME}://{}", f.name())).ok())
            .collect()
    }

    pub fn factory_names(&self) -> Vec<&str> {
        self.factories.iter().map(|f| f.name()).collect()
    }

    /// Resolve a URI to a configurer with every query attribute bound.
    ///
    /// Unknown attributes and unconvertible values fail here, before any I/O.
    pub fn get_configurer(&self, uri: &str) -> Result<Box<dyn Configurer>> {
        let url = Url::parse(uri).map_err(|e| Error::InvalidUri {
            uri: uri.to_string(),
            reason: e.to_string(),
        })?;
        self.configurer_for_url(&url)
    }

    pub fn configurer_for_url(&self, url: &Url) -> Result<Box<dyn Configurer>> {
        if url.scheme() != LINK_SCHEME {
            return Err(Error::InvalidUri {
                uri: url.to_string(),
                reason: format!("scheme must be {LINK_SCHEME}"),
            });
        }

        let name = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| Error::InvalidUri {
                uri: url.to_string(),
                reason: "missing factory name".to_string(),
            })?;

        let factory = self.resolve(name).map_err(|e| e.in_uri(url.as_str()))?;
        let mut configurer = factory.configurer();

        for (key, value) in url.query_pairs() {
            configurer
                .set_attribute(&key, &value)
                .map_err(|e| e.in_uri(url.as_str()))?;
        }

        debug!(factory = factory.name(), uri = %url, "Resolved link configuration");
        Ok(configurer)
    }

    fn resolve(&self, name: &str) -> Result<&Arc<dyn RegisteredFactory>> {
        if name == DEFAULT_FACTORY_NAME {
            return self
                .factories
                .iter()
                .find(|f| f.is_serial())
                .or_else(|| self.factories.first())
                .ok_or_else(|| Error::UnknownFactory {
                    name: name.to_string(),
                });
        }

        self.factories
            .iter()
            .find(|f| f.name() == name)
            .ok_or_else(|| Error::UnknownFactory {
                name: name.to_string(),
            })
    }
}

impl fmt::Debug for LinkManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkManager")
            .field("factories", &self.factory_names())
            .finish()
    }
}

/// Builder for [`LinkManager`].
#[derive(Default)]
pub struct LinkManagerBuilder {
    factories: Vec<Arc<dyn RegisteredFactory>>,
}

impl LinkManagerBuilder {
    /// Register a factory; its attribute table is built here, once.
    ///
    /// A factory whose name is already registered is ignored.
    pub fn register<F: LinkFactory>(mut self, factory: F) -> Self {
        if self.factories.iter().any(|f| f.name() == factory.name()) {
            warn!(
                factory = factory.name(),
                "Link factory already registered, keeping the first one"
            );
            return self;
        }
        if factory.name() == DEFAULT_FACTORY_NAME {
            warn!("Link factory name {DEFAULT_FACTORY_NAME} is reserved, ignoring");
            return self;
        }
        self.factories.push(Arc::new(Registration::new(factory)));
        self
    }

    pub fn build(self) -> LinkManager {
        LinkManager {
            factories: self.factories,
        }
    }
}
