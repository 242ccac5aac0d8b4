//! Link factories and configurers.
//!
//! A [`LinkFactory`] turns a typed configuration into a link. The
//! configuration type implements [`LinkConfig`], which publishes its
//! [`AttributeTable`]. Once a factory is registered in a
//! [`LinkManager`](crate::LinkManager), callers only see the object-safe
//! [`Configurer`], so one generic code path can configure every transport.

use futures::future::BoxFuture;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use boardlink_core::Result;

use crate::attribute::{AttributeInfo, AttributeTable, AttributeValue};
use crate::cache::CacheKey;
use crate::link::Link;

/// Configuration of one kind of link.
pub trait LinkConfig: Default + Clone + Send + Sync + 'static {
    /// The attributes of this configuration, in presentation order.
    fn attributes() -> AttributeTable<Self>;
}

/// Creates links of one kind, registered under a unique name.
pub trait LinkFactory: Send + Sync + 'static {
    type Config: LinkConfig;

    fn name(&self) -> &str;

    /// Serial-like factories are preferred when resolving the `default` factory name.
    fn is_serial(&self) -> bool {
        false
    }

    /// Open the transport and build the link.
    ///
    /// Any transport resource opened before a failure must be released
    /// before the error is returned.
    fn new_link(&self, config: Self::Config) -> BoxFuture<'static, Result<Arc<dyn Link>>>;
}

/// A bound configuration that can create a link.
pub trait Configurer: Send + Sync {
    fn factory_name(&self) -> &str;

    fn attribute_names(&self) -> Vec<&'static str>;

    /// Current value, kind, description and choices of an attribute.
    fn attribute(&self, name: &str) -> Result<AttributeInfo>;

    /// Parse and bind the textual form of a value.
    fn set_attribute(&mut self, name: &str, value: &str) -> Result<()>;

    fn set_value(&mut self, name: &str, value: AttributeValue) -> Result<()>;

    /// Identity of this configuration in the link cache.
    fn cache_key(&self) -> CacheKey;

    /// Fail if a required attribute has no value.
    fn check_required(&self) -> Result<()>;

    /// Create a link. Required attributes are checked before any I/O.
    ///
    /// Binding attributes never reports a missing required attribute: that
    /// check happens here, so a configurer can be bound incrementally and
    /// introspected before it is complete.
    fn new_link(&self) -> BoxFuture<'static, Result<Arc<dyn Link>>>;
}

/// Object-safe view of a registered factory.
pub(crate) trait RegisteredFactory: Send + Sync {
    fn name(&self) -> &str;

    fn is_serial(&self) -> bool;

    fn configurer(&self) -> Box<dyn Configurer>;
}

/// A factory together with the attribute table built at registration.
pub(crate) struct Registration<F: LinkFactory> {
    factory: Arc<F>,
    table: Arc<AttributeTable<F::Config>>,
}

impl<F: LinkFactory> Registration<F> {
    pub(crate) fn new(factory: F) -> Self {
        Self {
            factory: Arc::new(factory),
            table: Arc::new(F::Config::attributes()),
        }
    }
}

impl<F: LinkFactory> RegisteredFactory for Registration<F> {
    fn name(&self) -> &str {
        self.factory.name()
    }

    fn is_serial(&self) -> bool {
        self.factory.is_serial()
    }

    fn configurer(&self) -> Box<dyn Configurer> {
        Box::new(BoundConfigurer {
            factory: Arc::clone(&self.factory),
            table: Arc::clone(&self.table),
            config: F::Config::default(),
        })
    }
}

/// [`Configurer`] over a concrete factory and configuration.
struct BoundConfigurer<F: LinkFactory> {
    factory: Arc<F>,
    table: Arc<AttributeTable<F::Config>>,
    config: F::Config,
}

impl<F: LinkFactory> Configurer for BoundConfigurer<F> {
    fn factory_name(&self) -> &str {
        self.factory.name()
    }

    fn attribute_names(&self) -> Vec<&'static str> {
        self.table.names()
    }

    fn attribute(&self, name: &str) -> Result<AttributeInfo> {
        self.table.info(&self.config, self.factory.name(), name)
    }

    fn set_attribute(&mut self, name: &str, value: &str) -> Result<()> {
        self.table
            .set_from_str(&mut self.config, self.factory.name(), name, value)
    }

    fn set_value(&mut self, name: &str, value: AttributeValue) -> Result<()> {
        self.table
            .set_value(&mut self.config, self.factory.name(), name, value)
    }

    fn cache_key(&self) -> CacheKey {
        let attributes: BTreeMap<String, String> = self
            .table
            .iter()
            .filter_map(|d| Some((d.name().to_string(), d.value(&self.config)?.to_string())))
            .collect();
        CacheKey::new(self.factory.name(), attributes)
    }

    fn check_required(&self) -> Result<()> {
        self.table.check_required(&self.config, self.factory.name())
    }

    fn new_link(&self) -> BoxFuture<'static, Result<Arc<dyn Link>>> {
        if let Err(e) = self.check_required() {
            return Box::pin(futures::future::ready(Err(e)));
        }
        debug!(factory = self.factory.name(), "Creating link");
        self.factory.new_link(self.config.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::AttributeDescriptor;
    use crate::{ConnectionBasedLink, MockConnection};
    use boardlink_core::Error;
    use boardlink_protocol::LineProtocol;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, Default)]
    struct EchoConfig {
        name: Option<String>,
        level: i64,
    }

    impl LinkConfig for EchoConfig {
        fn attributes() -> AttributeTable<Self> {
            AttributeTable::new()
                .with(
                    AttributeDescriptor::string(
                        "name",
                        |c: &EchoConfig| c.name.clone().map(AttributeValue::String),
                        |c: &mut EchoConfig, v| {
                            c.name = Some(v.into_string());
                            Ok(())
                        },
                    )
                    .required(),
                )
                .with(AttributeDescriptor::int(
                    "level",
                    |c: &EchoConfig| Some(AttributeValue::Int(c.level)),
                    |c: &mut EchoConfig, v| {
                        c.level = v.to_int("level")?;
                        Ok(())
                    },
                ))
        }
    }

    struct EchoFactory {
        opened: Arc<AtomicUsize>,
    }

    impl LinkFactory for EchoFactory {
        type Config = EchoConfig;

        fn name(&self) -> &str {
            "echo"
        }

        fn new_link(&self, _config: EchoConfig) -> BoxFuture<'static, Result<Arc<dyn Link>>> {
            let opened = Arc::clone(&self.opened);
            Box::pin(async move {
                opened.fetch_add(1, Ordering::SeqCst);
                let (connection, _handle) = MockConnection::new();
                let link: Arc<dyn Link> =
                    ConnectionBasedLink::new(connection, Arc::new(LineProtocol::new()));
                Ok(link)
            })
        }
    }

    fn configurer() -> (Box<dyn Configurer>, Arc<AtomicUsize>) {
        let opened = Arc::new(AtomicUsize::new(0));
        let registration = Registration::new(EchoFactory {
            opened: Arc::clone(&opened),
        });
        (registration.configurer(), opened)
    }

    #[tokio::test]
    async fn test_missing_required_fails_before_factory() {
        let (configurer, opened) = configurer();

        let err = configurer.new_link().await.err().unwrap();
        assert!(matches!(err, Error::MissingAttribute { ref name, .. } if name == "name"));
        assert_eq!(opened.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_bound_configurer_creates_link() {
        let (mut configurer, opened) = configurer();
        configurer.set_attribute("name", "board").unwrap();

        let link = configurer.new_link().await.unwrap();
        assert_eq!(opened.load(Ordering::SeqCst), 1);
        link.close().unwrap();
    }

    #[test]
    fn test_cache_key_contains_all_values() {
        let (mut configurer, _) = configurer();
        configurer.set_attribute("name", "board").unwrap();

        let key = configurer.cache_key();
        assert_eq!(key.factory(), "echo");
        assert_eq!(key.attribute("name"), Some("board"));
        assert_eq!(key.attribute("level"), Some("0"));
    }

    #[test]
    fn test_attribute_introspection() {
        let (configurer, _) = configurer();
        assert_eq!(configurer.factory_name(), "echo");
        assert_eq!(configurer.attribute_names(), vec!["name", "level"]);

        let level = configurer.attribute("level").unwrap();
        assert_eq!(level.value, Some(AttributeValue::Int(0)));
        assert!(configurer.attribute("missing").is_err());
    }
}
