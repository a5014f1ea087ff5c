//! Source connector port.
//!
//! A connector is the driver that knows how to open a metrics session
//! against an endpoint. The core never opens sessions itself; it only keeps
//! connectors attached to application definitions so the poll layer can pick
//! the right driver for each endpoint.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A metrics source driver, identified by its tag.
pub trait Connector: Send + Sync + fmt::Debug {
    /// The tag this connector is registered under in application config.
    fn kind(&self) -> &str;
}

/// The ordered list of connectors an application can be polled with.
pub type ConnectorList = Vec<Arc<dyn Connector>>;

/// A connector that carries only its tag.
///
/// Stands in for drivers whose session logic lives outside the core.
#[derive(Debug)]
pub struct NamedConnector {
    kind: String,
}

impl NamedConnector {
    pub fn new(kind: impl Into<String>) -> Arc<dyn Connector> {
        Arc::new(Self { kind: kind.into() })
    }
}

impl Connector for NamedConnector {
    fn kind(&self) -> &str {
        &self.kind
    }
}

/// Lookup table from connector tag to driver, used when reading
/// application config.
#[derive(Debug, Default)]
pub struct ConnectorRegistry {
    by_tag: HashMap<String, Arc<dyn Connector>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from ready-made connectors.
    pub fn with_connectors(connectors: impl IntoIterator<Item = Arc<dyn Connector>>) -> Self {
        let mut registry = Self::new();
        for c in connectors {
            registry.register(c);
        }
        registry
    }

    /// Register a connector under its own tag, replacing any previous
    /// connector with the same tag.
    pub fn register(&mut self, connector: Arc<dyn Connector>) {
        self.by_tag.insert(connector.kind().to_string(), connector);
    }

    pub fn resolve(&self, tag: &str) -> Option<Arc<dyn Connector>> {
        self.by_tag.get(tag).cloned()
    }
}
