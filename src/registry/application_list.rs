//! The immutable catalog of application definitions.
//!
//! Applications are defined once at startup, either programmatically or
//! from a config file, and shared read-only afterwards. One record per
//! line: `<name> <port> <connector-tag>[,<connector-tag>...]`; `#` starts a
//! comment and blank lines are skipped.

use crate::domain::ports::{ConnectorList, ConnectorRegistry};
use std::collections::HashMap;
use std::io::{self, BufRead};
use std::sync::Arc;
use thiserror::Error;

/// Application-list config errors. Construction aborts on the first error,
/// so no partial list is ever observable.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error reading application config: {0}")]
    Io(#[from] io::Error),
    #[error("line {line}: malformed record, want '<name> <port> <connectors>': {text:?}")]
    Malformed { line: usize, text: String },
    #[error("line {line}: invalid port {text:?}")]
    InvalidPort { line: usize, text: String },
    #[error("line {line}: unknown connector tag {tag:?}")]
    UnknownConnector { line: usize, tag: String },
    #[error("duplicate application port {0}")]
    DuplicatePort(u16),
    #[error("duplicate application name {0:?}")]
    DuplicateName(String),
}

/// One application definition, shared across all hosts.
#[derive(Debug)]
pub struct Application {
    name: String,
    port: u16,
    connectors: ConnectorList,
}

impl Application {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn connectors(&self) -> &ConnectorList {
        &self.connectors
    }
}

struct ListInner {
    by_port: HashMap<u16, Arc<Application>>,
    by_name: HashMap<String, Arc<Application>>,
}

/// All known applications. Cheap to clone, immutable once built.
#[derive(Clone)]
pub struct ApplicationList {
    inner: Arc<ListInner>,
}

impl ApplicationList {
    /// Every application, in no particular order.
    pub fn all(&self) -> Vec<Arc<Application>> {
        self.inner.by_port.values().cloned().collect()
    }

    pub fn by_port(&self, port: u16) -> Option<Arc<Application>> {
        self.inner.by_port.get(&port).cloned()
    }

    pub fn by_name(&self, name: &str) -> Option<Arc<Application>> {
        self.inner.by_name.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.by_port.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.by_port.is_empty()
    }
}

/// Accumulates application definitions, then produces the immutable list.
///
/// The builder is consumed by [`ApplicationListBuilder::build`], so a list
/// can be built exactly once.
#[derive(Default)]
pub struct ApplicationListBuilder {
    by_port: HashMap<u16, Arc<Application>>,
    by_name: HashMap<String, Arc<Application>>,
}

impl ApplicationListBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one application. Ports and names must both be unique.
    pub fn add(
        &mut self,
        port: u16,
        name: impl Into<String>,
        connectors: ConnectorList,
    ) -> Result<(), ConfigError> {
        let name = name.into();
        if self.by_port.contains_key(&port) {
            return Err(ConfigError::DuplicatePort(port));
        }
        if self.by_name.contains_key(&name) {
            return Err(ConfigError::DuplicateName(name));
        }
        let app = Arc::new(Application {
            name: name.clone(),
            port,
            connectors,
        });
        self.by_port.insert(port, app.clone());
        self.by_name.insert(name, app);
        Ok(())
    }

    /// Read application records from `reader`, resolving connector tags
    /// against `connectors`.
    pub fn read_config<R: BufRead>(
        &mut self,
        reader: R,
        connectors: &ConnectorRegistry,
    ) -> Result<(), ConfigError> {
        for (idx, line) in reader.lines().enumerate() {
            let line_no = idx + 1;
            let line = line?;
            let text = match line.split_once('#') {
                Some((before, _)) => before.trim(),
                None => line.trim(),
            };
            if text.is_empty() {
                continue;
            }

            let mut fields = text.split_whitespace();
            let (name, port, tags) = match (fields.next(), fields.next(), fields.next()) {
                (Some(name), Some(port), Some(tags)) if fields.next().is_none() => {
                    (name, port, tags)
                }
                _ => {
                    return Err(ConfigError::Malformed {
                        line: line_no,
                        text: text.to_string(),
                    })
                }
            };

            let port: u16 = match port.parse() {
                Ok(p) if p > 0 => p,
                _ => {
                    return Err(ConfigError::InvalidPort {
                        line: line_no,
                        text: port.to_string(),
                    })
                }
            };

            let mut list = ConnectorList::new();
            for tag in tags.split(',') {
                match connectors.resolve(tag) {
                    Some(c) => list.push(c),
                    None => {
                        return Err(ConfigError::UnknownConnector {
                            line: line_no,
                            tag: tag.to_string(),
                        })
                    }
                }
            }

            self.add(port, name, list)?;
        }
        Ok(())
    }

    /// Produce the immutable list, consuming the builder.
    pub fn build(self) -> ApplicationList {
        ApplicationList {
            inner: Arc::new(ListInner {
                by_port: self.by_port,
                by_name: self.by_name,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::NamedConnector;
    use std::io::Cursor;

    fn registry() -> ConnectorRegistry {
        ConnectorRegistry::with_connectors([NamedConnector::new("tcp"), NamedConnector::new("http")])
    }

    fn tcp() -> ConnectorList {
        vec![NamedConnector::new("tcp")]
    }

    // ===== Builder Tests =====

    #[test]
    fn test_build_and_lookups() {
        let mut b = ApplicationListBuilder::new();
        b.add(80, "web", tcp()).unwrap();
        b.add(5432, "db", tcp()).unwrap();
        let list = b.build();

        assert_eq!(list.len(), 2);
        assert_eq!(list.by_port(80).unwrap().name(), "web");
        assert_eq!(list.by_name("db").unwrap().port(), 5432);
        assert!(list.by_port(22).is_none());
        assert!(list.by_name("cache").is_none());

        let mut names: Vec<String> = list.all().iter().map(|a| a.name().to_string()).collect();
        names.sort();
        assert_eq!(names, vec!["db", "web"]);
    }

    #[test]
    fn test_duplicate_port_rejected() {
        let mut b = ApplicationListBuilder::new();
        b.add(80, "web", tcp()).unwrap();
        let err = b.add(80, "other", tcp()).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicatePort(80)));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut b = ApplicationListBuilder::new();
        b.add(80, "web", tcp()).unwrap();
        let err = b.add(8080, "web", tcp()).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateName(name) if name == "web"));
    }

    // ===== Config Parsing Tests =====

    #[test]
    fn test_read_config() {
        let text = "\
# fleet applications
web 80 tcp

db 5432 tcp,http   # both drivers
";
        let mut b = ApplicationListBuilder::new();
        b.read_config(Cursor::new(text), &registry()).unwrap();
        let list = b.build();

        assert_eq!(list.len(), 2);
        assert_eq!(list.by_name("web").unwrap().port(), 80);
        let db = list.by_name("db").unwrap();
        assert_eq!(db.connectors().len(), 2);
        assert_eq!(db.connectors()[0].kind(), "tcp");
        assert_eq!(db.connectors()[1].kind(), "http");
    }

    #[test]
    fn test_read_config_malformed_line() {
        let mut b = ApplicationListBuilder::new();
        let err = b
            .read_config(Cursor::new("web 80\n"), &registry())
            .unwrap_err();
        assert!(matches!(err, ConfigError::Malformed { line: 1, .. }));
    }

    #[test]
    fn test_read_config_invalid_port() {
        let mut b = ApplicationListBuilder::new();
        for bad in ["web zero tcp\n", "web 0 tcp\n", "web 70000 tcp\n"] {
            let err = b.read_config(Cursor::new(bad), &registry()).unwrap_err();
            assert!(matches!(err, ConfigError::InvalidPort { line: 1, .. }), "{bad:?}");
        }
    }

    #[test]
    fn test_read_config_unknown_connector() {
        let mut b = ApplicationListBuilder::new();
        let err = b
            .read_config(Cursor::new("web 80 snmp\n"), &registry())
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownConnector { line: 1, tag } if tag == "snmp"));
    }

    #[test]
    fn test_read_config_duplicate_is_fatal() {
        let text = "web 80 tcp\nweb2 80 tcp\n";
        let mut b = ApplicationListBuilder::new();
        let err = b.read_config(Cursor::new(text), &registry()).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicatePort(80)));
    }

    #[test]
    fn test_read_config_line_numbers_skip_comments() {
        let text = "# one\n# two\nweb 80 nope\n";
        let mut b = ApplicationListBuilder::new();
        let err = b.read_config(Cursor::new(text), &registry()).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownConnector { line: 3, .. }));
    }
}
