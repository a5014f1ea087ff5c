//! Value Objects - Immutable domain primitives
//!
//! Value objects are identified by their value rather than identity.
//! They are immutable and can be freely shared.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The kind of a metric, part of its identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MetricKind {
    /// Point-in-time measurement (temperature, queue depth).
    Gauge,
    /// Monotonically increasing count (requests served, bytes sent).
    Counter,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gauge => "gauge",
            Self::Counter => "counter",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Identity of one metric stream: name plus tags plus kind.
///
/// Two samples belong to the same time series exactly when their
/// `MetricId`s are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MetricId {
    pub name: String,
    pub tags: BTreeMap<String, String>,
    pub kind: MetricKind,
}

impl MetricId {
    /// Convenience constructor for an untagged gauge.
    pub fn gauge(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tags: BTreeMap::new(),
            kind: MetricKind::Gauge,
        }
    }

    /// Convenience constructor for an untagged counter.
    pub fn counter(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tags: BTreeMap::new(),
            kind: MetricKind::Counter,
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

impl fmt::Display for MetricId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.tags.is_empty() {
            let tags: Vec<String> = self
                .tags
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            write!(f, "{{{}}}", tags.join(","))?;
        }
        Ok(())
    }
}

/// A stored sample value.
///
/// `Inactive` is the termination marker written when an endpoint leaves the
/// fleet; it lives in the value space so a series needs no side-channel
/// metadata to record its own end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetricValue {
    Number(f64),
    Inactive,
}

impl MetricValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Inactive => None,
        }
    }

    pub fn is_inactive(&self) -> bool {
        matches!(self, Self::Inactive)
    }
}

/// One (timestamp, value) record as produced by range queries.
///
/// Timestamps are seconds since the Unix epoch as an `f64`, the canonical
/// representation throughout the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub timestamp: f64,
    pub value: MetricValue,
}

impl Default for Record {
    fn default() -> Self {
        Self {
            timestamp: 0.0,
            value: MetricValue::Number(0.0),
        }
    }
}

/// One decoded sample as delivered by a poller.
#[derive(Debug, Clone)]
pub struct MetricSample {
    pub id: MetricId,
    pub value: f64,
}

impl MetricSample {
    pub fn new(id: MetricId, value: f64) -> Self {
        Self { id, value }
    }
}
