//! Domain Entities - Core business objects
//!
//! These entities represent the fleet as the collector sees it: machines
//! reported by the fleet oracle, the endpoints derived from them, and the
//! per-endpoint polling status the registry maintains.

use chrono::{DateTime, Local, Utc};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

/// Stable identity of one (host, port) polling target.
///
/// An endpoint is created by the registry the first time a (host,
/// application) pair is observed active and is never mutated afterwards.
/// Equality and hashing are by identity: two endpoints compare equal only
/// when they are the same underlying allocation, so a clone shares identity
/// with its original while a second endpoint for the same host and port does
/// not.
#[derive(Debug, Clone)]
pub struct Endpoint(Arc<EndpointInner>);

#[derive(Debug)]
struct EndpointInner {
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self(Arc::new(EndpointInner {
            host: host.into(),
            port,
        }))
    }

    pub fn host(&self) -> &str {
        &self.0.host
    }

    pub fn port(&self) -> u16 {
        self.0.port
    }
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Endpoint {}

impl Hash for Endpoint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as usize).hash(state);
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.0.host, self.0.port)
    }
}

impl Serialize for Endpoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("Endpoint", 2)?;
        s.serialize_field("host", &self.0.host)?;
        s.serialize_field("port", &self.0.port)?;
        s.end()
    }
}

/// One machine as reported by the fleet oracle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Machine {
    pub hostname: String,
    /// Cloud instance id, when the machine has one.
    pub instance_id: Option<String>,
}

impl Machine {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            instance_id: None,
        }
    }

    pub fn with_instance_id(mut self, id: impl Into<String>) -> Self {
        self.instance_id = Some(id.into());
        self
    }
}

/// Where an endpoint currently is in its poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PollStatus {
    Unknown,
    WaitingToConnect,
    Connecting,
    WaitingToPoll,
    Polling,
    Synced,
    FailedToConnect,
    FailedToPoll,
}

impl PollStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::WaitingToConnect => "waiting to connect",
            Self::Connecting => "connecting",
            Self::WaitingToPoll => "waiting to poll",
            Self::Polling => "polling",
            Self::Synced => "synced",
            Self::FailedToConnect => "failed to connect",
            Self::FailedToPoll => "failed to poll",
        }
    }

    /// True for the two terminal failure states.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::FailedToConnect | Self::FailedToPoll)
    }
}

impl fmt::Display for PollStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A poller's report of one state transition for one endpoint.
///
/// The bookkeeping fields only take effect when `status` is
/// [`PollStatus::Synced`], which marks a completed read.
#[derive(Debug, Clone)]
pub struct PollState {
    pub status: PollStatus,
    /// When the transition happened.
    pub timestamp: DateTime<Utc>,
    /// Wall-clock cost of the poll that just finished.
    pub poll_duration: Duration,
    /// Number of metrics seen in the poll that just finished.
    pub metric_count: usize,
}

impl PollState {
    pub fn new(status: PollStatus) -> Self {
        Self {
            status,
            timestamp: Utc::now(),
            poll_duration: Duration::ZERO,
            metric_count: 0,
        }
    }

    pub fn synced(timestamp: DateTime<Utc>, poll_duration: Duration, metric_count: usize) -> Self {
        Self {
            status: PollStatus::Synced,
            timestamp,
            poll_duration,
            metric_count,
        }
    }
}

/// Mutable per-endpoint record maintained by the registry.
///
/// The registry keeps the master copy and hands clones to callers, so a
/// snapshot is never invalidated by concurrent polling.
#[derive(Debug, Clone, Serialize)]
pub struct ApplicationStatus {
    pub endpoint: Endpoint,
    /// Name of the application this endpoint serves.
    pub name: String,
    pub status: PollStatus,
    /// True while the endpoint's machine is in the active fleet.
    pub active: bool,
    /// None means no successful read yet.
    pub last_read_time: Option<DateTime<Utc>>,
    /// Duration of the last successful poll.
    pub poll_duration: Option<Duration>,
    /// Last error reported by the poll layer, cleared on recovery.
    pub last_error: Option<String>,
    pub last_error_time: Option<DateTime<Utc>>,
    /// Metric count observed on the most recent completed read.
    pub initial_metric_count: usize,
    /// True while the endpoint is failing its polls.
    pub down: bool,
    /// Cloud instance id of the endpoint's machine, when known.
    pub instance_id: Option<String>,

    pub(crate) changed_metrics_sum: u64,
    pub(crate) changed_metrics_count: u64,
}

impl ApplicationStatus {
    pub fn new(endpoint: Endpoint, name: impl Into<String>, instance_id: Option<String>) -> Self {
        Self {
            endpoint,
            name: name.into(),
            status: PollStatus::Unknown,
            active: true,
            last_read_time: None,
            poll_duration: None,
            last_error: None,
            last_error_time: None,
            initial_metric_count: 0,
            down: false,
            instance_id,
            changed_metrics_sum: 0,
            changed_metrics_count: 0,
        }
    }

    /// Last error time rendered as `YYYY-MM-DDTHH:MM:SS` in local time, or
    /// an empty string when no error is recorded.
    pub fn last_error_time_str(&self) -> String {
        match self.last_error_time {
            Some(t) => t
                .with_timezone(&Local)
                .format("%Y-%m-%dT%H:%M:%S")
                .to_string(),
            None => String::new(),
        }
    }

    /// Mean number of metrics that changed value per poll cycle.
    pub fn average_changed_metrics(&self) -> f64 {
        if self.changed_metrics_count == 0 {
            return 0.0;
        }
        self.changed_metrics_sum as f64 / self.changed_metrics_count as f64
    }

    /// Elapsed time since the last successful read, or None when no read
    /// has happened yet.
    pub fn staleness(&self) -> Option<Duration> {
        let last = self.last_read_time?;
        (Utc::now() - last).to_std().ok()
    }
}

/// Sort statuses by hostname, then by application name, ascending.
pub fn sort_by_host_and_name(list: &mut [ApplicationStatus]) {
    list.sort_by(|a, b| {
        a.endpoint
            .host()
            .cmp(b.endpoint.host())
            .then_with(|| a.name.cmp(&b.name))
    });
}
