//! fleetmon Library
//!
//! In-memory time-series core for a fleet metrics collector: an
//! application/endpoint registry reconciled against a paged, bounded-memory
//! sample store. This module exposes the components for use in integration
//! tests and as a library.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod adapters;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod registry;
pub mod store;

// Re-export commonly used types
pub use config::load_config;
pub use domain::entities::{
    sort_by_host_and_name, ApplicationStatus, Endpoint, Machine, PollState, PollStatus,
};
pub use domain::ports::{Appender, Collector, Connector, ConnectorRegistry, FleetSource};
pub use domain::value_objects::{MetricId, MetricKind, MetricSample, MetricValue, Record};
pub use registry::{ApplicationList, ApplicationListBuilder, ApplicationStatuses, ConfigError};
pub use store::{PageQueue, Store};
