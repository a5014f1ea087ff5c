mod appender;
mod connector;
mod fleet_source;

pub use appender::{Appender, Collector};
pub use connector::{Connector, ConnectorList, ConnectorRegistry, NamedConnector};
pub use fleet_source::FleetSource;
