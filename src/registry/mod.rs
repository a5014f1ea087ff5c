//! The application/endpoint registry.

mod application_list;
mod statuses;

pub use application_list::{Application, ApplicationList, ApplicationListBuilder, ConfigError};
pub use statuses::ApplicationStatuses;
