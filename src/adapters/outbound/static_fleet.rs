//! Static Fleet Source
//!
//! Serves a fixed machine list from configuration. Stands in for the
//! machine-database oracle in small deployments and in tests.

use crate::domain::entities::Machine;
use crate::domain::ports::FleetSource;
use async_trait::async_trait;

/// A fleet source whose membership never changes.
pub struct StaticFleetSource {
    machines: Vec<Machine>,
}

impl StaticFleetSource {
    pub fn new(machines: Vec<Machine>) -> Self {
        Self { machines }
    }

    /// Build from bare hostnames.
    pub fn from_hosts<S: AsRef<str>>(hosts: &[S]) -> Self {
        Self {
            machines: hosts.iter().map(|h| Machine::new(h.as_ref())).collect(),
        }
    }
}

#[async_trait]
impl FleetSource for StaticFleetSource {
    async fn machines(&self) -> anyhow::Result<Vec<Machine>> {
        Ok(self.machines.clone())
    }
}
