//! Fleet membership port.

use crate::domain::entities::Machine;
use async_trait::async_trait;

/// Authoritative source of the current fleet.
///
/// Implementations return the full machine list on every call; the registry
/// reconciles against it with `mark_hosts_active_exclusively`, so a machine
/// missing from one snapshot is treated as having left the fleet.
#[async_trait]
pub trait FleetSource: Send + Sync {
    async fn machines(&self) -> anyhow::Result<Vec<Machine>>;
}
