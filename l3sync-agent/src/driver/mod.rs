//! Device drivers.
//!
//! A driver translates abstract router operations into the configuration
//! language of one device. Exactly one driver instance exists per device and
//! it is owned by that device's `DeviceContext`.

pub mod dry_run;

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{FloatingIp, Port, Route, RouterDescriptor, RouterRecord};

pub use dry_run::DryRunDriver;

/// Driver errors.
///
/// Operation errors are isolated to one router; connectivity errors and
/// timeouts mean the device itself is in trouble.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    #[error("{op} failed: {reason}")]
    Operation { op: String, reason: String },

    #[error("Device unreachable: {0}")]
    Connectivity(String),

    #[error("{0} timed out after {1:?}")]
    Timeout(String, Duration),

    #[error("Internal driver error: {0}")]
    Internal(String),
}

impl DriverError {
    pub fn operation(op: impl Into<String>, reason: impl Into<String>) -> Self {
        DriverError::Operation {
            op: op.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error says the device could not be reached at all.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, DriverError::Connectivity(_) | DriverError::Timeout(..))
    }
}

pub type Result<T> = std::result::Result<T, DriverError>;

/// What is left on the device after invalid configuration was cleaned up.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResidualConfig {
    /// Routers still configured on the device.
    pub routers: BTreeSet<String>,
    /// Routers whose configuration was deleted by the cleanup.
    pub removed: BTreeSet<String>,
}

/// Operations a device driver has to provide.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Cheap liveness check of the device.
    async fn probe(&self) -> Result<()>;

    async fn add_internal_port(&self, router: &RouterRecord, port: &Port) -> Result<()>;

    async fn remove_internal_port(&self, router: &RouterRecord, port: &Port) -> Result<()>;

    async fn add_gateway_port(&self, router: &RouterRecord, port: &Port) -> Result<()>;

    async fn remove_gateway_port(&self, router: &RouterRecord, port: &Port) -> Result<()>;

    /// Make the floating IPs NATed through `gateway` exactly `floating_ips`.
    async fn reconcile_floating_ips(
        &self,
        router: &RouterRecord,
        gateway: &Port,
        floating_ips: &[FloatingIp],
    ) -> Result<()>;

    /// Make the static routes of the router exactly `routes`.
    async fn reconcile_routes(&self, router: &RouterRecord, routes: &[Route]) -> Result<()>;

    /// Delete device configuration that belongs to no desired router.
    ///
    /// Must be idempotent; it runs at the start of every full resync.
    async fn cleanup_invalid_config(&self, desired: &[RouterDescriptor]) -> Result<ResidualConfig>;

    /// Called after cleanup, before a full resync applies anything.
    async fn prepare_full_sync(&self, _residual: &ResidualConfig) -> Result<()> {
        Ok(())
    }

    /// Called when a full resync pass is over.
    async fn clear_full_sync(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(DriverError::Connectivity("netconf session lost".into()).is_connectivity());
        assert!(DriverError::Timeout("probe".into(), Duration::from_secs(5)).is_connectivity());
        assert!(!DriverError::operation("add_internal_port", "vlan in use").is_connectivity());
        assert!(!DriverError::Internal("bad state".into()).is_connectivity());
    }

    #[test]
    fn test_error_display() {
        let e = DriverError::operation("add_gateway_port", "invalid address");
        assert_eq!(e.to_string(), "add_gateway_port failed: invalid address");
    }
}
