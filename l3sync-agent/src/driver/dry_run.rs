//! Dry-run driver - keeps the device configuration in memory and logs it.
//!
//! Used when no vendor driver is plugged in: the agent then shows exactly
//! which operations it would push without touching a device.

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{Driver, ResidualConfig, Result};
use crate::model::{FloatingIp, Port, Route, RouterDescriptor, RouterRecord};

/// Configuration of one router as the dry-run device holds it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DryRunRouter {
    pub internal_ports: BTreeSet<String>,
    pub gateway_ports: BTreeSet<String>,
    pub floating_ips: BTreeSet<IpAddr>,
    pub routes: Vec<Route>,
}

impl DryRunRouter {
    fn is_empty(&self) -> bool {
        self.internal_ports.is_empty()
            && self.gateway_ports.is_empty()
            && self.floating_ips.is_empty()
            && self.routes.is_empty()
    }
}

/// In-memory driver.
pub struct DryRunDriver {
    device: String,
    routers: Mutex<BTreeMap<String, DryRunRouter>>,
}

impl DryRunDriver {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            routers: Mutex::new(BTreeMap::new()),
        }
    }

    /// Current device configuration.
    pub async fn snapshot(&self) -> BTreeMap<String, DryRunRouter> {
        self.routers.lock().await.clone()
    }

    fn interface(port: &Port) -> &str {
        port.hosting
            .as_ref()
            .map(|h| h.physical_interface.as_str())
            .unwrap_or("-")
    }
}

#[async_trait]
impl Driver for DryRunDriver {
    async fn probe(&self) -> Result<()> {
        debug!(device = %self.device, "probe");
        Ok(())
    }

    async fn add_internal_port(&self, router: &RouterRecord, port: &Port) -> Result<()> {
        info!(
            device = %self.device,
            "[dry-run] {}: add interface {} on {} (vlan {:?})",
            router.router_name(),
            port.id,
            Self::interface(port),
            port.segmentation_id
        );
        let mut routers = self.routers.lock().await;
        routers
            .entry(router.id.clone())
            .or_default()
            .internal_ports
            .insert(port.id.clone());
        Ok(())
    }

    async fn remove_internal_port(&self, router: &RouterRecord, port: &Port) -> Result<()> {
        info!(
            device = %self.device,
            "[dry-run] {}: remove interface {}",
            router.router_name(),
            port.id
        );
        let mut routers = self.routers.lock().await;
        if let Some(r) = routers.get_mut(&router.id) {
            r.internal_ports.remove(&port.id);
        }
        Ok(())
    }

    async fn add_gateway_port(&self, router: &RouterRecord, port: &Port) -> Result<()> {
        info!(
            device = %self.device,
            "[dry-run] {}: add gateway {} on {} (nat {})",
            router.router_name(),
            port.id,
            Self::interface(port),
            router.nat_enabled
        );
        let mut routers = self.routers.lock().await;
        routers
            .entry(router.id.clone())
            .or_default()
            .gateway_ports
            .insert(port.id.clone());
        Ok(())
    }

    async fn remove_gateway_port(&self, router: &RouterRecord, port: &Port) -> Result<()> {
        info!(
            device = %self.device,
            "[dry-run] {}: remove gateway {}",
            router.router_name(),
            port.id
        );
        let mut routers = self.routers.lock().await;
        if let Some(r) = routers.get_mut(&router.id) {
            r.gateway_ports.remove(&port.id);
        }
        Ok(())
    }

    async fn reconcile_floating_ips(
        &self,
        router: &RouterRecord,
        gateway: &Port,
        floating_ips: &[FloatingIp],
    ) -> Result<()> {
        info!(
            device = %self.device,
            "[dry-run] {}: {} floating IPs via {}",
            router.router_name(),
            floating_ips.len(),
            gateway.id
        );
        let mut routers = self.routers.lock().await;
        let entry = routers.entry(router.id.clone()).or_default();
        entry.floating_ips = floating_ips.iter().map(|f| f.floating_ip_address).collect();
        Ok(())
    }

    async fn reconcile_routes(&self, router: &RouterRecord, routes: &[Route]) -> Result<()> {
        info!(
            device = %self.device,
            "[dry-run] {}: {} static routes",
            router.router_name(),
            routes.len()
        );
        let mut routers = self.routers.lock().await;
        let entry = routers.entry(router.id.clone()).or_default();
        entry.routes = routes.to_vec();
        Ok(())
    }

    async fn cleanup_invalid_config(&self, desired: &[RouterDescriptor]) -> Result<ResidualConfig> {
        let desired_ids: BTreeSet<&str> = desired.iter().map(|r| r.id.as_str()).collect();
        let mut routers = self.routers.lock().await;

        let mut residual = ResidualConfig::default();
        routers.retain(|id, config| {
            if desired_ids.contains(id.as_str()) && !config.is_empty() {
                residual.routers.insert(id.clone());
                true
            } else {
                if !config.is_empty() {
                    info!(device = %self.device, "[dry-run] deleting invalid config of router {}", id);
                }
                residual.removed.insert(id.clone());
                false
            }
        });
        Ok(residual)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tracks_ports() {
        let driver = DryRunDriver::new("asr-1");
        let record = RouterRecord::new(RouterDescriptor::new("r1"));

        driver
            .add_internal_port(&record, &Port::new("p1", "n1"))
            .await
            .unwrap();
        driver
            .add_gateway_port(&record, &Port::new("gw", "ext"))
            .await
            .unwrap();
        driver
            .remove_internal_port(&record, &Port::new("p1", "n1"))
            .await
            .unwrap();

        let snapshot = driver.snapshot().await;
        let r1 = &snapshot["r1"];
        assert!(r1.internal_ports.is_empty());
        assert!(r1.gateway_ports.contains("gw"));
    }

    #[tokio::test]
    async fn test_cleanup_removes_unknown_routers() {
        let driver = DryRunDriver::new("asr-1");
        let keep = RouterRecord::new(RouterDescriptor::new("keep"));
        let stale = RouterRecord::new(RouterDescriptor::new("stale"));
        driver
            .add_internal_port(&keep, &Port::new("p1", "n1"))
            .await
            .unwrap();
        driver
            .add_internal_port(&stale, &Port::new("p2", "n1"))
            .await
            .unwrap();

        let residual = driver
            .cleanup_invalid_config(&[RouterDescriptor::new("keep")])
            .await
            .unwrap();

        assert!(residual.routers.contains("keep"));
        assert!(residual.removed.contains("stale"));
        let snapshot = driver.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.contains_key("keep"));
    }
}
