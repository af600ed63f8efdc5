//! Per-router diff and apply.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::config::InterfaceMap;
use crate::driver::{Driver, DriverError, Result};
use crate::model::{diff_ports, FloatingIp, HostingInfo, Port, PortDiff, Route, RouterRecord};

/// Run a driver call under a deadline. An elapsed deadline is a connectivity error.
pub(crate) async fn with_timeout<T, F>(what: &str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(DriverError::Timeout(what.to_string(), limit)),
    }
}

/// Driver access for one device: timeouts and interface binding applied.
pub(super) struct DriverOps<'a> {
    pub device: &'a str,
    pub driver: &'a dyn Driver,
    pub op_timeout: Duration,
    pub interfaces: &'a InterfaceMap,
}

impl DriverOps<'_> {
    /// Attach the physical interface the port lands on.
    ///
    /// Without an interface map the driver is left to place the port itself.
    pub fn bind(&self, mut port: Port, external: bool) -> Result<Port> {
        if self.interfaces.is_empty() {
            return Ok(port);
        }
        let interface = self
            .interfaces
            .resolve(&port.network_id, external)
            .ok_or_else(|| {
                DriverError::operation(
                    "resolve interface",
                    format!(
                        "no {} interface on {} for network {}",
                        if external { "external" } else { "internal" },
                        self.device,
                        port.network_id
                    ),
                )
            })?;
        port.hosting = Some(HostingInfo {
            physical_interface: interface.to_string(),
            segmentation_id: port.segmentation_id,
        });
        Ok(port)
    }

    pub async fn add_internal_port(&self, router: &RouterRecord, port: &Port) -> Result<()> {
        debug!(device = %self.device, router = %router.id, port = %port.id, "add internal port");
        with_timeout(
            "add_internal_port",
            self.op_timeout,
            self.driver.add_internal_port(router, port),
        )
        .await
    }

    pub async fn remove_internal_port(&self, router: &RouterRecord, port: &Port) -> Result<()> {
        debug!(device = %self.device, router = %router.id, port = %port.id, "remove internal port");
        with_timeout(
            "remove_internal_port",
            self.op_timeout,
            self.driver.remove_internal_port(router, port),
        )
        .await
    }

    pub async fn add_gateway_port(&self, router: &RouterRecord, port: &Port) -> Result<()> {
        debug!(device = %self.device, router = %router.id, port = %port.id, "add gateway port");
        with_timeout(
            "add_gateway_port",
            self.op_timeout,
            self.driver.add_gateway_port(router, port),
        )
        .await
    }

    pub async fn remove_gateway_port(&self, router: &RouterRecord, port: &Port) -> Result<()> {
        debug!(device = %self.device, router = %router.id, port = %port.id, "remove gateway port");
        with_timeout(
            "remove_gateway_port",
            self.op_timeout,
            self.driver.remove_gateway_port(router, port),
        )
        .await
    }

    pub async fn reconcile_floating_ips(
        &self,
        router: &RouterRecord,
        gateway: &Port,
        floating_ips: &[FloatingIp],
    ) -> Result<()> {
        debug!(
            device = %self.device,
            router = %router.id,
            "reconcile {} floating IPs",
            floating_ips.len()
        );
        with_timeout(
            "reconcile_floating_ips",
            self.op_timeout,
            self.driver.reconcile_floating_ips(router, gateway, floating_ips),
        )
        .await
    }

    pub async fn reconcile_routes(&self, router: &RouterRecord, routes: &[Route]) -> Result<()> {
        debug!(
            device = %self.device,
            router = %router.id,
            "reconcile {} routes",
            routes.len()
        );
        with_timeout(
            "reconcile_routes",
            self.op_timeout,
            self.driver.reconcile_routes(router, routes),
        )
        .await
    }
}

/// Port changes for one router.
#[derive(Debug, Default)]
pub(super) struct RouterPlan {
    pub internal: PortDiff,
    pub gateway: PortDiff,
}

/// Work out the port changes for a record whose desired state is already set.
///
/// A full resync adds every desired port as if nothing were applied, but still
/// removes the applied ports that are no longer desired.
pub(super) fn plan_router(record: &RouterRecord, full_resync: bool) -> RouterPlan {
    let plan = |applied: &[Port], desired: &[Port]| {
        let mut diff = diff_ports(applied, desired);
        if full_resync {
            diff.added = diff_ports(&[], desired).added;
        }
        diff
    };
    RouterPlan {
        internal: plan(&record.applied_internal_ports, &record.desired.interfaces),
        gateway: plan(&record.applied_gateway_ports, &record.desired.gw_ports),
    }
}

/// Insert or replace a port, keeping first-applied order.
fn upsert_port(ports: &mut Vec<Port>, port: Port) {
    match ports.iter_mut().find(|p| p.id == port.id) {
        Some(existing) => *existing = port,
        None => ports.push(port),
    }
}

/// Apply the desired state of `record` to the device.
///
/// Order: add internal ports, remove internal ports, release floating IPs
/// from a gateway that is going away, add gateway ports, remove gateway
/// ports, floating IPs, routes. Applied fields are updated as
/// calls succeed, so a failure part-way leaves an accurate record behind.
pub(super) async fn apply_router(
    ops: &DriverOps<'_>,
    record: &mut RouterRecord,
    full_resync: bool,
) -> Result<()> {
    let plan = plan_router(record, full_resync);

    for port in plan.internal.added {
        let port = ops.bind(port, false)?;
        ops.add_internal_port(record, &port).await?;
        upsert_port(&mut record.applied_internal_ports, port);
    }

    for port in plan.internal.removed {
        record.applied_internal_ports.retain(|p| p.id != port.id);
        ops.remove_internal_port(record, &port).await?;
    }

    if let Some(old) = record.applied_gateway_port.clone() {
        let kept = record
            .desired
            .gw_port
            .as_ref()
            .is_some_and(|gw| gw.id == old.id);
        if !kept {
            if !record.applied_floating_ips.is_empty() {
                ops.reconcile_floating_ips(record, &old, &[]).await?;
                record.applied_floating_ips.clear();
            }
            record.applied_gateway_port = None;
        }
    }

    for port in plan.gateway.added {
        let port = ops.bind(port, true)?;
        ops.add_gateway_port(record, &port).await?;
        upsert_port(&mut record.applied_gateway_ports, port);
    }

    for port in plan.gateway.removed {
        record.applied_gateway_ports.retain(|p| p.id != port.id);
        ops.remove_gateway_port(record, &port).await?;
    }

    let Some(gateway) = record.desired.gw_port.clone() else {
        debug!(device = %ops.device, router = %record.id, "no gateway port, skipping floating IPs and routes");
        record.applied_gateway_port = None;
        return Ok(());
    };

    // Prefer the bound copy if the gateway was applied as a redundancy port.
    let gateway = record
        .applied_gateway_ports
        .iter()
        .find(|p| p.id == gateway.id)
        .cloned()
        .unwrap_or(gateway);

    let gateway_changed = record
        .applied_gateway_port
        .as_ref()
        .map_or(true, |applied| applied.id != gateway.id);

    if full_resync
        || gateway_changed
        || record.applied_floating_ips != record.desired.floating_ips
    {
        let floating_ips = record.desired.floating_ips.clone();
        ops.reconcile_floating_ips(record, &gateway, &floating_ips).await?;
        record.applied_floating_ips = floating_ips;
    }
    record.applied_gateway_port = Some(gateway);

    if full_resync || gateway_changed || record.applied_routes != record.desired.routes {
        let routes = record.desired.routes.clone();
        ops.reconcile_routes(record, &routes).await?;
        record.applied_routes = routes;
    }

    Ok(())
}
