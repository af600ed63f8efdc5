//! Router removal.

use tracing::{info, warn};

use super::router::DriverOps;
use crate::audit::AuditLogger;
use crate::driver::DriverError;
use crate::model::RouterRecord;
use crate::retry::{RetryError, RetryPolicy};

/// Remove everything applied for `record` from the device.
///
/// Each resource is retried on its own under `policy`; a resource that still
/// fails is abandoned and teardown carries on with the next one. Applied
/// fields are cleared before the first attempt. Returns the abandoned
/// resources.
pub(super) async fn teardown_router(
    ops: &DriverOps<'_>,
    policy: &RetryPolicy,
    audit: &AuditLogger,
    record: &mut RouterRecord,
) -> Vec<String> {
    info!(device = %ops.device, "Removing router {}", record.id);
    let mut abandoned = Vec::new();
    let mut give_up = |what: String, err: RetryError<DriverError>| {
        let RetryError::Exhausted { attempts, last } = err;
        warn!(device = %ops.device, "Failed to remove {} of router {}: {}", what, record.id, last);
        audit.deletion_abandoned(ops.device, &record.id, &what, attempts);
        abandoned.push(what);
    };

    let floating_ips = std::mem::take(&mut record.applied_floating_ips);
    if let Some(gateway) = record.applied_gateway_port.clone() {
        if !floating_ips.is_empty() {
            let what = format!("floating IPs via {}", gateway.id);
            let current = &*record;
            let gateway = &gateway;
            if let Err(e) = policy
                .run(&what, move || ops.reconcile_floating_ips(current, gateway, &[]))
                .await
            {
                give_up(what, e);
            }
        }
    }

    let routes = std::mem::take(&mut record.applied_routes);
    if !routes.is_empty() {
        let what = "routes".to_string();
        let current = &*record;
        if let Err(e) = policy
            .run(&what, move || ops.reconcile_routes(current, &[]))
            .await
        {
            give_up(what, e);
        }
    }

    for port in std::mem::take(&mut record.applied_gateway_ports) {
        let what = format!("gateway port {}", port.id);
        let current = &*record;
        let port = &port;
        if let Err(e) = policy
            .run(&what, move || ops.remove_gateway_port(current, port))
            .await
        {
            give_up(what, e);
        }
    }

    for port in std::mem::take(&mut record.applied_internal_ports) {
        let what = format!("internal port {}", port.id);
        let current = &*record;
        let port = &port;
        if let Err(e) = policy
            .run(&what, move || ops.remove_internal_port(current, port))
            .await
        {
            give_up(what, e);
        }
    }

    record.applied_gateway_port = None;
    abandoned
}
