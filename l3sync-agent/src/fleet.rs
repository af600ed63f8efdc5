//! FleetCoordinator - drives every managed device on each tick.
//!
//! The coordinator owns one `DeviceContext` per device. Notification handlers
//! only touch the shared `DeviceSignals` of each device; reconciliation itself
//! runs inside one spawned task per device so a failing or panicking device
//! never holds up the others.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::audit::AuditLogger;
use crate::config::AgentConfig;
use crate::control_plane::{ControlPlane, ControlPlaneError};
use crate::pending::DeviceSignals;
use crate::reconciler::{DeviceContext, PassError, PassReport};
use crate::status::{DeviceStatus, FleetStatus};

/// What happened to one device during a tick.
#[derive(Debug)]
pub enum DeviceOutcome {
    /// The pass ran to completion.
    Passed(PassReport),
    /// The pass stopped early; the device flags say how it recovers.
    Failed(PassError),
    /// Skipped: a pass from an earlier tick still holds the device.
    Busy,
    /// The worker panicked; the device is now backlogged and retries with a
    /// full resync on the next tick.
    Panicked,
    /// Still running when the tick budget ran out.
    Unfinished,
}

/// Result of one tick.
#[derive(Debug)]
pub struct TickReport {
    pub control_plane_reachable: bool,
    pub devices: BTreeMap<String, DeviceOutcome>,
}

struct DeviceHandle {
    name: String,
    signals: Arc<DeviceSignals>,
    context: Arc<Mutex<DeviceContext>>,
}

/// Owns the device contexts and fans reconciliation out across them.
pub struct FleetCoordinator {
    devices: Vec<DeviceHandle>,
    control_plane: Arc<dyn ControlPlane>,
    config: AgentConfig,
    audit: AuditLogger,
    control_plane_reachable: AtomicBool,
}

impl FleetCoordinator {
    pub fn new(
        control_plane: Arc<dyn ControlPlane>,
        config: AgentConfig,
        contexts: Vec<DeviceContext>,
    ) -> Self {
        let devices = contexts
            .into_iter()
            .map(|context| DeviceHandle {
                name: context.name().to_string(),
                signals: context.signals(),
                context: Arc::new(Mutex::new(context)),
            })
            .collect();
        Self {
            devices,
            control_plane,
            config,
            audit: AuditLogger::default(),
            control_plane_reachable: AtomicBool::new(true),
        }
    }

    pub fn with_audit(mut self, audit: AuditLogger) -> Self {
        self.audit = audit;
        self
    }

    /// Shared handle to a device context, for inspection.
    pub fn device(&self, name: &str) -> Option<Arc<Mutex<DeviceContext>>> {
        self.devices
            .iter()
            .find(|d| d.name == name)
            .map(|d| Arc::clone(&d.context))
    }

    pub fn signals(&self, name: &str) -> Option<Arc<DeviceSignals>> {
        self.devices
            .iter()
            .find(|d| d.name == name)
            .map(|d| Arc::clone(&d.signals))
    }

    /// Routers changed upstream.
    pub fn routers_updated(&self, router_ids: &[String]) {
        if router_ids.is_empty() {
            return;
        }
        debug!("Routers updated: {:?}", router_ids);
        for device in &self.devices {
            device.signals.pending_updated.extend(router_ids.iter().cloned());
        }
    }

    /// Routers deleted upstream.
    pub fn router_removed(&self, router_ids: &[String]) {
        if router_ids.is_empty() {
            return;
        }
        debug!("Routers removed: {:?}", router_ids);
        for device in &self.devices {
            device.signals.pending_removed.extend(router_ids.iter().cloned());
        }
    }

    /// Routers unscheduled from this agent.
    pub fn router_removed_from_agent(&self, router_ids: &[String]) {
        self.router_removed(router_ids);
    }

    /// Routers scheduled onto this agent.
    pub fn router_added_to_agent(&self, router_ids: &[String]) {
        self.routers_updated(router_ids);
    }

    /// Full resync of every device.
    pub fn resync_requested(&self) {
        info!("Full resync requested for all devices");
        self.audit.resync_requested(self.devices.len());
        self.mark_all_for_full_resync();
    }

    fn mark_all_for_full_resync(&self) {
        for device in &self.devices {
            device.signals.request_full_resync();
        }
    }

    async fn heartbeat(&self) -> Result<(), ControlPlaneError> {
        let limit = self.config.heartbeat_timeout;
        match tokio::time::timeout(limit, self.control_plane.heartbeat(&self.config.host)).await {
            Ok(result) => result,
            Err(_) => Err(ControlPlaneError::Timeout("heartbeat".to_string(), limit)),
        }
    }

    /// Run one tick.
    ///
    /// Notifications carried by the call are merged first. If the control
    /// plane does not answer its heartbeat, every device is marked for full
    /// resync and none is touched.
    pub async fn process_tick(&self, updated_ids: &[String], removed_ids: &[String]) -> TickReport {
        self.routers_updated(updated_ids);
        self.router_removed(removed_ids);

        if let Err(e) = self.heartbeat().await {
            if self.control_plane_reachable.swap(false, Ordering::SeqCst) {
                self.audit.control_plane_lost(&e.to_string());
            }
            warn!("Control plane heartbeat failed, skipping tick: {}", e);
            self.mark_all_for_full_resync();
            return TickReport {
                control_plane_reachable: false,
                devices: BTreeMap::new(),
            };
        }
        if !self.control_plane_reachable.swap(true, Ordering::SeqCst) {
            info!("Control plane reachable again");
        }

        let mut outcomes = BTreeMap::new();
        let mut workers: Vec<(&DeviceHandle, JoinHandle<Result<PassReport, PassError>>)> =
            Vec::new();

        for device in &self.devices {
            let Ok(mut context) = Arc::clone(&device.context).try_lock_owned() else {
                warn!(device = %device.name, "Previous pass still running, skipping");
                outcomes.insert(device.name.clone(), DeviceOutcome::Busy);
                continue;
            };
            let worker = tokio::spawn(async move { context.process_once().await });
            workers.push((device, worker));
        }

        // A worker still running at the deadline is left alone; dropping its
        // JoinHandle detaches it and it reports through the device flags.
        let deadline = Instant::now() + self.config.tick_budget;
        let results = join_all(
            workers
                .into_iter()
                .map(|(device, worker)| async move {
                    (device, tokio::time::timeout_at(deadline, worker).await)
                }),
        )
        .await;

        for (device, result) in results {
            let outcome = match result {
                Ok(Ok(Ok(report))) => DeviceOutcome::Passed(report),
                Ok(Ok(Err(e))) => DeviceOutcome::Failed(e),
                Ok(Err(join_error)) => {
                    error!(device = %device.name, "Device worker died: {}", join_error);
                    self.audit
                        .device_backlogged(&device.name, &join_error.to_string());
                    device.signals.request_full_resync();
                    device.signals.set_backlogged(true);
                    DeviceOutcome::Panicked
                }
                Err(_) => {
                    warn!(
                        device = %device.name,
                        "Pass exceeded the tick budget of {:?}, leaving it running",
                        self.config.tick_budget
                    );
                    DeviceOutcome::Unfinished
                }
            };
            outcomes.insert(device.name.clone(), outcome);
        }

        TickReport {
            control_plane_reachable: true,
            devices: outcomes,
        }
    }

    pub fn status(&self) -> FleetStatus {
        FleetStatus {
            host: self.config.host.clone(),
            control_plane_reachable: self.control_plane_reachable.load(Ordering::SeqCst),
            devices: self
                .devices
                .iter()
                .map(|d| DeviceStatus::collect(&d.name, &d.signals))
                .collect(),
        }
    }
}
