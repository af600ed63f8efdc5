//! DeviceContext - reconciliation state of one device.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::router::{apply_router, with_timeout, DriverOps};
use super::teardown::teardown_router;
use crate::audit::AuditLogger;
use crate::config::{AgentConfig, InterfaceMap};
use crate::control_plane::{ControlPlane, ControlPlaneError, FetchScope};
use crate::driver::{Driver, DriverError};
use crate::model::{order_global_last, RouterDescriptor, RouterRecord};
use crate::pending::DeviceSignals;
use crate::status::{PassSummary, SyncMode};

/// Why a pass did not complete.
#[derive(Debug, Error)]
pub enum PassError {
    #[error("Device unreachable: {0}")]
    Unreachable(DriverError),

    #[error("Control plane error: {0}")]
    ControlPlane(#[from] ControlPlaneError),

    #[error("Unexpected error: {0}")]
    Internal(String),
}

impl PassError {
    /// Map a driver error raised outside per-router processing.
    fn from_driver(e: DriverError) -> Self {
        if e.is_connectivity() {
            PassError::Unreachable(e)
        } else {
            PassError::Internal(e.to_string())
        }
    }
}

/// What a completed pass did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassReport {
    pub mode: SyncMode,
    /// Routers whose desired state was applied.
    pub processed: Vec<String>,
    /// Routers seen for the first time.
    pub added: Vec<String>,
    /// Routers torn down and forgotten.
    pub removed: Vec<String>,
    /// Admin-down routers left untouched.
    pub skipped: Vec<String>,
    /// Routers that hit an operation error and were re-queued.
    pub failed_routers: Vec<String>,
    /// Removed routers with at least one abandoned deletion.
    pub failed_deletions: Vec<String>,
}

impl PassReport {
    fn new(mode: SyncMode) -> Self {
        Self {
            mode,
            processed: Vec::new(),
            added: Vec::new(),
            removed: Vec::new(),
            skipped: Vec::new(),
            failed_routers: Vec::new(),
            failed_deletions: Vec::new(),
        }
    }
}

/// Reconciliation state and driver of one device.
///
/// The context is the only writer of its router map. Notification handlers
/// reach it exclusively through the shared `DeviceSignals`.
pub struct DeviceContext {
    name: String,
    driver: Box<dyn Driver>,
    control_plane: Arc<dyn ControlPlane>,
    interfaces: InterfaceMap,
    config: AgentConfig,
    audit: AuditLogger,
    signals: Arc<DeviceSignals>,
    routers: HashMap<String, RouterRecord>,
}

impl DeviceContext {
    /// New context. It starts in full resync.
    pub fn new(
        name: impl Into<String>,
        driver: Box<dyn Driver>,
        control_plane: Arc<dyn ControlPlane>,
        config: AgentConfig,
    ) -> Self {
        Self {
            name: name.into(),
            driver,
            control_plane,
            interfaces: InterfaceMap::default(),
            config,
            audit: AuditLogger::default(),
            signals: Arc::new(DeviceSignals::new()),
            routers: HashMap::new(),
        }
    }

    pub fn with_interfaces(mut self, interfaces: InterfaceMap) -> Self {
        self.interfaces = interfaces;
        self
    }

    pub fn with_audit(mut self, audit: AuditLogger) -> Self {
        self.audit = audit;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signals(&self) -> Arc<DeviceSignals> {
        Arc::clone(&self.signals)
    }

    pub fn routers(&self) -> &HashMap<String, RouterRecord> {
        &self.routers
    }

    pub fn router(&self, id: &str) -> Option<&RouterRecord> {
        self.routers.get(id)
    }

    /// Run one reconciliation pass.
    ///
    /// Never panics on device or control-plane trouble: failures are folded
    /// into the flags (full resync, backlogged) and returned for reporting.
    /// A backlogged device always runs a full resync; the first one that
    /// completes clears the backlog.
    pub async fn process_once(&mut self) -> Result<PassReport, PassError> {
        let result = self.run_pass().await;

        self.signals.set_router_count(self.routers.len());
        self.signals.record_pass(summarize(&result));
        result
    }

    async fn run_pass(&mut self) -> Result<PassReport, PassError> {
        if let Err(e) = with_timeout(
            "probe",
            self.config.probe_timeout,
            self.driver.probe(),
        )
        .await
        {
            warn!(device = %self.name, "Probe failed: {}", e);
            self.audit.device_unreachable(&self.name, &e.to_string());
            self.signals.request_full_resync();
            return Err(PassError::Unreachable(e));
        }

        // Cleared up front so a resync requested while this pass runs survives it.
        let backlogged = self.signals.is_backlogged();
        let full_resync = self.signals.take_full_resync() || backlogged;
        if backlogged {
            info!(device = %self.name, "Device backlogged, retrying with a full resync");
        }
        let result = if full_resync {
            self.full_resync().await
        } else {
            self.incremental().await
        };

        match &result {
            Ok(report) => {
                if backlogged {
                    info!(device = %self.name, "Device recovered from backlog");
                    self.signals.set_backlogged(false);
                }
                if !report.failed_routers.is_empty() || !report.failed_deletions.is_empty() {
                    warn!(
                        device = %self.name,
                        "Pass finished with {} failed routers, {} failed deletions",
                        report.failed_routers.len(),
                        report.failed_deletions.len()
                    );
                } else if !report.processed.is_empty() || !report.removed.is_empty() {
                    info!(
                        device = %self.name,
                        "Pass finished: {} routers applied, {} removed",
                        report.processed.len(),
                        report.removed.len()
                    );
                }
            }
            Err(PassError::Internal(reason)) => {
                error!(device = %self.name, "Failed processing routers: {}", reason);
                self.audit.device_backlogged(&self.name, reason);
                self.signals.request_full_resync();
                self.signals.set_backlogged(true);
            }
            Err(e) => {
                warn!(device = %self.name, "Pass aborted: {}", e);
                self.signals.request_full_resync();
            }
        }
        result
    }

    async fn full_resync(&mut self) -> Result<PassReport, PassError> {
        info!(device = %self.name, "Starting full resync");
        self.signals.pending_updated.clear();
        self.signals.pending_removed.clear();

        let routers = self.fetch(FetchScope::All).await?;

        let residual = with_timeout(
            "cleanup_invalid_config",
            self.config.op_timeout,
            self.driver.cleanup_invalid_config(&routers),
        )
        .await
        .map_err(PassError::from_driver)?;
        if !residual.removed.is_empty() {
            info!(
                device = %self.name,
                "Deleted invalid config of {} routers",
                residual.removed.len()
            );
        }
        with_timeout(
            "prepare_full_sync",
            self.config.op_timeout,
            self.driver.prepare_full_sync(&residual),
        )
        .await
        .map_err(PassError::from_driver)?;

        let fetched: HashSet<&str> = routers.iter().map(|r| r.id.as_str()).collect();
        let mut stale: Vec<String> = self
            .routers
            .keys()
            .filter(|id| !fetched.contains(id.as_str()))
            .cloned()
            .collect();
        stale.sort();

        let report = self
            .process_routers(SyncMode::Full, routers, stale)
            .await?;

        with_timeout(
            "clear_full_sync",
            self.config.op_timeout,
            self.driver.clear_full_sync(),
        )
        .await
        .map_err(PassError::from_driver)?;

        Ok(report)
    }

    async fn incremental(&mut self) -> Result<PassReport, PassError> {
        // A router named in both sets is torn down and then rebuilt from
        // whatever the fetch returns for it.
        let mut updated: Vec<String> = self.signals.pending_updated.drain().into_iter().collect();
        updated.sort();

        let mut removed: Vec<String> = Vec::new();
        for id in self.signals.pending_removed.drain() {
            if self.routers.contains_key(&id) {
                removed.push(id);
            } else {
                debug!(device = %self.name, "Ignoring removal of unknown router {}", id);
            }
        }
        removed.sort();

        if updated.is_empty() && removed.is_empty() {
            return Ok(PassReport::new(SyncMode::Incremental));
        }
        debug!(device = %self.name, "Updated routers: {:?}, removed routers: {:?}", updated, removed);

        let routers = if updated.is_empty() {
            Vec::new()
        } else {
            match self.fetch(FetchScope::Routers(updated.clone())).await {
                Ok(routers) => routers,
                Err(e) => {
                    self.signals.pending_updated.extend(updated);
                    self.signals.pending_removed.extend(removed);
                    return Err(e);
                }
            }
        };

        self.process_routers(SyncMode::Incremental, routers, removed)
            .await
    }

    async fn fetch(&self, scope: FetchScope) -> Result<Vec<RouterDescriptor>, PassError> {
        let limit = self.config.fetch_timeout;
        match tokio::time::timeout(
            limit,
            self.control_plane.fetch_desired_state(&self.name, &scope),
        )
        .await
        {
            Ok(result) => Ok(result?),
            Err(_) => Err(PassError::ControlPlane(ControlPlaneError::Timeout(
                "fetch desired state".to_string(),
                limit,
            ))),
        }
    }

    /// Tear down `removed`, then apply `routers` in order.
    async fn process_routers(
        &mut self,
        mode: SyncMode,
        mut routers: Vec<RouterDescriptor>,
        removed: Vec<String>,
    ) -> Result<PassReport, PassError> {
        let full_resync = mode == SyncMode::Full;
        let mut report = PassReport::new(mode);

        for id in &removed {
            let Some(mut record) = self.routers.remove(id) else {
                continue;
            };
            let ops = DriverOps {
                device: &self.name,
                driver: self.driver.as_ref(),
                op_timeout: self.config.op_timeout,
                interfaces: &self.interfaces,
            };
            let abandoned =
                teardown_router(&ops, &self.config.deletion, &self.audit, &mut record).await;
            if !abandoned.is_empty() {
                report.failed_deletions.push(id.clone());
            }
            self.audit.router_removed(&self.name, id);
            report.removed.push(id.clone());
        }

        order_global_last(&mut routers);
        for desired in routers {
            let id = desired.id.clone();
            if !desired.admin_state_up {
                debug!(device = %self.name, "Router {} is admin down, skipping", id);
                if let Some(record) = self.routers.get_mut(&id) {
                    record.set_desired(desired);
                }
                report.skipped.push(id);
                continue;
            }

            let record = match self.routers.get_mut(&id) {
                Some(record) => {
                    record.set_desired(desired);
                    record
                }
                None => {
                    info!(device = %self.name, "New router {}", id);
                    self.audit.router_added(&self.name, &id);
                    report.added.push(id.clone());
                    self.routers
                        .entry(id.clone())
                        .or_insert_with(|| RouterRecord::new(desired))
                }
            };

            let ops = DriverOps {
                device: &self.name,
                driver: self.driver.as_ref(),
                op_timeout: self.config.op_timeout,
                interfaces: &self.interfaces,
            };
            match apply_router(&ops, record, full_resync).await {
                Ok(()) => report.processed.push(id),
                Err(e) if e.is_connectivity() => {
                    self.signals.pending_updated.insert(id);
                    return Err(PassError::Unreachable(e));
                }
                Err(DriverError::Internal(reason)) => {
                    self.signals.pending_updated.insert(id.clone());
                    return Err(PassError::Internal(format!("router {}: {}", id, reason)));
                }
                Err(e) => {
                    error!(device = %self.name, "Driver error on router {}: {}", id, e);
                    self.signals.pending_updated.insert(id.clone());
                    // Full resync on any router error until a targeted retry is proven safe.
                    self.signals.request_full_resync();
                    report.failed_routers.push(id);
                }
            }
        }

        Ok(report)
    }
}

fn summarize(result: &Result<PassReport, PassError>) -> PassSummary {
    match result {
        Ok(report) => PassSummary {
            finished_at: Utc::now(),
            mode: Some(report.mode),
            processed: report.processed.len(),
            failed_routers: report.failed_routers.clone(),
            failed_deletions: report.failed_deletions.clone(),
            error: None,
        },
        Err(e) => PassSummary {
            finished_at: Utc::now(),
            mode: None,
            processed: 0,
            failed_routers: Vec::new(),
            failed_deletions: Vec::new(),
            error: Some(e.to_string()),
        },
    }
}
