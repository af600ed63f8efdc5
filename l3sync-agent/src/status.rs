//! Health snapshot for external status reporting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pending::DeviceSignals;

/// Kind of reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Re-derive everything assigned to the device.
    Full,
    /// Only the routers named by pending notifications.
    Incremental,
}

/// Reconciliation state of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    Steady,
    FullResync,
    Backlogged,
}

impl DeviceState {
    pub fn from_flags(needs_full_resync: bool, backlogged: bool) -> Self {
        if backlogged {
            DeviceState::Backlogged
        } else if needs_full_resync {
            DeviceState::FullResync
        } else {
            DeviceState::Steady
        }
    }
}

/// Outcome of the most recent pass on a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassSummary {
    pub finished_at: DateTime<Utc>,
    pub mode: Option<SyncMode>,
    pub processed: usize,
    pub failed_routers: Vec<String>,
    pub failed_deletions: Vec<String>,
    pub error: Option<String>,
}

/// Status of one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub device: String,
    pub state: DeviceState,
    pub needs_full_resync: bool,
    pub backlogged: bool,
    pub routers: usize,
    pub pending_updated: usize,
    pub pending_removed: usize,
    pub last_pass: Option<PassSummary>,
}

impl DeviceStatus {
    pub fn collect(device: &str, signals: &DeviceSignals) -> Self {
        let needs_full_resync = signals.needs_full_resync();
        let backlogged = signals.is_backlogged();
        Self {
            device: device.to_string(),
            state: DeviceState::from_flags(needs_full_resync, backlogged),
            needs_full_resync,
            backlogged,
            routers: signals.router_count(),
            pending_updated: signals.pending_updated.len(),
            pending_removed: signals.pending_removed.len(),
            last_pass: signals.last_pass(),
        }
    }

    /// Converging devices are expected to settle on their own. A stuck one
    /// keeps failing its full resync retries.
    pub fn is_stuck(&self) -> bool {
        self.state == DeviceState::Backlogged
    }
}

/// Status of the whole fleet handled by this agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetStatus {
    pub host: String,
    pub control_plane_reachable: bool,
    pub devices: Vec<DeviceStatus>,
}

impl FleetStatus {
    pub fn device(&self, name: &str) -> Option<&DeviceStatus> {
        self.devices.iter().find(|d| d.device == name)
    }
}
