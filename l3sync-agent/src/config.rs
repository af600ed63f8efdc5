//! Agent configuration and device inventory.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::retry::RetryPolicy;

/// Key of the catch-all entry in an interface map.
const WILDCARD: &str = "*";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid interface mapping {key}={value} for device {device}")]
    InvalidInterfaceMapping {
        device: String,
        key: String,
        value: String,
    },

    #[error("Duplicate device name: {0}")]
    DuplicateDevice(String),

    #[error("Device inventory is empty")]
    NoDevices,
}

/// Timeouts and retry settings of the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    /// Name this agent reports to the control plane.
    pub host: String,
    /// Control-plane heartbeat; gates every tick.
    pub heartbeat_timeout: Duration,
    /// Desired-state fetch; may enumerate the whole fleet.
    pub fetch_timeout: Duration,
    /// Per-device liveness probe.
    pub probe_timeout: Duration,
    /// Any single driver operation.
    pub op_timeout: Duration,
    /// How long a tick waits for its device workers.
    pub tick_budget: Duration,
    /// Teardown retries.
    pub deletion: RetryPolicy,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            heartbeat_timeout: Duration::from_secs(6),
            fetch_timeout: Duration::from_secs(180),
            probe_timeout: Duration::from_secs(5),
            op_timeout: Duration::from_secs(30),
            tick_budget: Duration::from_secs(300),
            deletion: RetryPolicy::default(),
        }
    }
}

/// Physical interfaces router ports are placed on, per network.
///
/// Entries use the `<internal|external>_<n> = "<net-id>[,<net-id>...]:<interface>"`
/// form; a `*` network id is the fallback for networks without an entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfaceMap {
    internal: BTreeMap<String, String>,
    external: BTreeMap<String, String>,
}

impl InterfaceMap {
    pub fn parse(device: &str, entries: &BTreeMap<String, String>) -> Result<Self, ConfigError> {
        let mut map = InterfaceMap::default();
        for (key, value) in entries {
            let invalid = || ConfigError::InvalidInterfaceMapping {
                device: device.to_string(),
                key: key.clone(),
                value: value.clone(),
            };

            let kind = key.split('_').next().unwrap_or_default();
            let target = match kind {
                "internal" => &mut map.internal,
                "external" => &mut map.external,
                _ => return Err(invalid()),
            };

            let (networks, interface) = value.split_once(':').ok_or_else(invalid)?;
            let interface = interface.trim();
            if interface.is_empty() || interface.contains(':') {
                return Err(invalid());
            }
            for network in networks.split(',').map(str::trim) {
                if network.is_empty() {
                    return Err(invalid());
                }
                target.insert(network.to_string(), interface.to_string());
            }
        }
        Ok(map)
    }

    /// Interface for a port on `network_id`.
    pub fn resolve(&self, network_id: &str, external: bool) -> Option<&str> {
        let table = if external {
            &self.external
        } else {
            &self.internal
        };
        table
            .get(network_id)
            .or_else(|| table.get(WILDCARD))
            .map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.internal.is_empty() && self.external.is_empty()
    }
}

/// One managed device as listed in the inventory file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub name: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub interfaces: BTreeMap<String, String>,
}

impl DeviceConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: None,
            interfaces: BTreeMap::new(),
        }
    }

    pub fn interface_map(&self) -> Result<InterfaceMap, ConfigError> {
        InterfaceMap::parse(&self.name, &self.interfaces)
    }
}

/// Parse and validate a device inventory.
pub fn parse_inventory(raw: &str) -> Result<Vec<DeviceConfig>, ConfigError> {
    let devices: Vec<DeviceConfig> = serde_json::from_str(raw)?;
    if devices.is_empty() {
        return Err(ConfigError::NoDevices);
    }
    let mut names = std::collections::HashSet::new();
    for device in &devices {
        if !names.insert(device.name.as_str()) {
            return Err(ConfigError::DuplicateDevice(device.name.clone()));
        }
        device.interface_map()?;
    }
    Ok(devices)
}

pub fn load_inventory(path: &Path) -> Result<Vec<DeviceConfig>, ConfigError> {
    let raw = std::fs::read_to_string(path)?;
    parse_inventory(&raw)
}
