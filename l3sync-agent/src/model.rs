//! Router data model.
//!
//! `RouterDescriptor` is the desired state as delivered by the control plane.
//! `RouterRecord` wraps the last descriptor seen for a router together with
//! what has actually been confirmed applied on the device; diffs are always
//! computed against the applied fields, never against the previous descriptor.

use std::collections::HashSet;
use std::net::IpAddr;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

/// Router id of the synthetic router carrying shared/default configuration.
///
/// Its configuration may reference interfaces created for ordinary routers,
/// so it is always processed last within a pass.
pub const GLOBAL_ROUTER_ID: &str = "PHYSICAL_GLOBAL_ROUTER_ID";

/// Prefix of the device-side router name.
const ROUTER_NAME_PREFIX: &str = "nrouter-";

fn default_true() -> bool {
    true
}

/// Fixed IP assignment of a port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedIp {
    pub subnet_id: String,
    pub ip_address: IpAddr,
}

/// Subnet a port is attached to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subnet {
    pub id: String,
    pub cidr: IpNet,
    #[serde(default)]
    pub gateway_ip: Option<IpAddr>,
}

/// Where a port lands on the device. Resolved by the agent, not the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostingInfo {
    pub physical_interface: String,
    pub segmentation_id: Option<u16>,
}

/// A router port (internal interface or gateway).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    pub id: String,
    pub network_id: String,
    #[serde(default = "default_true")]
    pub admin_state_up: bool,
    #[serde(default)]
    pub mac_address: String,
    #[serde(default)]
    pub fixed_ips: Vec<FixedIp>,
    #[serde(default)]
    pub subnet: Option<Subnet>,
    /// VLAN tag of the network segment.
    #[serde(default)]
    pub segmentation_id: Option<u16>,
    #[serde(default)]
    pub hosting: Option<HostingInfo>,
}

impl Port {
    /// Minimal admin-up port, mostly useful for tests and fixtures.
    pub fn new(id: impl Into<String>, network_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            network_id: network_id.into(),
            admin_state_up: true,
            mac_address: String::new(),
            fixed_ips: Vec::new(),
            subnet: None,
            segmentation_id: None,
            hosting: None,
        }
    }
}

/// Floating IP associated with a router.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FloatingIp {
    pub id: String,
    pub floating_ip_address: IpAddr,
    #[serde(default)]
    pub fixed_ip_address: Option<IpAddr>,
    #[serde(default)]
    pub port_id: Option<String>,
}

/// Static route of a router.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Route {
    pub destination: IpNet,
    pub nexthop: IpAddr,
}

/// Active/standby redundancy information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HaInfo {
    pub group: u32,
    #[serde(default)]
    pub priority: u32,
    #[serde(default)]
    pub virtual_ip: Option<IpAddr>,
}

/// Desired definition of one logical router, owned by the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterDescriptor {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_true")]
    pub admin_state_up: bool,
    /// NAT on the gateway. Absent means enabled.
    #[serde(default)]
    pub enable_snat: Option<bool>,
    /// External gateway port, the egress path for floating IPs and routes.
    #[serde(default)]
    pub gw_port: Option<Port>,
    #[serde(default)]
    pub interfaces: Vec<Port>,
    /// Gateway-redundancy ports (active/standby gateway set).
    #[serde(default)]
    pub gw_ports: Vec<Port>,
    #[serde(default)]
    pub floating_ips: Vec<FloatingIp>,
    #[serde(default)]
    pub routes: Vec<Route>,
    #[serde(default)]
    pub ha_info: Option<HaInfo>,
    /// Device this router is assigned to. `None` means every device sees it.
    #[serde(default)]
    pub hosting_device: Option<String>,
}

impl RouterDescriptor {
    /// Admin-up router without ports.
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            admin_state_up: true,
            enable_snat: None,
            gw_port: None,
            interfaces: Vec::new(),
            gw_ports: Vec::new(),
            floating_ips: Vec::new(),
            routes: Vec::new(),
            ha_info: None,
            hosting_device: None,
        }
    }

    pub fn nat_enabled(&self) -> bool {
        self.enable_snat.unwrap_or(true)
    }

    pub fn is_global(&self) -> bool {
        self.id == GLOBAL_ROUTER_ID
    }
}

/// Last-applied state of one router on one device.
#[derive(Debug, Clone, Serialize)]
pub struct RouterRecord {
    pub id: String,
    pub desired: RouterDescriptor,
    pub nat_enabled: bool,
    pub ha_info: Option<HaInfo>,
    pub applied_internal_ports: Vec<Port>,
    pub applied_gateway_ports: Vec<Port>,
    pub applied_gateway_port: Option<Port>,
    pub applied_floating_ips: Vec<FloatingIp>,
    pub applied_routes: Vec<Route>,
}

impl RouterRecord {
    /// New record with nothing applied yet.
    pub fn new(desired: RouterDescriptor) -> Self {
        let mut record = Self {
            id: desired.id.clone(),
            nat_enabled: true,
            ha_info: None,
            desired: RouterDescriptor::new(desired.id.clone()),
            applied_internal_ports: Vec::new(),
            applied_gateway_ports: Vec::new(),
            applied_gateway_port: None,
            applied_floating_ips: Vec::new(),
            applied_routes: Vec::new(),
        };
        record.set_desired(desired);
        record
    }

    /// Replace the desired state and recompute derived fields.
    pub fn set_desired(&mut self, desired: RouterDescriptor) {
        self.nat_enabled = desired.nat_enabled();
        self.ha_info = desired.ha_info.clone();
        self.desired = desired;
    }

    /// Name of the router on the device.
    pub fn router_name(&self) -> String {
        format!("{}{}", ROUTER_NAME_PREFIX, self.id)
    }
}

/// Result of comparing an applied port list against a desired one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortDiff {
    /// Desired, admin-up ports that are not applied yet.
    pub added: Vec<Port>,
    /// Applied ports no longer desired (admin state is irrelevant here).
    pub removed: Vec<Port>,
}

impl PortDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Compute the port changes needed to go from `old` to `new`.
///
/// A desired port that is admin-down counts as absent, so an applied port
/// that went admin-down is removed.
pub fn diff_ports(old: &[Port], new: &[Port]) -> PortDiff {
    let old_ids: HashSet<&str> = old.iter().map(|p| p.id.as_str()).collect();
    let current_ids: HashSet<&str> = new
        .iter()
        .filter(|p| p.admin_state_up)
        .map(|p| p.id.as_str())
        .collect();

    let added = new
        .iter()
        .filter(|p| current_ids.contains(p.id.as_str()) && !old_ids.contains(p.id.as_str()))
        .cloned()
        .collect();
    let removed = old
        .iter()
        .filter(|p| !current_ids.contains(p.id.as_str()))
        .cloned()
        .collect();

    PortDiff { added, removed }
}

/// Move the global router to the end, keeping the order of the others.
pub fn order_global_last(routers: &mut [RouterDescriptor]) {
    routers.sort_by_key(|r| r.is_global());
}
