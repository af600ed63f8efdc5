//! Router reconciliation for one device.
//!
//! A `DeviceContext` compares the desired router state from the control plane
//! with what it believes is applied on its device and pushes the difference
//! through the device's driver:
//! - `device`: pass state machine (full resync / incremental / backlogged)
//! - `router`: per-router diff and ordered apply
//! - `teardown`: router removal with bounded retries

pub mod device;
mod router;
mod teardown;

pub use device::{DeviceContext, PassError, PassReport};
