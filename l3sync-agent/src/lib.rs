//! l3sync: reconciles router state from a control plane onto managed
//! routing devices.

pub mod audit;
pub mod config;
pub mod control_plane;
pub mod driver;
pub mod fleet;
pub mod model;
pub mod pending;
pub mod reconciler;
pub mod retry;
pub mod status;

pub use fleet::{DeviceOutcome, FleetCoordinator, TickReport};
pub use reconciler::{DeviceContext, PassError, PassReport};
