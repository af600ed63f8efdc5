//! Test harness for reconciliation integration tests
//!
//! Provides a recording driver with scripted faults, a scripted control
//! plane and fixture builders for router descriptors.

#![allow(dead_code)]

pub mod control_plane;
pub mod driver;
pub mod fixtures;

use std::sync::Arc;
use std::time::Duration;

use l3sync::config::AgentConfig;
use l3sync::retry::RetryPolicy;
use l3sync::DeviceContext;

pub use control_plane::ScriptedControlPlane;
pub use driver::{Call, Fault, RecordingDriver};
pub use fixtures::*;

/// Agent config with timeouts short enough for tests.
pub fn fast_config() -> AgentConfig {
    AgentConfig {
        host: "test-agent".to_string(),
        heartbeat_timeout: Duration::from_millis(200),
        fetch_timeout: Duration::from_millis(500),
        probe_timeout: Duration::from_millis(200),
        op_timeout: Duration::from_millis(200),
        tick_budget: Duration::from_secs(5),
        deletion: RetryPolicy::new(5, Duration::from_millis(1)),
    }
}

/// Device context wired to a recording driver and a scripted control plane.
pub fn device(
    name: &str,
    control_plane: &Arc<ScriptedControlPlane>,
) -> (DeviceContext, RecordingDriver) {
    let driver = RecordingDriver::new();
    let context = DeviceContext::new(
        name,
        Box::new(driver.clone()),
        control_plane.clone(),
        fast_config(),
    );
    (context, driver)
}
