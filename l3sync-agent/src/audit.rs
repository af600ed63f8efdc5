//! Audit events of the agent.
//!
//! Operator-relevant events go to the `audit` tracing target with the
//! component name and the ids of the objects involved, so they can be
//! filtered and shipped separately from debug output.

/// Severity of an audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Audit,
    Info,
    Warn,
    Error,
}

/// Audit logger for reconciliation events.
#[derive(Debug, Clone)]
pub struct AuditLogger {
    component: String,
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::new("l3sync")
    }
}

impl AuditLogger {
    pub fn new(component: &str) -> Self {
        Self {
            component: component.to_string(),
        }
    }

    pub fn log(&self, level: LogLevel, message: impl AsRef<str>, object_ids: &[&str]) {
        let message = message.as_ref();
        match level {
            LogLevel::Error => {
                tracing::error!(target: "audit", component = %self.component, objects = ?object_ids, "{}", message)
            }
            LogLevel::Warn => {
                tracing::warn!(target: "audit", component = %self.component, objects = ?object_ids, "{}", message)
            }
            LogLevel::Audit | LogLevel::Info => {
                tracing::info!(target: "audit", component = %self.component, objects = ?object_ids, "{}", message)
            }
        }
    }

    pub fn router_added(&self, device: &str, router_id: &str) {
        self.log(
            LogLevel::Audit,
            format!("Router {} added on {}", router_id, device),
            &[device, router_id],
        );
    }

    pub fn router_removed(&self, device: &str, router_id: &str) {
        self.log(
            LogLevel::Audit,
            format!("Router {} removed from {}", router_id, device),
            &[device, router_id],
        );
    }

    pub fn deletion_abandoned(&self, device: &str, router_id: &str, what: &str, attempts: u32) {
        self.log(
            LogLevel::Warn,
            format!(
                "Abandoned {} of router {} on {} after {} attempts",
                what, router_id, device, attempts
            ),
            &[device, router_id],
        );
    }

    pub fn device_unreachable(&self, device: &str, reason: &str) {
        self.log(
            LogLevel::Warn,
            format!("Device {} unreachable: {}", device, reason),
            &[device],
        );
    }

    pub fn device_backlogged(&self, device: &str, reason: &str) {
        self.log(
            LogLevel::Error,
            format!("Device {} backlogged: {}", device, reason),
            &[device],
        );
    }

    pub fn resync_requested(&self, devices: usize) {
        self.log(
            LogLevel::Info,
            format!("Full resync requested for {} devices", devices),
            &[],
        );
    }

    pub fn control_plane_lost(&self, reason: &str) {
        self.log(
            LogLevel::Warn,
            format!("Control plane heartbeat failed: {}", reason),
            &[],
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_component() {
        let audit = AuditLogger::default();
        assert_eq!(audit.component, "l3sync");
        // Must not panic without a subscriber.
        audit.router_added("asr-1", "r1");
        audit.deletion_abandoned("asr-1", "r1", "internal port p1", 5);
    }
}
