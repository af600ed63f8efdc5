//! Driver that records every call and fails on request.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use l3sync::driver::{Driver, DriverError, ResidualConfig, Result};
use l3sync::model::{FloatingIp, Port, Route, RouterDescriptor, RouterRecord};

/// One observed driver call. Probes are counted separately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub op: &'static str,
    pub router: String,
    /// Port id, gateway id for floating IPs, empty otherwise.
    pub target: String,
    /// Floating IP addresses or route destinations.
    pub items: Vec<String>,
}

impl Call {
    fn new(op: &'static str, router: &str, target: &str) -> Self {
        Self {
            op,
            router: router.to_string(),
            target: target.to_string(),
            items: Vec::new(),
        }
    }
}

/// Scripted failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Operation,
    Connectivity,
    Internal,
    Panic,
    /// Sleep far past any test timeout.
    Hang,
}

struct Rule {
    op: &'static str,
    target: Option<String>,
    fault: Fault,
    remaining: Option<usize>,
}

#[derive(Default)]
struct State {
    calls: Mutex<Vec<Call>>,
    rules: Mutex<Vec<Rule>>,
    probes: AtomicUsize,
}

/// Cheap to clone; clones share the call log and fault rules.
#[derive(Clone, Default)]
pub struct RecordingDriver {
    state: Arc<State>,
}

impl RecordingDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every call of `op` (on `target`, if given).
    pub fn fail(&self, op: &'static str, target: Option<&str>, fault: Fault) {
        self.push_rule(op, target, fault, None);
    }

    /// Fail the next `times` calls of `op`.
    pub fn fail_times(&self, op: &'static str, target: Option<&str>, fault: Fault, times: usize) {
        self.push_rule(op, target, fault, Some(times));
    }

    pub fn heal(&self) {
        self.state.rules.lock().unwrap().clear();
    }

    fn push_rule(&self, op: &'static str, target: Option<&str>, fault: Fault, remaining: Option<usize>) {
        self.state.rules.lock().unwrap().push(Rule {
            op,
            target: target.map(str::to_string),
            fault,
            remaining,
        });
    }

    /// Every recorded call except probes.
    pub fn calls(&self) -> Vec<Call> {
        self.state.calls.lock().unwrap().clone()
    }

    pub fn calls_of(&self, op: &str) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.op == op).collect()
    }

    /// Position of the first call matching `op` and `target`.
    pub fn position(&self, op: &str, target: &str) -> Option<usize> {
        self.calls()
            .iter()
            .position(|c| c.op == op && c.target == target)
    }

    pub fn clear_calls(&self) {
        self.state.calls.lock().unwrap().clear();
    }

    pub fn probes(&self) -> usize {
        self.state.probes.load(Ordering::SeqCst)
    }

    /// Port-level view: router, op and port of every port call.
    pub fn port_calls(&self) -> Vec<(String, &'static str, String)> {
        self.calls()
            .into_iter()
            .filter(|c| c.op.ends_with("_port"))
            .map(|c| (c.router, c.op, c.target))
            .collect()
    }

    async fn record(&self, call: Call) -> Result<()> {
        let fault = {
            let mut rules = self.state.rules.lock().unwrap();
            let matched = rules.iter_mut().find(|r| {
                r.op == call.op
                    && r.target.as_deref().map_or(true, |t| t == call.target)
                    && r.remaining != Some(0)
            });
            matched.map(|rule| {
                if let Some(remaining) = rule.remaining.as_mut() {
                    *remaining -= 1;
                }
                rule.fault
            })
        };
        let op = call.op;
        let target = call.target.clone();
        if op != "probe" {
            self.state.calls.lock().unwrap().push(call);
        }
        match fault {
            None => Ok(()),
            Some(Fault::Operation) => Err(DriverError::operation(op, format!("scripted failure on {}", target))),
            Some(Fault::Connectivity) => Err(DriverError::Connectivity("scripted".to_string())),
            Some(Fault::Internal) => Err(DriverError::Internal("scripted".to_string())),
            Some(Fault::Panic) => panic!("scripted panic in {}", op),
            Some(Fault::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl Driver for RecordingDriver {
    async fn probe(&self) -> Result<()> {
        self.state.probes.fetch_add(1, Ordering::SeqCst);
        self.record(Call::new("probe", "", "")).await
    }

    async fn add_internal_port(&self, router: &RouterRecord, port: &Port) -> Result<()> {
        self.record(Call::new("add_internal_port", &router.id, &port.id))
            .await
    }

    async fn remove_internal_port(&self, router: &RouterRecord, port: &Port) -> Result<()> {
        self.record(Call::new("remove_internal_port", &router.id, &port.id))
            .await
    }

    async fn add_gateway_port(&self, router: &RouterRecord, port: &Port) -> Result<()> {
        self.record(Call::new("add_gateway_port", &router.id, &port.id))
            .await
    }

    async fn remove_gateway_port(&self, router: &RouterRecord, port: &Port) -> Result<()> {
        self.record(Call::new("remove_gateway_port", &router.id, &port.id))
            .await
    }

    async fn reconcile_floating_ips(
        &self,
        router: &RouterRecord,
        gateway: &Port,
        floating_ips: &[FloatingIp],
    ) -> Result<()> {
        let mut call = Call::new("reconcile_floating_ips", &router.id, &gateway.id);
        call.items = floating_ips
            .iter()
            .map(|f| f.floating_ip_address.to_string())
            .collect();
        self.record(call).await
    }

    async fn reconcile_routes(&self, router: &RouterRecord, routes: &[Route]) -> Result<()> {
        let mut call = Call::new("reconcile_routes", &router.id, "");
        call.items = routes.iter().map(|r| r.destination.to_string()).collect();
        self.record(call).await
    }

    async fn cleanup_invalid_config(&self, desired: &[RouterDescriptor]) -> Result<ResidualConfig> {
        let mut call = Call::new("cleanup_invalid_config", "", "");
        call.items = desired.iter().map(|r| r.id.clone()).collect();
        self.record(call).await?;
        Ok(ResidualConfig::default())
    }

    async fn prepare_full_sync(&self, _residual: &ResidualConfig) -> Result<()> {
        self.record(Call::new("prepare_full_sync", "", "")).await
    }

    async fn clear_full_sync(&self) -> Result<()> {
        self.record(Call::new("clear_full_sync", "", "")).await
    }
}
