//! In-memory control plane with scriptable failures.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use l3sync::control_plane::{ControlPlane, ControlPlaneError, FetchScope, Result};
use l3sync::model::RouterDescriptor;

#[derive(Default)]
pub struct ScriptedControlPlane {
    routers: Mutex<BTreeMap<String, RouterDescriptor>>,
    heartbeat_hangs: AtomicBool,
    fetch_fails: AtomicBool,
    fetches: Mutex<Vec<FetchScope>>,
    heartbeats: AtomicUsize,
}

impl ScriptedControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_routers(routers: Vec<RouterDescriptor>) -> Self {
        let control_plane = Self::new();
        for router in routers {
            control_plane.set_router(router);
        }
        control_plane
    }

    pub fn set_router(&self, router: RouterDescriptor) {
        self.routers
            .lock()
            .unwrap()
            .insert(router.id.clone(), router);
    }

    pub fn remove_router(&self, id: &str) {
        self.routers.lock().unwrap().remove(id);
    }

    /// Heartbeats never answer while set.
    pub fn hang_heartbeat(&self, hang: bool) {
        self.heartbeat_hangs.store(hang, Ordering::SeqCst);
    }

    pub fn fail_fetches(&self, fail: bool) {
        self.fetch_fails.store(fail, Ordering::SeqCst);
    }

    pub fn fetches(&self) -> Vec<FetchScope> {
        self.fetches.lock().unwrap().clone()
    }

    pub fn heartbeats(&self) -> usize {
        self.heartbeats.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ControlPlane for ScriptedControlPlane {
    async fn heartbeat(&self, _host: &str) -> Result<()> {
        self.heartbeats.fetch_add(1, Ordering::SeqCst);
        if self.heartbeat_hangs.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        Ok(())
    }

    async fn fetch_desired_state(
        &self,
        device: &str,
        scope: &FetchScope,
    ) -> Result<Vec<RouterDescriptor>> {
        self.fetches.lock().unwrap().push(scope.clone());
        if self.fetch_fails.load(Ordering::SeqCst) {
            return Err(ControlPlaneError::Unreachable("scripted".to_string()));
        }
        Ok(self
            .routers
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.hosting_device.as_deref().map_or(true, |d| d == device))
            .filter(|r| scope.includes(&r.id))
            .cloned()
            .collect())
    }
}
