//! Desired-state source.
//!
//! The control plane owns router definitions. The agent only needs two
//! things from it: a liveness heartbeat and a way to fetch desired router
//! state, either for the whole device or for a set of router ids.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use crate::model::RouterDescriptor;

/// Control plane errors. All of them are connectivity-class for the agent.
#[derive(Debug, Error)]
pub enum ControlPlaneError {
    #[error("Control plane unreachable: {0}")]
    Unreachable(String),

    #[error("{0} timed out after {1:?}")]
    Timeout(String, Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid desired state: {0}")]
    Parse(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ControlPlaneError>;

/// Which routers a fetch should return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchScope {
    /// Every router assigned to the device.
    All,
    /// Only these routers (ids not assigned to the device are skipped).
    Routers(Vec<String>),
}

impl FetchScope {
    pub fn includes(&self, id: &str) -> bool {
        match self {
            FetchScope::All => true,
            FetchScope::Routers(ids) => ids.iter().any(|i| i == id),
        }
    }
}

#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Liveness check of the control plane itself.
    async fn heartbeat(&self, host: &str) -> Result<()>;

    /// Desired state of the routers in `scope` that are assigned to `device`.
    async fn fetch_desired_state(
        &self,
        device: &str,
        scope: &FetchScope,
    ) -> Result<Vec<RouterDescriptor>>;
}

/// On-disk form of the desired state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DesiredStateDocument {
    #[serde(default)]
    pub routers: Vec<RouterDescriptor>,
}

/// Router ids that changed between two reads of the desired state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub updated: Vec<String>,
    pub removed: Vec<String>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.updated.is_empty() && self.removed.is_empty()
    }
}

/// Control plane backed by a JSON document on disk.
pub struct FileControlPlane {
    path: PathBuf,
    last_seen: Mutex<Option<BTreeMap<String, RouterDescriptor>>>,
}

impl FileControlPlane {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            last_seen: Mutex::new(None),
        }
    }

    async fn read_document(&self) -> Result<DesiredStateDocument> {
        let raw = tokio::fs::read_to_string(&self.path).await?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Diff the document against the previous poll.
    ///
    /// The first poll only records a baseline: a fresh agent starts with a
    /// full resync anyway.
    pub async fn poll_changes(&self) -> Result<ChangeSet> {
        let current: BTreeMap<String, RouterDescriptor> = self
            .read_document()
            .await?
            .routers
            .into_iter()
            .map(|r| (r.id.clone(), r))
            .collect();

        let mut last_seen = self.last_seen.lock().await;
        let mut changes = ChangeSet::default();
        if let Some(previous) = last_seen.as_ref() {
            for (id, router) in &current {
                if previous.get(id) != Some(router) {
                    changes.updated.push(id.clone());
                }
            }
            for id in previous.keys() {
                if !current.contains_key(id) {
                    changes.removed.push(id.clone());
                }
            }
        }
        if !changes.is_empty() {
            debug!(
                "Desired state changed: {} updated, {} removed",
                changes.updated.len(),
                changes.removed.len()
            );
        }
        *last_seen = Some(current);
        Ok(changes)
    }
}

#[async_trait]
impl ControlPlane for FileControlPlane {
    async fn heartbeat(&self, host: &str) -> Result<()> {
        debug!(host, "heartbeat to {}", self.path.display());
        tokio::fs::metadata(&self.path)
            .await
            .map(|_| ())
            .map_err(|e| ControlPlaneError::Unreachable(format!("{}: {}", self.path.display(), e)))
    }

    async fn fetch_desired_state(
        &self,
        device: &str,
        scope: &FetchScope,
    ) -> Result<Vec<RouterDescriptor>> {
        let document = self.read_document().await?;
        let mut seen = HashSet::new();
        Ok(document
            .routers
            .into_iter()
            .filter(|r| r.hosting_device.as_deref().map_or(true, |d| d == device))
            .filter(|r| scope.includes(&r.id))
            .filter(|r| seen.insert(r.id.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("desired.json");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[tokio::test]
    async fn test_fetch_filters_by_device_and_scope() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            r#"{"routers": [
                {"id": "r1", "hosting_device": "asr-1"},
                {"id": "r2", "hosting_device": "asr-2"},
                {"id": "r3"}
            ]}"#,
        );
        let cp = FileControlPlane::new(&path);

        let all = cp.fetch_desired_state("asr-1", &FetchScope::All).await.unwrap();
        let ids: Vec<_> = all.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["r1", "r3"]);

        let some = cp
            .fetch_desired_state("asr-1", &FetchScope::Routers(vec!["r2".into(), "r3".into()]))
            .await
            .unwrap();
        assert_eq!(some.len(), 1);
        assert_eq!(some[0].id, "r3");
    }

    #[tokio::test]
    async fn test_heartbeat_fails_when_document_missing() {
        let dir = TempDir::new().unwrap();
        let cp = FileControlPlane::new(dir.path().join("missing.json"));
        assert!(matches!(
            cp.heartbeat("agent-1").await,
            Err(ControlPlaneError::Unreachable(_))
        ));
    }

    #[tokio::test]
    async fn test_poll_changes() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, r#"{"routers": [{"id": "r1"}, {"id": "r2"}]}"#);
        let cp = FileControlPlane::new(&path);

        // Baseline
        assert!(cp.poll_changes().await.unwrap().is_empty());

        write(
            &dir,
            r#"{"routers": [{"id": "r1", "admin_state_up": false}, {"id": "r3"}]}"#,
        );
        let changes = cp.poll_changes().await.unwrap();
        assert_eq!(changes.updated, vec!["r1".to_string(), "r3".to_string()]);
        assert_eq!(changes.removed, vec!["r2".to_string()]);

        assert!(cp.poll_changes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_document() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "{not json");
        let cp = FileControlPlane::new(&path);
        assert!(matches!(
            cp.fetch_desired_state("asr-1", &FetchScope::All).await,
            Err(ControlPlaneError::Parse(_))
        ));
    }
}
