//! Authoritative store protocol for Release resources
//!
//! `get` returns the current release; `update_status` writes the status
//! subresource and fails with `Conflict` when the release changed since the
//! snapshot's `resourceVersion`.

use super::backoff::Conflicting;
use crate::crd::release::Release;
use async_trait::async_trait;
use kube::api::{Api, PostParams};
use kube::ResourceExt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("release {namespace}/{name} not found")]
    NotFound { namespace: String, name: String },

    #[error("release {namespace}/{name} was modified since it was read")]
    Conflict { namespace: String, name: String },

    #[error("Kubernetes API error: {0}")]
    Api(#[source] kube::Error),

    #[error("failed to serialize release: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store error: {0}")]
    Other(String),
}

impl Conflicting for StoreError {
    fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

impl StoreError {
    fn from_kube(err: kube::Error, namespace: &str, name: &str) -> Self {
        match err {
            kube::Error::Api(ref resp) if resp.code == 404 => StoreError::NotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            },
            kube::Error::Api(ref resp) if resp.code == 409 => StoreError::Conflict {
                namespace: namespace.to_string(),
                name: name.to_string(),
            },
            other => StoreError::Api(other),
        }
    }
}

#[async_trait]
pub trait ReleaseStore: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<Release, StoreError>;

    /// Conditional write of `release.status`, checked against `metadata.resourceVersion`
    async fn update_status(&self, release: &Release) -> Result<Release, StoreError>;
}

/// Release store backed by the Kubernetes API server
pub struct KubeReleaseStore {
    client: kube::Client,
}

impl KubeReleaseStore {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ReleaseStore for KubeReleaseStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Release, StoreError> {
        let api: Api<Release> = Api::namespaced(self.client.clone(), namespace);
        api.get(name)
            .await
            .map_err(|e| StoreError::from_kube(e, namespace, name))
    }

    async fn update_status(&self, release: &Release) -> Result<Release, StoreError> {
        let namespace = release.namespace().unwrap_or_default();
        let name = release.name_any();
        let api: Api<Release> = Api::namespaced(self.client.clone(), &namespace);

        // The body carries metadata.resourceVersion, so the API server rejects stale writes with 409
        let body = serde_json::to_vec(release)?;
        api.replace_status(&name, &PostParams::default(), body)
            .await
            .map_err(|e| StoreError::from_kube(e, &namespace, &name))
    }
}

/// In-memory store with resourceVersion checking and fault injection
#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub struct MockReleaseStore {
    releases: std::sync::Mutex<std::collections::HashMap<(String, String), Release>>,
    version: std::sync::atomic::AtomicU64,
    forced_conflicts: std::sync::atomic::AtomicU32,
    forced_error: std::sync::Mutex<Option<String>>,
    gets: std::sync::atomic::AtomicU32,
    updates: std::sync::atomic::AtomicU32,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
impl MockReleaseStore {
    pub fn new() -> Self {
        Self {
            releases: std::sync::Mutex::new(std::collections::HashMap::new()),
            version: std::sync::atomic::AtomicU64::new(0),
            forced_conflicts: std::sync::atomic::AtomicU32::new(0),
            forced_error: std::sync::Mutex::new(None),
            gets: std::sync::atomic::AtomicU32::new(0),
            updates: std::sync::atomic::AtomicU32::new(0),
        }
    }

    fn next_version(&self) -> String {
        let v = self
            .version
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst)
            + 1;
        v.to_string()
    }

    /// Store a release and return the stored copy (with its resourceVersion)
    pub fn insert(&self, mut release: Release) -> Release {
        release.metadata.resource_version = Some(self.next_version());
        let key = (release.namespace().unwrap(), release.name_any());
        self.releases.lock().unwrap().insert(key, release.clone());
        release
    }

    /// Simulate another writer modifying the stored status
    pub fn concurrent_write(
        &self,
        namespace: &str,
        name: &str,
        f: impl FnOnce(&mut crate::crd::release::ReleaseStatus),
    ) {
        let version = self.next_version();
        let mut releases = self.releases.lock().unwrap();
        let release = releases
            .get_mut(&(namespace.to_string(), name.to_string()))
            .unwrap();
        let mut status = release.status.clone().unwrap_or_default();
        f(&mut status);
        release.status = Some(status);
        release.metadata.resource_version = Some(version);
    }

    /// Fail the next `n` updates with a conflict, regardless of version
    pub fn force_conflicts(&self, n: u32) {
        self.forced_conflicts
            .store(n, std::sync::atomic::Ordering::SeqCst);
    }

    /// Fail the next update with a non-conflict error
    pub fn force_error(&self, msg: &str) {
        *self.forced_error.lock().unwrap() = Some(msg.to_string());
    }

    pub fn remove(&self, namespace: &str, name: &str) {
        self.releases
            .lock()
            .unwrap()
            .remove(&(namespace.to_string(), name.to_string()));
    }

    pub fn stored(&self, namespace: &str, name: &str) -> Option<Release> {
        self.releases
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn gets(&self) -> u32 {
        self.gets.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn updates(&self) -> u32 {
        self.updates.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
#[async_trait]
impl ReleaseStore for MockReleaseStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Release, StoreError> {
        self.gets.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.stored(namespace, name).ok_or_else(|| StoreError::NotFound {
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
    }

    async fn update_status(&self, release: &Release) -> Result<Release, StoreError> {
        use std::sync::atomic::Ordering;

        self.updates.fetch_add(1, Ordering::SeqCst);
        let namespace = release.namespace().unwrap_or_default();
        let name = release.name_any();

        if let Some(msg) = self.forced_error.lock().unwrap().take() {
            return Err(StoreError::Other(msg));
        }

        let forced = self.forced_conflicts.load(Ordering::SeqCst);
        if forced > 0 {
            self.forced_conflicts.store(forced - 1, Ordering::SeqCst);
            return Err(StoreError::Conflict { namespace, name });
        }

        let version = self.next_version();
        let mut releases = self.releases.lock().unwrap();
        let stored = releases
            .get_mut(&(namespace.clone(), name.clone()))
            .ok_or_else(|| StoreError::NotFound {
                namespace: namespace.clone(),
                name: name.clone(),
            })?;

        if stored.metadata.resource_version != release.metadata.resource_version {
            return Err(StoreError::Conflict { namespace, name });
        }

        // Status subresource: only the status is taken from the request
        stored.status = release.status.clone();
        stored.metadata.resource_version = Some(version);
        Ok(stored.clone())
    }
}
