//! Workload adapters
//!
//! `TargetController` is the capability set the release state machine is
//! built against. Concrete per-kind adapters live outside this crate; here
//! we provide the workload query protocol (`WorkloadSource`) and the change
//! detection every adapter shares.

use super::config_tracker::ConfigTracker;
use super::fingerprint::{fingerprint, FingerprintError};
use crate::client::{api_resource, ClientError, ObjectClient};
use crate::crd::release::{Release, TargetRef};
use async_trait::async_trait;
use kube::discovery::ApiResource;
use kube::ResourceExt;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum TargetError {
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: String,
        namespace: String,
        name: String,
    },

    /// A required ConfigMap or Secret referenced by the pod template is missing
    #[error("{kind} {namespace}/{name} referenced by the pod template not found")]
    ConfigNotFound {
        kind: String,
        namespace: String,
        name: String,
    },

    #[error("{kind} {namespace}/{name} not ready: {reason}")]
    NotReady {
        kind: String,
        namespace: String,
        name: String,
        reason: String,
    },

    #[error(transparent)]
    Client(ClientError),

    #[error(transparent)]
    Fingerprint(#[from] FingerprintError),

    #[error("{0}")]
    Other(String),
}

impl From<ClientError> for TargetError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::NotFound {
                kind,
                namespace,
                name,
            } => TargetError::NotFound {
                kind,
                namespace,
                name,
            },
            other => TargetError::Client(other),
        }
    }
}

impl TargetError {
    /// The target workload itself is missing; absent configs do not count
    pub fn is_not_found(&self) -> bool {
        matches!(self, TargetError::NotFound { .. })
    }
}

/// Result of creating the primary variant
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Initialization {
    /// Label selector key shared by the primary and canary pods
    pub label: String,
    /// Named container ports, used for routing and metrics
    pub ports: BTreeMap<String, i32>,
}

/// Capabilities a workload-kind adapter provides
#[async_trait]
pub trait TargetController: Send + Sync {
    /// Fails (rather than returning `false`) when readiness cannot be evaluated
    async fn is_primary_ready(&self, release: &Release) -> Result<bool, TargetError>;

    async fn is_canary_ready(&self, release: &Release) -> Result<bool, TargetError>;

    /// Create or validate the primary variant
    async fn initialize(
        &self,
        release: &Release,
        skip_liveness_checks: bool,
    ) -> Result<Initialization, TargetError>;

    /// Copy the canary's effective spec onto the primary
    async fn promote(&self, release: &Release) -> Result<(), TargetError>;

    /// True iff the live template fingerprint differs from `lastAppliedSpec`
    async fn has_target_changed(&self, release: &Release) -> Result<bool, TargetError>;

    /// True iff a tracked ConfigMap/Secret fingerprint differs from the stored value
    async fn have_dependencies_changed(&self, release: &Release) -> Result<bool, TargetError>;

    async fn scale(&self, release: &Release, replicas: i32) -> Result<(), TargetError>;

    async fn scale_from_zero(&self, release: &Release) -> Result<(), TargetError>;
}

/// Workload query protocol: the structured template that drives fingerprinting
#[async_trait]
pub trait WorkloadSource: Send + Sync {
    async fn template(&self, namespace: &str, target: &TargetRef) -> Result<Value, TargetError>;
}

/// Reads pod templates of apps/v1 workloads, and Service specs
pub struct DeploymentSource {
    client: Arc<dyn ObjectClient>,
}

impl DeploymentSource {
    pub fn new(client: Arc<dyn ObjectClient>) -> Self {
        Self { client }
    }
}

fn workload_resource(kind: &str) -> Option<(ApiResource, &'static str)> {
    match kind {
        "Deployment" => Some((
            api_resource("apps", "v1", "Deployment", "deployments"),
            "template",
        )),
        "DaemonSet" => Some((
            api_resource("apps", "v1", "DaemonSet", "daemonsets"),
            "template",
        )),
        "StatefulSet" => Some((
            api_resource("apps", "v1", "StatefulSet", "statefulsets"),
            "template",
        )),
        "Service" => Some((api_resource("", "v1", "Service", "services"), "")),
        _ => None,
    }
}

#[async_trait]
impl WorkloadSource for DeploymentSource {
    async fn template(&self, namespace: &str, target: &TargetRef) -> Result<Value, TargetError> {
        let (resource, field) = workload_resource(&target.kind)
            .ok_or_else(|| TargetError::Other(format!("unsupported target kind {}", target.kind)))?;

        let object = self.client.get(&resource, namespace, &target.name).await?;
        let spec = object.data.get("spec").ok_or_else(|| {
            TargetError::Other(format!(
                "{} {}/{} has no spec",
                target.kind, namespace, target.name
            ))
        })?;

        if field.is_empty() {
            return Ok(spec.clone());
        }
        spec.get(field).cloned().ok_or_else(|| {
            TargetError::Other(format!(
                "{} {}/{} has no spec.{}",
                target.kind, namespace, target.name, field
            ))
        })
    }
}

/// Compare the live template fingerprint with `status.lastAppliedSpec`
///
/// A release that has never been synced counts as changed.
pub async fn has_template_changed(
    workloads: &dyn WorkloadSource,
    release: &Release,
) -> Result<bool, TargetError> {
    let namespace = release.namespace().unwrap_or_default();
    let template = workloads
        .template(&namespace, &release.spec.target_ref)
        .await?;
    let current = fingerprint(&template)?;

    let stored = release
        .status
        .as_ref()
        .and_then(|s| s.last_applied_spec.as_deref());
    debug!(release = %release.name_any(), current = %current, stored = ?stored, "Compared template fingerprint");
    Ok(stored != Some(current.as_str()))
}

/// Compare the tracked ConfigMap/Secret fingerprints with `status.trackedConfigs`
pub async fn have_configs_changed(
    workloads: &dyn WorkloadSource,
    configs: &dyn ConfigTracker,
    release: &Release,
) -> Result<bool, TargetError> {
    let namespace = release.namespace().unwrap_or_default();
    let template = workloads
        .template(&namespace, &release.spec.target_ref)
        .await?;
    let current = configs.tracked_configs(&namespace, &template).await?;

    let stored = release
        .status
        .as_ref()
        .and_then(|s| s.tracked_configs.clone())
        .unwrap_or_default();
    Ok(current != stored)
}

/// In-memory workload source keyed by target name
#[cfg(test)]
#[allow(clippy::unwrap_used)]
#[derive(Default)]
pub struct MockWorkloadSource {
    templates: std::sync::Mutex<std::collections::HashMap<String, Value>>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
impl MockWorkloadSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_template(&self, name: &str, template: Value) {
        self.templates
            .lock()
            .unwrap()
            .insert(name.to_string(), template);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
#[async_trait]
impl WorkloadSource for MockWorkloadSource {
    async fn template(&self, namespace: &str, target: &TargetRef) -> Result<Value, TargetError> {
        self.templates
            .lock()
            .unwrap()
            .get(&target.name)
            .cloned()
            .ok_or_else(|| TargetError::NotFound {
                kind: target.kind.clone(),
                namespace: namespace.to_string(),
                name: target.name.clone(),
            })
    }
}
