//! ConfigMap and Secret drift tracking
//!
//! A pod template can reference configuration through volumes, projected
//! volume sources, `envFrom` and `env[].valueFrom`. Each referenced object's
//! content is fingerprinted and stored in `status.trackedConfigs` under
//! `configmap/<name>` or `secret/<name>`.

use super::fingerprint::fingerprint;
use super::target::TargetError;
use crate::client::{api_resource, ClientError, ObjectClient};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConfigKind {
    ConfigMap,
    Secret,
}

impl ConfigKind {
    fn key_prefix(&self) -> &'static str {
        match self {
            ConfigKind::ConfigMap => "configmap",
            ConfigKind::Secret => "secret",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigRef {
    pub kind: ConfigKind,
    pub name: String,
    /// The pod starts even when the object does not exist
    pub optional: bool,
}

impl ConfigRef {
    pub fn key(&self) -> String {
        format!("{}/{}", self.kind.key_prefix(), self.name)
    }
}

struct RefCollector {
    // (kind, name) -> optional; a single required reference makes it required
    refs: BTreeMap<(ConfigKind, String), bool>,
}

impl RefCollector {
    fn add(&mut self, kind: ConfigKind, source: &Value, name_field: &str) {
        let Some(name) = source.get(name_field).and_then(Value::as_str) else {
            return;
        };
        if name.is_empty() {
            return;
        }
        let optional = source
            .get("optional")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        self.refs
            .entry((kind, name.to_string()))
            .and_modify(|o| *o = *o && optional)
            .or_insert(optional);
    }

    fn container(&mut self, container: &Value) {
        for env_from in array(container, "envFrom") {
            if let Some(source) = env_from.get("configMapRef") {
                self.add(ConfigKind::ConfigMap, source, "name");
            }
            if let Some(source) = env_from.get("secretRef") {
                self.add(ConfigKind::Secret, source, "name");
            }
        }
        for env in array(container, "env") {
            let Some(value_from) = env.get("valueFrom") else {
                continue;
            };
            if let Some(source) = value_from.get("configMapKeyRef") {
                self.add(ConfigKind::ConfigMap, source, "name");
            }
            if let Some(source) = value_from.get("secretKeyRef") {
                self.add(ConfigKind::Secret, source, "name");
            }
        }
    }

    fn volume(&mut self, volume: &Value) {
        if let Some(source) = volume.get("configMap") {
            self.add(ConfigKind::ConfigMap, source, "name");
        }
        if let Some(source) = volume.get("secret") {
            self.add(ConfigKind::Secret, source, "secretName");
        }
        if let Some(projected) = volume.get("projected") {
            for source in array(projected, "sources") {
                if let Some(cm) = source.get("configMap") {
                    self.add(ConfigKind::ConfigMap, cm, "name");
                }
                if let Some(secret) = source.get("secret") {
                    self.add(ConfigKind::Secret, secret, "name");
                }
            }
        }
    }
}

fn array<'a>(value: &'a Value, field: &str) -> impl Iterator<Item = &'a Value> {
    value
        .get(field)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

/// Collect the ConfigMap/Secret references of a pod template, deduplicated and sorted
pub fn config_refs(template: &Value) -> Vec<ConfigRef> {
    let mut collector = RefCollector {
        refs: BTreeMap::new(),
    };
    let pod_spec = template.get("spec").unwrap_or(&Value::Null);

    for volume in array(pod_spec, "volumes") {
        collector.volume(volume);
    }
    for container in array(pod_spec, "containers").chain(array(pod_spec, "initContainers")) {
        collector.container(container);
    }

    collector
        .refs
        .into_iter()
        .map(|((kind, name), optional)| ConfigRef {
            kind,
            name,
            optional,
        })
        .collect()
}

#[async_trait]
pub trait ConfigTracker: Send + Sync {
    /// Fingerprints of every configuration object the template references
    async fn tracked_configs(
        &self,
        namespace: &str,
        template: &Value,
    ) -> Result<BTreeMap<String, String>, TargetError>;
}

/// Reads referenced ConfigMaps and Secrets from the cluster
pub struct KubeConfigTracker {
    client: Arc<dyn ObjectClient>,
}

impl KubeConfigTracker {
    pub fn new(client: Arc<dyn ObjectClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ConfigTracker for KubeConfigTracker {
    async fn tracked_configs(
        &self,
        namespace: &str,
        template: &Value,
    ) -> Result<BTreeMap<String, String>, TargetError> {
        let mut tracked = BTreeMap::new();

        for config in config_refs(template) {
            let resource = match config.kind {
                ConfigKind::ConfigMap => api_resource("", "v1", "ConfigMap", "configmaps"),
                ConfigKind::Secret => api_resource("", "v1", "Secret", "secrets"),
            };

            let object = match self.client.get(&resource, namespace, &config.name).await {
                Ok(object) => object,
                Err(e) if e.is_not_found() && config.optional => {
                    debug!(config = %config.key(), "Optional config not found, skipping");
                    continue;
                }
                Err(ClientError::NotFound {
                    kind,
                    namespace,
                    name,
                }) => {
                    return Err(TargetError::ConfigNotFound {
                        kind,
                        namespace,
                        name,
                    })
                }
                Err(e) => return Err(e.into()),
            };

            let content = json!({
                "data": object.data.get("data").cloned().unwrap_or(Value::Null),
                "binaryData": object.data.get("binaryData").cloned().unwrap_or(Value::Null),
            });
            tracked.insert(config.key(), fingerprint(&content)?);
        }

        Ok(tracked)
    }
}
