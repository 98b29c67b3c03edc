//! Namespaced access to arbitrary cluster objects
//!
//! Routers, the workload source and the config tracker only need to read,
//! replace and apply a handful of resource kinds. They depend on the
//! `ObjectClient` seam instead of a concrete `kube::Client`, and each
//! backend's resource is addressed by an `ApiResource`.

use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::core::DynamicObject;
use kube::discovery::ApiResource;
use thiserror::Error;

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "serin";

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: String,
        namespace: String,
        name: String,
    },

    #[error("{kind} {namespace}/{name} was modified since it was read")]
    Conflict {
        kind: String,
        namespace: String,
        name: String,
    },

    #[error("{kind} object has no name")]
    MissingName { kind: String },

    #[error("Kubernetes API error: {0}")]
    Api(#[source] kube::Error),
}

impl ClientError {
    fn from_kube(err: kube::Error, resource: &ApiResource, namespace: &str, name: &str) -> Self {
        match err {
            kube::Error::Api(ref resp) if resp.code == 404 => ClientError::NotFound {
                kind: resource.kind.clone(),
                namespace: namespace.to_string(),
                name: name.to_string(),
            },
            kube::Error::Api(ref resp) if resp.code == 409 => ClientError::Conflict {
                kind: resource.kind.clone(),
                namespace: namespace.to_string(),
                name: name.to_string(),
            },
            other => ClientError::Api(other),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound { .. })
    }
}

/// Build an `ApiResource` for a group/version/kind
pub fn api_resource(group: &str, version: &str, kind: &str, plural: &str) -> ApiResource {
    let api_version = if group.is_empty() {
        version.to_string()
    } else {
        format!("{group}/{version}")
    };
    ApiResource {
        group: group.to_string(),
        version: version.to_string(),
        api_version,
        kind: kind.to_string(),
        plural: plural.to_string(),
    }
}

#[async_trait]
pub trait ObjectClient: Send + Sync {
    async fn get(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<DynamicObject, ClientError>;

    /// Full update, rejected with `Conflict` when `metadata.resourceVersion` is stale
    async fn replace(
        &self,
        resource: &ApiResource,
        namespace: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject, ClientError>;

    /// Server-side apply (create or update the fields this controller owns)
    async fn apply(
        &self,
        resource: &ApiResource,
        namespace: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject, ClientError>;
}

pub struct KubeObjectClient {
    client: kube::Client,
}

impl KubeObjectClient {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    fn api(&self, resource: &ApiResource, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, resource)
    }
}

fn object_name(resource: &ApiResource, object: &DynamicObject) -> Result<String, ClientError> {
    object
        .metadata
        .name
        .clone()
        .ok_or_else(|| ClientError::MissingName {
            kind: resource.kind.clone(),
        })
}

#[async_trait]
impl ObjectClient for KubeObjectClient {
    async fn get(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<DynamicObject, ClientError> {
        self.api(resource, namespace)
            .get(name)
            .await
            .map_err(|e| ClientError::from_kube(e, resource, namespace, name))
    }

    async fn replace(
        &self,
        resource: &ApiResource,
        namespace: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject, ClientError> {
        let name = object_name(resource, object)?;
        self.api(resource, namespace)
            .replace(&name, &PostParams::default(), object)
            .await
            .map_err(|e| ClientError::from_kube(e, resource, namespace, &name))
    }

    async fn apply(
        &self,
        resource: &ApiResource,
        namespace: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject, ClientError> {
        let name = object_name(resource, object)?;
        self.api(resource, namespace)
            .patch(
                &name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(object),
            )
            .await
            .map_err(|e| ClientError::from_kube(e, resource, namespace, &name))
    }
}

/// In-memory object store keyed by (plural, namespace, name)
#[cfg(test)]
#[allow(clippy::unwrap_used)]
#[derive(Default)]
pub struct MockObjectClient {
    objects: std::sync::Mutex<std::collections::HashMap<(String, String, String), DynamicObject>>,
    version: std::sync::atomic::AtomicU64,
    writes: std::sync::atomic::AtomicU32,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
impl MockObjectClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_version(&self) -> String {
        (self
            .version
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst)
            + 1)
        .to_string()
    }

    /// Seed an object built from its JSON data
    pub fn insert(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
        data: serde_json::Value,
    ) {
        let mut object = DynamicObject::new(name, resource).within(namespace).data(data);
        object.metadata.resource_version = Some(self.next_version());
        self.objects.lock().unwrap().insert(
            (resource.plural.clone(), namespace.to_string(), name.to_string()),
            object,
        );
    }

    /// Seed an object with a prepared metadata/data pair
    pub fn insert_object(&self, resource: &ApiResource, namespace: &str, mut object: DynamicObject) {
        object.metadata.resource_version = Some(self.next_version());
        let name = object.metadata.name.clone().unwrap();
        self.objects
            .lock()
            .unwrap()
            .insert((resource.plural.clone(), namespace.to_string(), name), object);
    }

    pub fn object(&self, plural: &str, namespace: &str, name: &str) -> Option<DynamicObject> {
        self.objects
            .lock()
            .unwrap()
            .get(&(plural.to_string(), namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn writes(&self) -> u32 {
        self.writes.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
#[async_trait]
impl ObjectClient for MockObjectClient {
    async fn get(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<DynamicObject, ClientError> {
        self.object(&resource.plural, namespace, name)
            .ok_or_else(|| ClientError::NotFound {
                kind: resource.kind.clone(),
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
    }

    async fn replace(
        &self,
        resource: &ApiResource,
        namespace: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject, ClientError> {
        self.writes.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let name = object_name(resource, object)?;
        let key = (resource.plural.clone(), namespace.to_string(), name.clone());
        let version = self.next_version();
        let mut objects = self.objects.lock().unwrap();
        let stored = objects.get_mut(&key).ok_or_else(|| ClientError::NotFound {
            kind: resource.kind.clone(),
            namespace: namespace.to_string(),
            name: name.clone(),
        })?;
        if stored.metadata.resource_version != object.metadata.resource_version {
            return Err(ClientError::Conflict {
                kind: resource.kind.clone(),
                namespace: namespace.to_string(),
                name,
            });
        }
        let mut updated = object.clone();
        updated.metadata.resource_version = Some(version);
        *stored = updated.clone();
        Ok(updated)
    }

    async fn apply(
        &self,
        resource: &ApiResource,
        namespace: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject, ClientError> {
        self.writes.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let name = object_name(resource, object)?;
        let mut applied = object.clone();
        applied.metadata.resource_version = Some(self.next_version());
        self.objects.lock().unwrap().insert(
            (resource.plural.clone(), namespace.to_string(), name),
            applied.clone(),
        );
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use serde_json::json;

    #[test]
    fn test_api_resource_core_group() {
        let ar = api_resource("", "v1", "Service", "services");
        assert_eq!(ar.api_version, "v1");

        let ar = api_resource("networking.istio.io", "v1alpha3", "VirtualService", "virtualservices");
        assert_eq!(ar.api_version, "networking.istio.io/v1alpha3");
    }

    #[tokio::test]
    async fn test_mock_replace_checks_resource_version() {
        let ar = api_resource("split.smi-spec.io", "v1alpha1", "TrafficSplit", "trafficsplits");
        let client = MockObjectClient::new();
        client.insert(&ar, "default", "podinfo", json!({"spec": {}}));

        let mut first = client.get(&ar, "default", "podinfo").await.unwrap();
        let mut stale = first.clone();

        first.data["spec"]["service"] = json!("podinfo");
        client.replace(&ar, "default", &first).await.unwrap();

        stale.data["spec"]["service"] = json!("other");
        let err = client.replace(&ar, "default", &stale).await.unwrap_err();
        assert!(matches!(err, ClientError::Conflict { .. }));
    }
}
