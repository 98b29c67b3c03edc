//! ClusterIP services for the primary and canary variants
//!
//! Deployment-style targets get three services selecting pods by the
//! configured label: the apex and primary services select
//! `<label>=<target>-primary`, the canary service `<label>=<target>`.
//! Service-style targets already have an apex service; its selector is
//! copied onto the canary service and suffixed with `-primary` for the
//! primary service.

use super::{KubernetesRouter, RouterError, Targets};
use crate::client::{api_resource, ObjectClient};
use crate::crd::release::Release;
use async_trait::async_trait;
use kube::core::DynamicObject;
use kube::discovery::ApiResource;
use serde_json::{json, Value};
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

fn service_resource() -> ApiResource {
    api_resource("", "v1", "Service", "services")
}

fn port_entry(name: &str, port: i32, target_port: i32) -> Value {
    json!({"name": name, "port": port, "targetPort": target_port, "protocol": "TCP"})
}

/// Service ports: the release's main port first, then the workload's other named ports
fn release_ports(release: &Release, ports: &BTreeMap<String, i32>) -> Vec<Value> {
    let service = &release.spec.service;
    let main_name = service.port_name.as_deref().unwrap_or("http");
    let mut entries = vec![port_entry(
        main_name,
        service.port,
        service.target_port.unwrap_or(service.port),
    )];
    for (name, port) in ports {
        if name == main_name || *port == service.port {
            continue;
        }
        entries.push(port_entry(name, *port, *port));
    }
    entries
}

fn service_object(
    name: &str,
    namespace: &str,
    selector: &BTreeMap<String, String>,
    ports: &[Value],
    annotations: &BTreeMap<String, String>,
) -> DynamicObject {
    let mut service = DynamicObject::new(name, &service_resource())
        .within(namespace)
        .data(json!({
            "spec": {
                "type": "ClusterIP",
                "selector": selector,
                "ports": ports,
            }
        }));
    if !annotations.is_empty() {
        service.metadata.annotations = Some(annotations.clone());
    }
    service
}

async fn apply_services(
    client: &dyn ObjectClient,
    namespace: &str,
    services: Vec<DynamicObject>,
) -> Result<(), RouterError> {
    let resource = service_resource();
    for service in services {
        client.apply(&resource, namespace, &service).await?;
    }
    Ok(())
}

pub struct KubernetesDeploymentRouter {
    client: Arc<dyn ObjectClient>,
    label_selector: String,
    annotations: BTreeMap<String, String>,
    ports: BTreeMap<String, i32>,
}

impl KubernetesDeploymentRouter {
    pub fn new(
        client: Arc<dyn ObjectClient>,
        label_selector: impl Into<String>,
        annotations: BTreeMap<String, String>,
        ports: BTreeMap<String, i32>,
    ) -> Self {
        Self {
            client,
            label_selector: label_selector.into(),
            annotations,
            ports,
        }
    }

    pub fn label_selector(&self) -> &str {
        &self.label_selector
    }
}

#[async_trait]
impl KubernetesRouter for KubernetesDeploymentRouter {
    fn name(&self) -> &'static str {
        "deployment"
    }

    async fn reconcile(&self, release: &Release) -> Result<(), RouterError> {
        let targets = Targets::of(release);
        let ports = release_ports(release, &self.ports);
        let select = |value: &str| BTreeMap::from([(self.label_selector.clone(), value.to_string())]);

        let services = vec![
            service_object(
                &targets.apex,
                &targets.namespace,
                &select(&targets.primary),
                &ports,
                &self.annotations,
            ),
            service_object(
                &targets.primary,
                &targets.namespace,
                &select(&targets.primary),
                &ports,
                &self.annotations,
            ),
            service_object(
                &targets.canary,
                &targets.namespace,
                &select(&targets.apex),
                &ports,
                &self.annotations,
            ),
        ];
        apply_services(self.client.as_ref(), &targets.namespace, services).await?;

        info!(release = %targets.apex, namespace = %targets.namespace, "Services reconciled");
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct KubernetesServiceRouter {
    client: Arc<dyn ObjectClient>,
    label_selector: String,
    annotations: BTreeMap<String, String>,
    ports: BTreeMap<String, i32>,
}

impl KubernetesServiceRouter {
    pub fn new(
        client: Arc<dyn ObjectClient>,
        label_selector: impl Into<String>,
        annotations: BTreeMap<String, String>,
        ports: BTreeMap<String, i32>,
    ) -> Self {
        Self {
            client,
            label_selector: label_selector.into(),
            annotations,
            ports,
        }
    }

    pub fn label_selector(&self) -> &str {
        &self.label_selector
    }
}

#[async_trait]
impl KubernetesRouter for KubernetesServiceRouter {
    fn name(&self) -> &'static str {
        "service"
    }

    async fn reconcile(&self, release: &Release) -> Result<(), RouterError> {
        let targets = Targets::of(release);
        let apex = self
            .client
            .get(&service_resource(), &targets.namespace, &targets.apex)
            .await?;

        let selector: BTreeMap<String, String> = apex
            .data
            .pointer("/spec/selector")
            .and_then(|s| serde_json::from_value(s.clone()).ok())
            .filter(|s: &BTreeMap<String, String>| !s.is_empty())
            .ok_or_else(|| RouterError::Malformed {
                kind: "Service",
                namespace: targets.namespace.clone(),
                name: targets.apex.clone(),
                reason: "service has no selector".to_string(),
            })?;
        let primary_selector: BTreeMap<String, String> = selector
            .iter()
            .map(|(k, v)| (k.clone(), format!("{v}-primary")))
            .collect();

        let ports = match apex.data.pointer("/spec/ports").and_then(Value::as_array) {
            Some(ports) if !ports.is_empty() => ports.clone(),
            _ => release_ports(release, &self.ports),
        };

        let services = vec![
            service_object(
                &targets.primary,
                &targets.namespace,
                &primary_selector,
                &ports,
                &self.annotations,
            ),
            service_object(
                &targets.canary,
                &targets.namespace,
                &selector,
                &ports,
                &self.annotations,
            ),
        ];
        apply_services(self.client.as_ref(), &targets.namespace, services).await?;

        info!(release = %targets.apex, namespace = %targets.namespace, "Services reconciled");
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::client::MockObjectClient;
    use crate::router::testing::release;

    #[tokio::test]
    async fn test_deployment_router_creates_three_services() {
        let client = Arc::new(MockObjectClient::new());
        let router = KubernetesDeploymentRouter::new(
            client.clone(),
            "app",
            BTreeMap::from([("team".to_string(), "web".to_string())]),
            BTreeMap::from([("http".to_string(), 9898), ("grpc".to_string(), 9999)]),
        );

        router.reconcile(&release(None)).await.unwrap();

        let apex = client.object("services", "default", "podinfo").unwrap();
        let primary = client.object("services", "default", "podinfo-primary").unwrap();
        let canary = client.object("services", "default", "podinfo-canary").unwrap();

        assert_eq!(apex.data["spec"]["selector"]["app"], "podinfo-primary");
        assert_eq!(primary.data["spec"]["selector"]["app"], "podinfo-primary");
        assert_eq!(canary.data["spec"]["selector"]["app"], "podinfo");

        let ports = canary.data["spec"]["ports"].as_array().unwrap();
        assert_eq!(ports.len(), 2);
        assert_eq!(ports[0]["name"], "http");
        assert_eq!(ports[0]["port"], 9898);
        assert_eq!(ports[1]["name"], "grpc");
        assert_eq!(apex.metadata.annotations.unwrap()["team"], "web");
    }

    #[tokio::test]
    async fn test_service_router_derives_selectors_from_target() {
        let client = Arc::new(MockObjectClient::new());
        client.insert(
            &service_resource(),
            "default",
            "podinfo",
            json!({"spec": {
                "selector": {"app": "podinfo", "tier": "backend"},
                "ports": [{"name": "http", "port": 80, "targetPort": 9898}]
            }}),
        );
        let router =
            KubernetesServiceRouter::new(client.clone(), "app", BTreeMap::new(), BTreeMap::new());

        router.reconcile(&release(None)).await.unwrap();

        let primary = client.object("services", "default", "podinfo-primary").unwrap();
        let canary = client.object("services", "default", "podinfo-canary").unwrap();
        assert_eq!(primary.data["spec"]["selector"]["app"], "podinfo-primary");
        assert_eq!(primary.data["spec"]["selector"]["tier"], "backend-primary");
        assert_eq!(canary.data["spec"]["selector"]["tier"], "backend");
        assert_eq!(canary.data["spec"]["ports"][0]["port"], 80);
        // Apex is the target itself and only read
        assert_eq!(client.writes(), 2);
    }

    #[tokio::test]
    async fn test_service_router_requires_target_service() {
        let router = KubernetesServiceRouter::new(
            Arc::new(MockObjectClient::new()),
            "app",
            BTreeMap::new(),
            BTreeMap::new(),
        );
        let err = router.reconcile(&release(None)).await.unwrap_err();
        assert!(matches!(err, RouterError::Client(e) if e.is_not_found()));
    }
}
