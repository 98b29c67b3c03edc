use super::{RouteWeights, Router, RouterError, Targets, WeightedRoutes};
use crate::client::{api_resource, ObjectClient};
use crate::crd::release::Release;
use async_trait::async_trait;
use kube::discovery::ApiResource;
use serde_json::Value;
use std::any::Any;
use std::sync::Arc;
use tracing::info;

/// Annotation recording which mesh implementation owns the split
pub const TARGET_MESH_ANNOTATION: &str = "serin.io/target-mesh";

fn traffic_split() -> ApiResource {
    api_resource("split.smi-spec.io", "v1alpha1", "TrafficSplit", "trafficsplits")
}

fn service(entry: &Value) -> Option<&str> {
    entry.get("service").and_then(Value::as_str)
}

/// TrafficSplit weights are quantities, written as decimal strings
fn quantity(weight: i32) -> Value {
    Value::String(weight.to_string())
}

const ROUTES: WeightedRoutes = WeightedRoutes {
    kind: "TrafficSplit",
    pointer: "/spec/backends",
    destination: service,
    encode: quantity,
};

/// Splits traffic through the `<target>` SMI TrafficSplit
pub struct SmiRouter {
    client: Arc<dyn ObjectClient>,
    target_mesh: String,
}

impl SmiRouter {
    pub fn new(client: Arc<dyn ObjectClient>, target_mesh: impl Into<String>) -> Self {
        Self {
            client,
            target_mesh: target_mesh.into(),
        }
    }

    pub fn target_mesh(&self) -> &str {
        &self.target_mesh
    }
}

#[async_trait]
impl Router for SmiRouter {
    fn name(&self) -> &'static str {
        "smi"
    }

    async fn get_routes(&self, release: &Release) -> Result<RouteWeights, RouterError> {
        let targets = Targets::of(release);
        let split = self
            .client
            .get(&traffic_split(), &targets.namespace, &targets.apex)
            .await?;
        ROUTES.read(&split, &targets.primary, &targets.canary)
    }

    async fn set_routes(&self, release: &Release, weights: RouteWeights) -> Result<(), RouterError> {
        weights.validate()?;
        let targets = Targets::of(release);
        let resource = traffic_split();

        let mut split = self
            .client
            .get(&resource, &targets.namespace, &targets.apex)
            .await?;
        ROUTES.write(&mut split, &targets.primary, &targets.canary, weights)?;
        split
            .metadata
            .annotations
            .get_or_insert_with(Default::default)
            .insert(TARGET_MESH_ANNOTATION.to_string(), self.target_mesh.clone());
        self.client
            .replace(&resource, &targets.namespace, &split)
            .await?;

        info!(
            traffic_split = %targets.apex,
            namespace = %targets.namespace,
            mesh = %self.target_mesh,
            primary = weights.primary,
            canary = weights.canary,
            "TrafficSplit weights updated"
        );
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
