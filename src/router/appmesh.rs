use super::{integer_weight, RouteWeights, Router, RouterError, Targets, WeightedRoutes};
use crate::client::{api_resource, ObjectClient};
use crate::crd::release::Release;
use async_trait::async_trait;
use kube::discovery::ApiResource;
use serde_json::Value;
use std::any::Any;
use std::sync::Arc;
use tracing::info;

fn virtual_service() -> ApiResource {
    api_resource("appmesh.k8s.aws", "v1beta1", "VirtualService", "virtualservices")
}

fn virtual_node(entry: &Value) -> Option<&str> {
    entry.get("virtualNodeName").and_then(Value::as_str)
}

const ROUTES: WeightedRoutes = WeightedRoutes {
    kind: "VirtualService",
    pointer: "/spec/routes/0/http/action/weightedTargets",
    destination: virtual_node,
    encode: integer_weight,
};

/// Splits traffic between the primary and canary virtual nodes of the
/// `<target>.<namespace>` App Mesh virtual service
pub struct AppMeshRouter {
    client: Arc<dyn ObjectClient>,
}

impl AppMeshRouter {
    pub fn new(client: Arc<dyn ObjectClient>) -> Self {
        Self { client }
    }
}

fn service_name(targets: &Targets) -> String {
    format!("{}.{}", targets.apex, targets.namespace)
}

#[async_trait]
impl Router for AppMeshRouter {
    fn name(&self) -> &'static str {
        "appmesh"
    }

    async fn get_routes(&self, release: &Release) -> Result<RouteWeights, RouterError> {
        let targets = Targets::of(release);
        let vs = self
            .client
            .get(&virtual_service(), &targets.namespace, &service_name(&targets))
            .await?;
        ROUTES.read(&vs, &targets.primary, &targets.canary)
    }

    async fn set_routes(&self, release: &Release, weights: RouteWeights) -> Result<(), RouterError> {
        weights.validate()?;
        let targets = Targets::of(release);
        let resource = virtual_service();
        let name = service_name(&targets);

        let mut vs = self.client.get(&resource, &targets.namespace, &name).await?;
        ROUTES.write(&mut vs, &targets.primary, &targets.canary, weights)?;
        self.client.replace(&resource, &targets.namespace, &vs).await?;

        info!(
            virtual_service = %name,
            namespace = %targets.namespace,
            primary = weights.primary,
            canary = weights.canary,
            "App Mesh weights updated"
        );
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
