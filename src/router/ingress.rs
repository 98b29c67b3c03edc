use super::{RouteWeights, Router, RouterError, Targets};
use crate::client::{api_resource, ObjectClient};
use crate::crd::release::Release;
use async_trait::async_trait;
use kube::discovery::ApiResource;
use std::any::Any;
use std::sync::Arc;
use tracing::info;

fn ingress() -> ApiResource {
    api_resource("networking.k8s.io", "v1", "Ingress", "ingresses")
}

/// Splits traffic with nginx canary annotations on the `<target>-canary` Ingress
///
/// The primary weight is implied: `100 - canary-weight`, so only splits
/// summing to 100 can be written.
pub struct IngressRouter {
    client: Arc<dyn ObjectClient>,
    annotations_prefix: String,
}

impl IngressRouter {
    pub fn new(client: Arc<dyn ObjectClient>, annotations_prefix: impl Into<String>) -> Self {
        Self {
            client,
            annotations_prefix: annotations_prefix.into(),
        }
    }

    pub fn annotations_prefix(&self) -> &str {
        &self.annotations_prefix
    }

    fn canary_key(&self) -> String {
        format!("{}/canary", self.annotations_prefix)
    }

    fn weight_key(&self) -> String {
        format!("{}/canary-weight", self.annotations_prefix)
    }
}

#[async_trait]
impl Router for IngressRouter {
    fn name(&self) -> &'static str {
        "nginx"
    }

    async fn get_routes(&self, release: &Release) -> Result<RouteWeights, RouterError> {
        let targets = Targets::of(release);
        let canary = self
            .client
            .get(&ingress(), &targets.namespace, &targets.canary)
            .await?;

        let annotations = canary.metadata.annotations.unwrap_or_default();
        if annotations.get(&self.canary_key()).map(String::as_str) != Some("true") {
            return Ok(RouteWeights {
                primary: 100,
                canary: 0,
            });
        }

        let weight = annotations
            .get(&self.weight_key())
            .ok_or_else(|| RouterError::Malformed {
                kind: "Ingress",
                namespace: targets.namespace.clone(),
                name: targets.canary.clone(),
                reason: format!("missing {} annotation", self.weight_key()),
            })?;
        let canary_weight: i32 = weight.parse().map_err(|_| RouterError::Malformed {
            kind: "Ingress",
            namespace: targets.namespace.clone(),
            name: targets.canary.clone(),
            reason: format!("canary weight {weight:?} is not an integer"),
        })?;

        RouteWeights::canary(canary_weight)
    }

    async fn set_routes(&self, release: &Release, weights: RouteWeights) -> Result<(), RouterError> {
        weights.validate()?;
        if !weights.is_complementary() {
            return Err(RouterError::InvalidWeights {
                primary: weights.primary,
                canary: weights.canary,
            });
        }
        let targets = Targets::of(release);
        let resource = ingress();

        let mut canary = self
            .client
            .get(&resource, &targets.namespace, &targets.canary)
            .await?;
        let annotations = canary
            .metadata
            .annotations
            .get_or_insert_with(Default::default);
        let enabled = if weights.canary > 0 { "true" } else { "false" };
        annotations.insert(self.canary_key(), enabled.to_string());
        annotations.insert(self.weight_key(), weights.canary.to_string());

        self.client
            .replace(&resource, &targets.namespace, &canary)
            .await?;

        info!(
            ingress = %targets.canary,
            namespace = %targets.namespace,
            canary = weights.canary,
            "Ingress canary weight updated"
        );
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
