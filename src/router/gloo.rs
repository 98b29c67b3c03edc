use super::{integer_weight, RouteWeights, Router, RouterError, Targets, WeightedRoutes};
use crate::client::{api_resource, ObjectClient};
use crate::crd::release::Release;
use async_trait::async_trait;
use kube::discovery::ApiResource;
use serde_json::Value;
use std::any::Any;
use std::sync::Arc;
use tracing::info;

pub const DEFAULT_UPSTREAM_DISCOVERY_NAMESPACE: &str = "gloo-system";

fn upstream_group() -> ApiResource {
    api_resource("gloo.solo.io", "v1", "UpstreamGroup", "upstreamgroups")
}

fn upstream(entry: &Value) -> Option<&str> {
    entry
        .pointer("/destination/upstream/name")
        .and_then(Value::as_str)
}

const ROUTES: WeightedRoutes = WeightedRoutes {
    kind: "UpstreamGroup",
    pointer: "/spec/destinations",
    destination: upstream,
    encode: integer_weight,
};

/// Splits traffic through the `<target>` Gloo UpstreamGroup
///
/// Upstreams are the ones Gloo discovery creates for the primary and canary
/// services: `<namespace>-<service>-<port>`.
pub struct GlooRouter {
    client: Arc<dyn ObjectClient>,
    upstream_discovery_namespace: String,
}

impl GlooRouter {
    pub fn new(client: Arc<dyn ObjectClient>, upstream_discovery_namespace: impl Into<String>) -> Self {
        Self {
            client,
            upstream_discovery_namespace: upstream_discovery_namespace.into(),
        }
    }

    pub fn upstream_discovery_namespace(&self) -> &str {
        &self.upstream_discovery_namespace
    }

    fn upstream_names(&self, release: &Release, targets: &Targets) -> (String, String) {
        let port = release.spec.service.port;
        (
            format!("{}-{}-{}", targets.namespace, targets.primary, port),
            format!("{}-{}-{}", targets.namespace, targets.canary, port),
        )
    }
}

#[async_trait]
impl Router for GlooRouter {
    fn name(&self) -> &'static str {
        "gloo"
    }

    async fn get_routes(&self, release: &Release) -> Result<RouteWeights, RouterError> {
        let targets = Targets::of(release);
        let (primary, canary) = self.upstream_names(release, &targets);
        let group = self
            .client
            .get(&upstream_group(), &targets.namespace, &targets.apex)
            .await?;
        ROUTES.read(&group, &primary, &canary)
    }

    async fn set_routes(&self, release: &Release, weights: RouteWeights) -> Result<(), RouterError> {
        weights.validate()?;
        let targets = Targets::of(release);
        let (primary, canary) = self.upstream_names(release, &targets);
        let resource = upstream_group();

        let mut group = self
            .client
            .get(&resource, &targets.namespace, &targets.apex)
            .await?;
        ROUTES.write(&mut group, &primary, &canary, weights)?;
        self.client
            .replace(&resource, &targets.namespace, &group)
            .await?;

        info!(
            upstream_group = %targets.apex,
            namespace = %targets.namespace,
            discovery_namespace = %self.upstream_discovery_namespace,
            primary = weights.primary,
            canary = weights.canary,
            "UpstreamGroup weights updated"
        );
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
    use serde_json::json;

    fn destination(name: &str, weight: i32) -> Value {
        json!({
            "destination": {"upstream": {"name": name, "namespace": "gloo-system"}},
            "weight": weight
        })
    }

    #[tokio::test]
    async fn test_routes_address_discovered_upstreams() {
        let client = Arc::new(MockObjectClient::new());
        client.insert(
            &upstream_group(),
            "default",
            "podinfo",
            json!({"spec": {"destinations": [
                destination("default-podinfo-primary-9898", 90),
                destination("default-podinfo-canary-9898", 10)
            ]}}),
        );
        let router = GlooRouter::new(client.clone(), DEFAULT_UPSTREAM_DISCOVERY_NAMESPACE);
        let release = release(Some("gloo"));

        assert_eq!(
            router.get_routes(&release).await.unwrap(),
            RouteWeights::canary(10).unwrap()
        );

        router
            .set_routes(&release, RouteWeights::canary(0).unwrap())
            .await
            .unwrap();
        let group = client.object("upstreamgroups", "default", "podinfo").unwrap();
        assert_eq!(group.data["spec"]["destinations"][0]["weight"], 100);
        assert_eq!(group.data["spec"]["destinations"][1]["weight"], 0);
    }

    #[tokio::test]
    async fn test_wrong_port_upstreams_are_missing() {
        let client = Arc::new(MockObjectClient::new());
        client.insert(
            &upstream_group(),
            "default",
            "podinfo",
            json!({"spec": {"destinations": [
                destination("default-podinfo-primary-8080", 100)
            ]}}),
        );
        let router = GlooRouter::new(client, "gloo-system");

        let err = router.get_routes(&release(None)).await.unwrap_err();
        assert!(matches!(err, RouterError::MissingRoute { .. }));
    }
}
