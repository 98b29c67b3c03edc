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
    api_resource("networking.istio.io", "v1alpha3", "VirtualService", "virtualservices")
}

fn host(entry: &Value) -> Option<&str> {
    entry.pointer("/destination/host").and_then(Value::as_str)
}

const ROUTES: WeightedRoutes = WeightedRoutes {
    kind: "VirtualService",
    pointer: "/spec/http/0/route",
    destination: host,
    encode: integer_weight,
};

/// Splits traffic through the first HTTP route of the `<target>` VirtualService
pub struct IstioRouter {
    client: Arc<dyn ObjectClient>,
}

impl IstioRouter {
    pub fn new(client: Arc<dyn ObjectClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Router for IstioRouter {
    fn name(&self) -> &'static str {
        "istio"
    }

    async fn get_routes(&self, release: &Release) -> Result<RouteWeights, RouterError> {
        let targets = Targets::of(release);
        let vs = self
            .client
            .get(&virtual_service(), &targets.namespace, &targets.apex)
            .await?;
        ROUTES.read(&vs, &targets.primary, &targets.canary)
    }

    async fn set_routes(&self, release: &Release, weights: RouteWeights) -> Result<(), RouterError> {
        weights.validate()?;
        let targets = Targets::of(release);
        let resource = virtual_service();

        let mut vs = self
            .client
            .get(&resource, &targets.namespace, &targets.apex)
            .await?;
        ROUTES.write(&mut vs, &targets.primary, &targets.canary, weights)?;
        self.client.replace(&resource, &targets.namespace, &vs).await?;

        info!(
            virtual_service = %targets.apex,
            namespace = %targets.namespace,
            primary = weights.primary,
            canary = weights.canary,
            "VirtualService weights updated"
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

    fn client() -> Arc<MockObjectClient> {
        let client = Arc::new(MockObjectClient::new());
        client.insert(
            &virtual_service(),
            "default",
            "podinfo",
            json!({"spec": {
                "hosts": ["podinfo"],
                "http": [{"route": [
                    {"destination": {"host": "podinfo-primary", "port": {"number": 9898}}, "weight": 100},
                    {"destination": {"host": "podinfo-canary", "port": {"number": 9898}}, "weight": 0}
                ]}]
            }}),
        );
        client
    }

    #[tokio::test]
    async fn test_get_and_set_routes() {
        let client = client();
        let router = IstioRouter::new(client.clone());
        let release = release(Some("istio"));

        assert_eq!(
            router.get_routes(&release).await.unwrap(),
            RouteWeights {
                primary: 100,
                canary: 0
            }
        );

        router
            .set_routes(&release, RouteWeights::canary(30).unwrap())
            .await
            .unwrap();
        assert_eq!(
            router.get_routes(&release).await.unwrap(),
            RouteWeights {
                primary: 70,
                canary: 30
            }
        );

        // Other destination fields are untouched
        let vs = client.object("virtualservices", "default", "podinfo").unwrap();
        assert_eq!(vs.data["spec"]["http"][0]["route"][1]["destination"]["port"]["number"], 9898);
    }

    #[tokio::test]
    async fn test_missing_virtual_service() {
        let router = IstioRouter::new(Arc::new(MockObjectClient::new()));
        let err = router.get_routes(&release(None)).await.unwrap_err();
        assert!(matches!(err, RouterError::Client(e) if e.is_not_found()));
    }

    #[tokio::test]
    async fn test_missing_canary_destination_leaves_resource_untouched() {
        let client = Arc::new(MockObjectClient::new());
        client.insert(
            &virtual_service(),
            "default",
            "podinfo",
            json!({"spec": {"http": [{"route": [
                {"destination": {"host": "podinfo-primary"}, "weight": 100}
            ]}]}}),
        );
        let router = IstioRouter::new(client.clone());

        let err = router
            .set_routes(&release(None), RouteWeights::canary(10).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::MissingRoute { ref destination, .. } if destination == "podinfo-canary"));
        assert_eq!(client.writes(), 0);
    }

    #[tokio::test]
    async fn test_invalid_weights_rejected_before_io() {
        let client = client();
        let router = IstioRouter::new(client.clone());
        let err = router
            .set_routes(
                &release(None),
                RouteWeights {
                    primary: 150,
                    canary: -50,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::InvalidWeights { .. }));
        assert_eq!(client.writes(), 0);
    }
}
