//! Router selection from provider strings

use super::appmesh::AppMeshRouter;
use super::gloo::{GlooRouter, DEFAULT_UPSTREAM_DISCOVERY_NAMESPACE};
use super::ingress::IngressRouter;
use super::istio::IstioRouter;
use super::kubernetes::{KubernetesDeploymentRouter, KubernetesServiceRouter};
use super::nop::NopRouter;
use super::smi::SmiRouter;
use super::{KubernetesRouter, Router};
use crate::client::ObjectClient;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

/// Builds routers with exactly the collaborators each backend needs
pub struct RouterFactory {
    client: Arc<dyn ObjectClient>,
    ingress_annotations_prefix: String,
}

impl RouterFactory {
    pub fn new(client: Arc<dyn ObjectClient>, ingress_annotations_prefix: impl Into<String>) -> Self {
        Self {
            client,
            ingress_annotations_prefix: ingress_annotations_prefix.into(),
        }
    }

    /// Service router for the target kind; anything but `Service` is Deployment-style
    pub fn kubernetes_router(
        &self,
        kind: &str,
        label_selector: &str,
        annotations: BTreeMap<String, String>,
        ports: BTreeMap<String, i32>,
    ) -> Box<dyn KubernetesRouter> {
        match kind {
            "Service" => Box::new(KubernetesServiceRouter::new(
                self.client.clone(),
                label_selector,
                annotations,
                ports,
            )),
            _ => Box::new(KubernetesDeploymentRouter::new(
                self.client.clone(),
                label_selector,
                annotations,
                ports,
            )),
        }
    }

    /// Traffic router for a provider string
    ///
    /// Matching is case-sensitive and the first matching rule wins. Unknown
    /// providers fall back to Istio.
    pub fn mesh_router(&self, provider: &str) -> Box<dyn Router> {
        let client = self.client.clone();
        match provider {
            "none" | "kubernetes" => Box::new(NopRouter),
            "nginx" => Box::new(IngressRouter::new(
                client,
                self.ingress_annotations_prefix.clone(),
            )),
            "appmesh" => Box::new(AppMeshRouter::new(client)),
            p if p.starts_with("smi:") => {
                Box::new(SmiRouter::new(client, &p["smi:".len()..]))
            }
            "linkerd" => Box::new(SmiRouter::new(client, "linkerd")),
            p if p.starts_with("gloo") => {
                let namespace = p
                    .strip_prefix("gloo:")
                    .unwrap_or(DEFAULT_UPSTREAM_DISCOVERY_NAMESPACE);
                Box::new(GlooRouter::new(client, namespace))
            }
            p if p.starts_with("supergloo:appmesh") => Box::new(AppMeshRouter::new(client)),
            p if p.starts_with("supergloo:istio") => Box::new(IstioRouter::new(client)),
            p if p.starts_with("supergloo:linkerd") => Box::new(SmiRouter::new(client, "linkerd")),
            "istio" => Box::new(IstioRouter::new(client)),
            other => {
                warn!(provider = %other, "Unrecognized mesh provider, using istio");
                Box::new(IstioRouter::new(client))
            }
        }
    }
}

#[cfg(test)]
#[path = "factory_test.rs"]
mod tests;
