//! Telemetry observers for canary analysis
//!
//! Each observer owns the PromQL for one telemetry backend and reduces it to
//! two numbers: the percentage of non-5xx requests and the p99 latency.

pub mod envoy;
pub mod gloo;
pub mod istio;
pub mod linkerd;
pub mod nginx;
pub mod prometheus;

pub use envoy::EnvoyObserver;
pub use gloo::GlooObserver;
pub use istio::IstioObserver;
pub use linkerd::LinkerdObserver;
pub use nginx::NginxObserver;
pub use prometheus::{MetricsError, MetricsQuerier, PrometheusClient};

use async_trait::async_trait;
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

#[async_trait]
pub trait Observer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Percentage (0-100) of requests not answered with a 5xx over `interval`
    async fn request_success_rate(
        &self,
        name: &str,
        namespace: &str,
        interval: &str,
    ) -> Result<f64, MetricsError>;

    /// 99th percentile request latency over `interval`
    async fn request_duration(
        &self,
        name: &str,
        namespace: &str,
        interval: &str,
    ) -> Result<Duration, MetricsError>;

    fn as_any(&self) -> &dyn Any;
}

/// Unit a backend reports latency in
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum LatencyUnit {
    Seconds,
    Milliseconds,
}

pub(crate) fn latency(value: f64, unit: LatencyUnit) -> Result<Duration, MetricsError> {
    let millis = match unit {
        LatencyUnit::Seconds => value * 1000.0,
        LatencyUnit::Milliseconds => value,
    };
    if millis < 0.0 {
        return Err(MetricsError::Parse(format!("negative latency {value}")));
    }
    Ok(Duration::from_nanos((millis * 1_000_000.0).round() as u64))
}

/// Picks the observer matching a mesh provider string
pub struct ObserverFactory {
    querier: Arc<dyn MetricsQuerier>,
}

impl ObserverFactory {
    pub fn new(querier: Arc<dyn MetricsQuerier>) -> Self {
        Self { querier }
    }

    pub fn observer(&self, provider: &str) -> Box<dyn Observer> {
        let querier = self.querier.clone();
        match provider {
            "appmesh" | "supergloo:appmesh" => Box::new(EnvoyObserver::new(querier)),
            "linkerd" | "smi:linkerd" | "supergloo:linkerd" => {
                Box::new(LinkerdObserver::new(querier))
            }
            "nginx" => Box::new(NginxObserver::new(querier)),
            p if p.starts_with("gloo") => Box::new(GlooObserver::new(querier)),
            _ => Box::new(IstioObserver::new(querier)),
        }
    }
}
