//! Istio telemetry (`istio_requests_total`, reported by the destination proxy)

use super::prometheus::{MetricsError, MetricsQuerier};
use super::{latency, LatencyUnit, Observer};
use async_trait::async_trait;
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

pub struct IstioObserver {
    querier: Arc<dyn MetricsQuerier>,
}

impl IstioObserver {
    pub fn new(querier: Arc<dyn MetricsQuerier>) -> Self {
        Self { querier }
    }

    pub fn success_rate_query(name: &str, namespace: &str, interval: &str) -> String {
        format!(
            r#"sum(rate(istio_requests_total{{reporter="destination",destination_workload_namespace="{namespace}",destination_workload=~"{name}",response_code!~"5.*"}}[{interval}])) / sum(rate(istio_requests_total{{reporter="destination",destination_workload_namespace="{namespace}",destination_workload=~"{name}"}}[{interval}])) * 100"#
        )
    }

    pub fn duration_query(name: &str, namespace: &str, interval: &str) -> String {
        format!(
            r#"histogram_quantile(0.99, sum(rate(istio_request_duration_seconds_bucket{{reporter="destination",destination_workload_namespace="{namespace}",destination_workload=~"{name}"}}[{interval}])) by (le))"#
        )
    }
}

#[async_trait]
impl Observer for IstioObserver {
    fn name(&self) -> &'static str {
        "istio"
    }

    async fn request_success_rate(
        &self,
        name: &str,
        namespace: &str,
        interval: &str,
    ) -> Result<f64, MetricsError> {
        self.querier
            .query(&Self::success_rate_query(name, namespace, interval))
            .await
    }

    // Istio reports latency histograms in seconds
    async fn request_duration(
        &self,
        name: &str,
        namespace: &str,
        interval: &str,
    ) -> Result<Duration, MetricsError> {
        let value = self
            .querier
            .query(&Self::duration_query(name, namespace, interval))
            .await?;
        latency(value, LatencyUnit::Seconds)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
