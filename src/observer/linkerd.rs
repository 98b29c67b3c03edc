//! Linkerd proxy metrics (`response_total`, `response_latency_ms`)

use super::prometheus::{MetricsError, MetricsQuerier};
use super::{latency, LatencyUnit, Observer};
use async_trait::async_trait;
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

pub struct LinkerdObserver {
    querier: Arc<dyn MetricsQuerier>,
}

impl LinkerdObserver {
    pub fn new(querier: Arc<dyn MetricsQuerier>) -> Self {
        Self { querier }
    }

    pub fn success_rate_query(name: &str, namespace: &str, interval: &str) -> String {
        format!(
            r#"sum(rate(response_total{{namespace="{namespace}",deployment=~"{name}",classification!="failure",direction="inbound"}}[{interval}])) / sum(rate(response_total{{namespace="{namespace}",deployment=~"{name}",direction="inbound"}}[{interval}])) * 100"#
        )
    }

    pub fn duration_query(name: &str, namespace: &str, interval: &str) -> String {
        format!(
            r#"histogram_quantile(0.99, sum(rate(response_latency_ms_bucket{{namespace="{namespace}",deployment=~"{name}",direction="inbound"}}[{interval}])) by (le))"#
        )
    }
}

#[async_trait]
impl Observer for LinkerdObserver {
    fn name(&self) -> &'static str {
        "linkerd"
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
        latency(value, LatencyUnit::Milliseconds)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
