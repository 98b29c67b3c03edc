//! NGINX ingress controller metrics, keyed by the canary ingress name

use super::prometheus::{MetricsError, MetricsQuerier};
use super::{latency, LatencyUnit, Observer};
use async_trait::async_trait;
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

pub struct NginxObserver {
    querier: Arc<dyn MetricsQuerier>,
}

impl NginxObserver {
    pub fn new(querier: Arc<dyn MetricsQuerier>) -> Self {
        Self { querier }
    }

    pub fn success_rate_query(name: &str, namespace: &str, interval: &str) -> String {
        format!(
            r#"sum(rate(nginx_ingress_controller_requests{{namespace="{namespace}",ingress="{name}",status!~"5.*"}}[{interval}])) / sum(rate(nginx_ingress_controller_requests{{namespace="{namespace}",ingress="{name}"}}[{interval}])) * 100"#
        )
    }

    /// Mean upstream latency; the controller exports no per-ingress histogram
    pub fn duration_query(name: &str, namespace: &str, interval: &str) -> String {
        format!(
            r#"sum(rate(nginx_ingress_controller_ingress_upstream_latency_seconds_sum{{namespace="{namespace}",ingress="{name}"}}[{interval}])) / sum(rate(nginx_ingress_controller_ingress_upstream_latency_seconds_count{{namespace="{namespace}",ingress="{name}"}}[{interval}])) * 1000"#
        )
    }
}

#[async_trait]
impl Observer for NginxObserver {
    fn name(&self) -> &'static str {
        "nginx"
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

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::observer::prometheus::MockQuerier;

    #[tokio::test]
    async fn test_queries_select_ingress() {
        let querier = Arc::new(MockQuerier::returning(42.0));
        let observer = NginxObserver::new(querier.clone());

        observer
            .request_success_rate("podinfo", "default", "1m")
            .await
            .unwrap();
        let duration = observer
            .request_duration("podinfo", "default", "1m")
            .await
            .unwrap();

        assert_eq!(duration, Duration::from_millis(42));
        let queries = querier.queries();
        assert!(queries[0].contains(r#"ingress="podinfo",status!~"5.*""#));
        assert!(queries[1].ends_with("* 1000"));
    }
}
