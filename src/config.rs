//! Controller configuration from `SERIN_*` environment variables

use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_METRICS_SERVER: &str = "http://prometheus:9090";
pub const DEFAULT_MESH_PROVIDER: &str = "istio";
pub const DEFAULT_INGRESS_ANNOTATIONS_PREFIX: &str = "nginx.ingress.kubernetes.io";
pub const DEFAULT_SELECTOR_LABEL: &str = "app";
pub const DEFAULT_HEALTH_PORT: u16 = 8080;

const DEFAULT_METRICS_TIMEOUT_SECONDS: u64 = 5;
const DEFAULT_REQUEUE_SECONDS: u64 = 30;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub metrics_server: String,
    pub metrics_timeout: Duration,
    /// Router provider for releases without `spec.provider`
    pub mesh_provider: String,
    pub ingress_annotations_prefix: String,
    pub selector_label: String,
    /// Watch a single namespace instead of the whole cluster
    pub namespace: Option<String>,
    pub health_port: u16,
    pub requeue: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            metrics_server: DEFAULT_METRICS_SERVER.to_string(),
            metrics_timeout: Duration::from_secs(DEFAULT_METRICS_TIMEOUT_SECONDS),
            mesh_provider: DEFAULT_MESH_PROVIDER.to_string(),
            ingress_annotations_prefix: DEFAULT_INGRESS_ANNOTATIONS_PREFIX.to_string(),
            selector_label: DEFAULT_SELECTOR_LABEL.to_string(),
            namespace: None,
            health_port: DEFAULT_HEALTH_PORT,
            requeue: Duration::from_secs(DEFAULT_REQUEUE_SECONDS),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup; empty values count as unset
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        Self {
            metrics_server: get("SERIN_METRICS_SERVER").unwrap_or(defaults.metrics_server),
            metrics_timeout: Duration::from_secs(parse_or(
                "SERIN_METRICS_TIMEOUT_SECONDS",
                get("SERIN_METRICS_TIMEOUT_SECONDS"),
                DEFAULT_METRICS_TIMEOUT_SECONDS,
            )),
            mesh_provider: get("SERIN_MESH_PROVIDER").unwrap_or(defaults.mesh_provider),
            ingress_annotations_prefix: get("SERIN_INGRESS_ANNOTATIONS_PREFIX")
                .unwrap_or(defaults.ingress_annotations_prefix),
            selector_label: get("SERIN_SELECTOR_LABEL").unwrap_or(defaults.selector_label),
            namespace: get("SERIN_NAMESPACE"),
            health_port: parse_or(
                "SERIN_HEALTH_PORT",
                get("SERIN_HEALTH_PORT"),
                DEFAULT_HEALTH_PORT,
            ),
            requeue: Duration::from_secs(parse_or(
                "SERIN_REQUEUE_SECONDS",
                get("SERIN_REQUEUE_SECONDS"),
                DEFAULT_REQUEUE_SECONDS,
            )),
        }
    }
}

fn parse_or<T: FromStr + std::fmt::Display + Copy>(key: &str, value: Option<String>, default: T) -> T {
    match value {
        None => default,
        Some(raw) => match raw.trim().parse() {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!(variable = %key, value = %raw, default = %default, "Invalid value, using default");
                default
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        assert_eq!(Config::from_lookup(lookup(&[])), Config::default());
        let config = Config::default();
        assert_eq!(config.metrics_server, "http://prometheus:9090");
        assert_eq!(config.metrics_timeout, Duration::from_secs(5));
        assert_eq!(config.mesh_provider, "istio");
        assert_eq!(config.requeue, Duration::from_secs(30));
        assert!(config.namespace.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("SERIN_METRICS_SERVER", "http://thanos:9090"),
            ("SERIN_METRICS_TIMEOUT_SECONDS", "2"),
            ("SERIN_MESH_PROVIDER", "gloo:gloo-system"),
            ("SERIN_INGRESS_ANNOTATIONS_PREFIX", "custom.ingress"),
            ("SERIN_SELECTOR_LABEL", "name"),
            ("SERIN_NAMESPACE", "apps"),
            ("SERIN_HEALTH_PORT", "9000"),
            ("SERIN_REQUEUE_SECONDS", " 15 "),
        ]));

        assert_eq!(config.metrics_server, "http://thanos:9090");
        assert_eq!(config.metrics_timeout, Duration::from_secs(2));
        assert_eq!(config.mesh_provider, "gloo:gloo-system");
        assert_eq!(config.ingress_annotations_prefix, "custom.ingress");
        assert_eq!(config.selector_label, "name");
        assert_eq!(config.namespace.as_deref(), Some("apps"));
        assert_eq!(config.health_port, 9000);
        assert_eq!(config.requeue, Duration::from_secs(15));
    }

    #[test]
    fn test_invalid_numbers_fall_back() {
        let config = Config::from_lookup(lookup(&[
            ("SERIN_HEALTH_PORT", "70000"),
            ("SERIN_REQUEUE_SECONDS", "soon"),
            ("SERIN_METRICS_TIMEOUT_SECONDS", "-1"),
        ]));
        assert_eq!(config.health_port, DEFAULT_HEALTH_PORT);
        assert_eq!(config.requeue, Duration::from_secs(30));
        assert_eq!(config.metrics_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_empty_values_count_as_unset() {
        let config = Config::from_lookup(lookup(&[("SERIN_NAMESPACE", ""), ("SERIN_MESH_PROVIDER", " ")]));
        assert!(config.namespace.is_none());
        assert_eq!(config.mesh_provider, "istio");
    }
}
