//! HTTP endpoints and process lifecycle
//!
//! Kubernetes probes and the metrics scrape endpoint are served with axum;
//! SIGTERM/SIGINT trigger a coordinated shutdown.

mod health;
pub mod metrics;
pub mod shutdown;

pub use health::{run_health_server, serve, ReadinessState};
pub use metrics::{create_metrics, ControllerMetrics, SharedMetrics};
pub use shutdown::{shutdown_channel, wait_for_signal, ShutdownController, ShutdownSignal};

#[cfg(test)]
#[path = "health_test.rs"]
mod health_tests;

#[cfg(test)]
#[path = "shutdown_test.rs"]
mod shutdown_tests;
