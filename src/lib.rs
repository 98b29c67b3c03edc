//! Progressive delivery core for canary releases on Kubernetes
//!
//! The library holds the release status store, drift detection, traffic
//! routers and telemetry observers. The `serin` binary wires them into a
//! kube-rs controller.

pub mod client;
pub mod config;
pub mod controller;
pub mod crd;
pub mod observer;
pub mod router;
pub mod server;
