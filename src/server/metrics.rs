//! Prometheus metrics for the controller
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `serin_status_writes_total` | Counter | `operation`, `result` |
//! | `serin_status_conflicts_total` | Counter | `operation` |
//! | `serin_reconciliations_total` | Counter | `result` |
//! | `serin_reconciliation_duration_seconds` | Histogram | `result` |

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

pub type SharedMetrics = Arc<ControllerMetrics>;

pub struct ControllerMetrics {
    registry: Registry,
    status_writes: IntCounterVec,
    status_conflicts: IntCounterVec,
    reconciliations: IntCounterVec,
    reconciliation_duration: HistogramVec,
}

/// Create and register all controller metrics
pub fn create_metrics() -> Result<SharedMetrics, prometheus::Error> {
    let registry = Registry::new();

    let status_writes = IntCounterVec::new(
        Opts::new("serin_status_writes_total", "Release status write attempts"),
        &["operation", "result"],
    )?;
    let status_conflicts = IntCounterVec::new(
        Opts::new(
            "serin_status_conflicts_total",
            "Release status writes rejected because of a version conflict",
        ),
        &["operation"],
    )?;
    let reconciliations = IntCounterVec::new(
        Opts::new("serin_reconciliations_total", "Reconcile ticks by outcome"),
        &["result"],
    )?;
    let reconciliation_duration = HistogramVec::new(
        HistogramOpts::new(
            "serin_reconciliation_duration_seconds",
            "Duration of reconcile ticks",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        &["result"],
    )?;

    registry.register(Box::new(status_writes.clone()))?;
    registry.register(Box::new(status_conflicts.clone()))?;
    registry.register(Box::new(reconciliations.clone()))?;
    registry.register(Box::new(reconciliation_duration.clone()))?;

    Ok(Arc::new(ControllerMetrics {
        registry,
        status_writes,
        status_conflicts,
        reconciliations,
        reconciliation_duration,
    }))
}

impl ControllerMetrics {
    /// Record one status write attempt (`result` is "success", "conflict" or "error")
    pub fn record_status_write(&self, operation: &str, result: &str) {
        self.status_writes
            .with_label_values(&[operation, result])
            .inc();
        if result == "conflict" {
            self.status_conflicts.with_label_values(&[operation]).inc();
        }
    }

    pub fn record_reconciliation(&self, result: &str, duration_secs: f64) {
        self.reconciliations.with_label_values(&[result]).inc();
        self.reconciliation_duration
            .with_label_values(&[result])
            .observe(duration_secs);
    }

    pub fn status_writes(&self, operation: &str, result: &str) -> u64 {
        self.status_writes
            .with_label_values(&[operation, result])
            .get()
    }

    pub fn status_conflicts(&self, operation: &str) -> u64 {
        self.status_conflicts.with_label_values(&[operation]).get()
    }

    /// Encode all metrics in Prometheus text format
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
