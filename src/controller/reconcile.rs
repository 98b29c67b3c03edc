//! Reconcile tick for the controller binary
//!
//! Bootstraps the status of new releases, reports template or config drift
//! on known ones and keeps the primary/canary services in place. Traffic
//! shifting and promotion are driven by the analysis loop through
//! `ReleaseController`.

use crate::config::DEFAULT_SELECTOR_LABEL;
use crate::controller::status::{StatusError, StatusUpdater};
use crate::controller::target::TargetError;
use crate::crd::release::{Phase, Release, ReleaseStatus};
use crate::observer::ObserverFactory;
use crate::router::{RouterError, RouterFactory};
use crate::server::SharedMetrics;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Release missing namespace")]
    MissingNamespace,

    #[error(transparent)]
    Status(#[from] StatusError),

    #[error(transparent)]
    Target(#[from] TargetError),

    #[error(transparent)]
    Router(#[from] RouterError),
}

pub struct Context {
    pub updater: StatusUpdater,
    pub routers: RouterFactory,
    pub observers: ObserverFactory,
    /// Provider used when a release does not name one
    pub default_provider: String,
    /// Pod label the primary/canary services select on
    pub selector_label: String,
    pub requeue: Duration,
    pub metrics: Option<SharedMetrics>,
}

impl Context {
    pub fn new(
        updater: StatusUpdater,
        routers: RouterFactory,
        observers: ObserverFactory,
        default_provider: impl Into<String>,
        requeue: Duration,
    ) -> Self {
        Self {
            updater,
            routers,
            observers,
            default_provider: default_provider.into(),
            selector_label: DEFAULT_SELECTOR_LABEL.to_string(),
            requeue,
            metrics: None,
        }
    }

    pub fn with_selector_label(mut self, label: impl Into<String>) -> Self {
        self.selector_label = label.into();
        self
    }

    pub fn with_metrics(mut self, metrics: SharedMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn provider<'a>(&'a self, release: &'a Release) -> &'a str {
        release
            .spec
            .provider
            .as_deref()
            .unwrap_or(&self.default_provider)
    }
}

pub async fn reconcile(release: Arc<Release>, ctx: Arc<Context>) -> Result<Action, ReconcileError> {
    let start = Instant::now();
    let result = reconcile_release(&release, &ctx).await;

    if let Some(ref metrics) = ctx.metrics {
        let outcome = if result.is_ok() { "success" } else { "error" };
        metrics.record_reconciliation(outcome, start.elapsed().as_secs_f64());
    }
    result
}

async fn reconcile_release(release: &Release, ctx: &Context) -> Result<Action, ReconcileError> {
    let namespace = release
        .namespace()
        .ok_or(ReconcileError::MissingNamespace)?;
    let name = release.name_any();
    let requeue = Action::requeue(ctx.requeue);

    match release.status.as_ref().and_then(|s| s.phase) {
        None => {
            let initial = ReleaseStatus {
                phase: Some(Phase::Initializing),
                ..Default::default()
            };
            match ctx.updater.sync_status(release, &initial).await {
                Ok(_) => info!(release = %name, namespace = %namespace, "Release initializing"),
                Err(e) if e.is_not_found() => {
                    warn!(release = %name, namespace = %namespace, error = %e, "Target not found, waiting");
                    return Ok(requeue);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Some(phase) => match ctx.updater.drift(release).await {
            Ok(drift) => {
                if drift.template_changed {
                    info!(release = %name, namespace = %namespace, phase = %phase, "New revision detected");
                }
                if drift.configs_changed {
                    info!(release = %name, namespace = %namespace, phase = %phase, "Tracked configs changed");
                }
                if drift == Default::default() {
                    debug!(release = %name, namespace = %namespace, phase = %phase, "No drift");
                }
            }
            Err(e) if e.is_not_found() => {
                warn!(release = %name, namespace = %namespace, error = %e, "Target not found, waiting");
                return Ok(requeue);
            }
            Err(e) => return Err(e.into()),
        },
    }

    let services = ctx.routers.kubernetes_router(
        &release.spec.target_ref.kind,
        &ctx.selector_label,
        Default::default(),
        Default::default(),
    );
    match services.reconcile(release).await {
        Ok(()) => {}
        Err(RouterError::Client(e)) if e.is_not_found() => {
            warn!(release = %name, namespace = %namespace, error = %e, "Apex service not found, waiting");
            return Ok(requeue);
        }
        Err(e) => return Err(e.into()),
    }

    let analysing = release
        .status
        .as_ref()
        .filter(|s| s.phase.is_some_and(|p| p.is_analysing()));
    if let Some(status) = analysing {
        report_traffic(release, status, ctx).await;
    }

    Ok(requeue)
}

/// Compare the live split with the recorded canary weight and sample the
/// canary's success rate. Failures are logged; the analysis loop owns both.
async fn report_traffic(release: &Release, status: &ReleaseStatus, ctx: &Context) {
    let name = release.name_any();
    let namespace = release.namespace().unwrap_or_default();
    let provider = ctx.provider(release);

    let router = ctx.routers.mesh_router(provider);
    match router.get_routes(release).await {
        Ok(weights) if weights.canary != status.canary_weight => warn!(
            release = %name,
            namespace = %namespace,
            router = router.name(),
            live = weights.canary,
            recorded = status.canary_weight,
            "Canary weight differs from status"
        ),
        Ok(weights) => {
            debug!(release = %name, router = router.name(), canary = weights.canary, "Traffic split in sync")
        }
        Err(e) => {
            warn!(release = %name, router = router.name(), error = %e, "Failed to read traffic split")
        }
    }

    let observer = ctx.observers.observer(provider);
    let target = &release.spec.target_ref.name;
    match observer
        .request_success_rate(target, &namespace, &release.spec.analysis.interval)
        .await
    {
        Ok(rate) => {
            info!(release = %name, observer = observer.name(), success_rate = rate, "Canary success rate")
        }
        Err(e) => {
            debug!(release = %name, observer = observer.name(), error = %e, "No canary metrics")
        }
    }
}

/// Requeue failed ticks after a fixed delay
pub fn error_policy(release: Arc<Release>, error: &ReconcileError, _ctx: Arc<Context>) -> Action {
    warn!(release = %release.name_any(), error = %error, "Reconcile error (will retry)");
    Action::requeue(Duration::from_secs(10))
}
