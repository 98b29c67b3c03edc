//! Release status writes
//!
//! Every status field setter is a mutation closure run through
//! `StatusStore::apply_status_mutation`, which owns the read-modify-write
//! cycle:
//! 1. attempt 1 mutates the caller's snapshot, later attempts re-read the release
//! 2. the closure mutates a copy of the status, `lastTransitionTime` is stamped
//! 3. the copy is written with a version-checked update
//! 4. a conflict restarts the cycle within the backoff budget
//!
//! `StatusUpdater` adds the workload lookups `SyncStatus` needs.

use super::backoff::{retry_on_conflict, Backoff};
use super::clock::{timestamp, Clock};
use super::condition::make_status_conditions;
use super::config_tracker::ConfigTracker;
use super::fingerprint::{fingerprint, FingerprintError};
use super::store::{ReleaseStore, StoreError};
use super::target::{has_template_changed, have_configs_changed, TargetError, WorkloadSource};
use crate::crd::release::{Phase, Release, ReleaseStatus};
use crate::server::metrics::SharedMetrics;
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const SYNC_STATUS: &str = "SyncStatus";
pub const SET_STATUS_PHASE: &str = "SetStatusPhase";
pub const SET_STATUS_WEIGHT: &str = "SetStatusWeight";
pub const SET_STATUS_ITERATIONS: &str = "SetStatusIterations";
pub const SET_STATUS_FAILED_CHECKS: &str = "SetStatusFailedChecks";

#[derive(Debug, Error)]
pub enum StatusError {
    #[error("{operation}: {source}")]
    Store {
        operation: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("{operation}: {kind} {namespace}/{name} not found")]
    TargetNotFound {
        operation: &'static str,
        kind: String,
        namespace: String,
        name: String,
    },

    #[error("{operation} hash error: {source}")]
    Fingerprint {
        operation: &'static str,
        #[source]
        source: FingerprintError,
    },

    #[error("{operation} configs query error: {source}")]
    Configs {
        operation: &'static str,
        #[source]
        source: TargetError,
    },

    #[error("{operation} workload query error: {source}")]
    Workload {
        operation: &'static str,
        #[source]
        source: TargetError,
    },
}

impl StatusError {
    fn from_target(operation: &'static str, err: TargetError) -> Self {
        match err {
            TargetError::NotFound {
                kind,
                namespace,
                name,
            } => StatusError::TargetNotFound {
                operation,
                kind,
                namespace,
                name,
            },
            TargetError::Fingerprint(source) => StatusError::Fingerprint { operation, source },
            other => StatusError::Workload {
                operation,
                source: other,
            },
        }
    }

    fn from_configs(operation: &'static str, err: TargetError) -> Self {
        match err {
            TargetError::Fingerprint(source) => StatusError::Fingerprint { operation, source },
            other => StatusError::Configs {
                operation,
                source: other,
            },
        }
    }

    /// Name of the status operation that failed
    pub fn operation(&self) -> &'static str {
        match self {
            StatusError::Store { operation, .. }
            | StatusError::TargetNotFound { operation, .. }
            | StatusError::Fingerprint { operation, .. }
            | StatusError::Configs { operation, .. }
            | StatusError::Workload { operation, .. } => operation,
        }
    }

    /// The release or its target workload no longer exists
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StatusError::TargetNotFound { .. }
                | StatusError::Store {
                    source: StoreError::NotFound { .. },
                    ..
                }
        )
    }

    /// The retry budget ran out on version conflicts
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StatusError::Store {
                source: StoreError::Conflict { .. },
                ..
            }
        )
    }
}

/// Conflict-safe status writer shared by every status setter
pub struct StatusStore {
    store: Arc<dyn ReleaseStore>,
    clock: Arc<dyn Clock>,
    backoff: Backoff,
    metrics: Option<SharedMetrics>,
}

impl StatusStore {
    pub fn new(store: Arc<dyn ReleaseStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            backoff: Backoff::default(),
            metrics: None,
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_metrics(mut self, metrics: SharedMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn record(&self, operation: &str, result: &Result<Release, StoreError>) {
        let Some(metrics) = &self.metrics else {
            return;
        };
        let outcome = match result {
            Ok(_) => "success",
            Err(StoreError::Conflict { .. }) => "conflict",
            Err(_) => "error",
        };
        metrics.record_status_write(operation, outcome);
    }

    /// Apply `mutate` to the release status and write it back
    ///
    /// `mutate` receives the authoritative release for this attempt, a copy
    /// of its status to modify, and the attempt's timestamp. It may run more
    /// than once, so it must be pure. Fields it does not touch keep the
    /// values of the release read on the winning attempt.
    pub async fn apply_status_mutation<F>(
        &self,
        operation: &'static str,
        snapshot: &Release,
        mutate: F,
    ) -> Result<Release, StatusError>
    where
        F: Fn(&Release, &mut ReleaseStatus, &str) + Send + Sync,
    {
        let namespace = snapshot.namespace().unwrap_or_default();
        let name = snapshot.name_any();
        let mutate = &mutate;
        let (namespace, name) = (namespace.as_str(), name.as_str());

        let result = retry_on_conflict(&self.backoff, |attempt| async move {
            let current = if attempt == 1 {
                snapshot.clone()
            } else {
                self.store.get(namespace, name).await?
            };

            let now = timestamp(self.clock.now());
            let mut status = current.status.clone().unwrap_or_default();
            mutate(&current, &mut status, &now);
            status.last_transition_time = Some(now);

            let mut updated = current;
            updated.status = Some(status);

            let written = self.store.update_status(&updated).await;
            self.record(operation, &written);
            if let Err(StoreError::Conflict { .. }) = &written {
                warn!(release = %name, namespace = %namespace, operation, attempt, "Status write conflict");
            }
            written
        })
        .await;

        match result {
            Ok(release) => {
                debug!(release = %name, namespace = %namespace, operation, "Status written");
                Ok(release)
            }
            Err(source) => Err(StatusError::Store { operation, source }),
        }
    }

    /// Overwrite phase and counters, record fingerprints and refresh the condition
    pub async fn sync_status(
        &self,
        release: &Release,
        new_status: &ReleaseStatus,
        template_fingerprint: String,
        tracked_configs: BTreeMap<String, String>,
    ) -> Result<Release, StatusError> {
        self.apply_status_mutation(SYNC_STATUS, release, |_, status, now| {
            status.phase = new_status.phase;
            status.canary_weight = new_status.canary_weight;
            status.failed_checks = new_status.failed_checks;
            status.iterations = new_status.iterations;
            status.last_applied_spec = Some(template_fingerprint.clone());
            status.tracked_configs = Some(tracked_configs.clone());

            if let Some(phase) = new_status.phase {
                if let Some(conditions) = make_status_conditions(status, phase, now) {
                    status.conditions = conditions;
                }
            }
        })
        .await
    }

    /// Move to `phase`, zeroing weight and iterations outside of analysis
    ///
    /// Entering `Initialized` or `Succeeded` records the release's current
    /// `lastAppliedSpec` as `lastPromotedSpec`.
    pub async fn set_phase(&self, release: &Release, phase: Phase) -> Result<Release, StatusError> {
        self.apply_status_mutation(SET_STATUS_PHASE, release, |current, status, now| {
            status.phase = Some(phase);

            if !phase.is_analysing() {
                status.canary_weight = 0;
                status.iterations = 0;
            }

            if phase.is_promoted() {
                status.last_promoted_spec = current
                    .status
                    .as_ref()
                    .and_then(|s| s.last_applied_spec.clone());
            }

            if let Some(conditions) = make_status_conditions(status, phase, now) {
                status.conditions = conditions;
            }
        })
        .await
    }

    pub async fn set_weight(&self, release: &Release, weight: i32) -> Result<Release, StatusError> {
        self.apply_status_mutation(SET_STATUS_WEIGHT, release, |_, status, _| {
            status.canary_weight = weight;
        })
        .await
    }

    pub async fn set_iterations(
        &self,
        release: &Release,
        iterations: i32,
    ) -> Result<Release, StatusError> {
        self.apply_status_mutation(SET_STATUS_ITERATIONS, release, |_, status, _| {
            status.iterations = iterations;
        })
        .await
    }

    pub async fn set_failed_checks(
        &self,
        release: &Release,
        failed_checks: i32,
    ) -> Result<Release, StatusError> {
        self.apply_status_mutation(SET_STATUS_FAILED_CHECKS, release, |_, status, _| {
            status.failed_checks = failed_checks;
        })
        .await
    }
}

/// Template and configuration drift of a release
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Drift {
    pub template_changed: bool,
    pub configs_changed: bool,
}

/// Status operations of a release, including the workload lookups of `SyncStatus`
pub struct StatusUpdater {
    status: StatusStore,
    workloads: Arc<dyn WorkloadSource>,
    configs: Arc<dyn ConfigTracker>,
}

impl StatusUpdater {
    pub fn new(
        status: StatusStore,
        workloads: Arc<dyn WorkloadSource>,
        configs: Arc<dyn ConfigTracker>,
    ) -> Self {
        Self {
            status,
            workloads,
            configs,
        }
    }

    pub fn workloads(&self) -> &dyn WorkloadSource {
        self.workloads.as_ref()
    }

    pub fn configs(&self) -> &dyn ConfigTracker {
        self.configs.as_ref()
    }

    /// Fingerprint the target template and its configs, then write `new_status`
    ///
    /// A missing target is reported as `TargetNotFound` and a missing
    /// required config as `Configs`, both without writing. A template that
    /// cannot be fingerprinted aborts before any write.
    pub async fn sync_status(
        &self,
        release: &Release,
        new_status: &ReleaseStatus,
    ) -> Result<Release, StatusError> {
        let namespace = release.namespace().unwrap_or_default();
        let target = &release.spec.target_ref;

        let template = self
            .workloads
            .template(&namespace, target)
            .await
            .map_err(|e| StatusError::from_target(SYNC_STATUS, e))?;

        let configs = self
            .configs
            .tracked_configs(&namespace, &template)
            .await
            .map_err(|e| StatusError::from_configs(SYNC_STATUS, e))?;

        let template_fingerprint = fingerprint(&template).map_err(|source| StatusError::Fingerprint {
            operation: SYNC_STATUS,
            source,
        })?;

        let updated = self
            .status
            .sync_status(release, new_status, template_fingerprint, configs)
            .await?;
        info!(
            release = %release.name_any(),
            namespace = %namespace,
            phase = ?new_status.phase,
            "Release status synced"
        );
        Ok(updated)
    }

    pub async fn set_status_phase(
        &self,
        release: &Release,
        phase: Phase,
    ) -> Result<Release, StatusError> {
        let updated = self.status.set_phase(release, phase).await?;
        info!(release = %release.name_any(), phase = %phase, "Release phase changed");
        Ok(updated)
    }

    pub async fn set_status_weight(
        &self,
        release: &Release,
        weight: i32,
    ) -> Result<Release, StatusError> {
        self.status.set_weight(release, weight).await
    }

    pub async fn set_status_iterations(
        &self,
        release: &Release,
        iterations: i32,
    ) -> Result<Release, StatusError> {
        self.status.set_iterations(release, iterations).await
    }

    pub async fn set_status_failed_checks(
        &self,
        release: &Release,
        failed_checks: i32,
    ) -> Result<Release, StatusError> {
        self.status.set_failed_checks(release, failed_checks).await
    }

    /// Whether the target template or its tracked configs moved since the last sync
    pub async fn drift(&self, release: &Release) -> Result<Drift, TargetError> {
        Ok(Drift {
            template_changed: has_template_changed(self.workloads.as_ref(), release).await?,
            configs_changed: have_configs_changed(
                self.workloads.as_ref(),
                self.configs.as_ref(),
                release,
            )
            .await?,
        })
    }
}

#[cfg(test)]
#[path = "status_test.rs"]
mod tests;
