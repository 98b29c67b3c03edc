//! The per-release controller: workload capabilities plus status writes
//!
//! The state machine that steps a release through its phases talks to this
//! type only, so a new workload kind means a new `TargetController`, never
//! a change here.

use super::status::{StatusError, StatusUpdater};
use super::target::{Initialization, TargetController, TargetError};
use crate::crd::release::{Phase, Release, ReleaseStatus};
use std::sync::Arc;

pub struct ReleaseController {
    target: Arc<dyn TargetController>,
    status: StatusUpdater,
}

impl ReleaseController {
    pub fn new(target: Arc<dyn TargetController>, status: StatusUpdater) -> Self {
        Self { target, status }
    }

    pub async fn is_primary_ready(&self, release: &Release) -> Result<bool, TargetError> {
        self.target.is_primary_ready(release).await
    }

    pub async fn is_canary_ready(&self, release: &Release) -> Result<bool, TargetError> {
        self.target.is_canary_ready(release).await
    }

    pub async fn initialize(
        &self,
        release: &Release,
        skip_liveness_checks: bool,
    ) -> Result<Initialization, TargetError> {
        self.target.initialize(release, skip_liveness_checks).await
    }

    pub async fn promote(&self, release: &Release) -> Result<(), TargetError> {
        self.target.promote(release).await
    }

    pub async fn has_target_changed(&self, release: &Release) -> Result<bool, TargetError> {
        self.target.has_target_changed(release).await
    }

    pub async fn have_dependencies_changed(&self, release: &Release) -> Result<bool, TargetError> {
        self.target.have_dependencies_changed(release).await
    }

    pub async fn scale(&self, release: &Release, replicas: i32) -> Result<(), TargetError> {
        self.target.scale(release, replicas).await
    }

    pub async fn scale_from_zero(&self, release: &Release) -> Result<(), TargetError> {
        self.target.scale_from_zero(release).await
    }

    pub async fn sync_status(
        &self,
        release: &Release,
        new_status: &ReleaseStatus,
    ) -> Result<Release, StatusError> {
        self.status.sync_status(release, new_status).await
    }

    pub async fn set_status_phase(
        &self,
        release: &Release,
        phase: Phase,
    ) -> Result<Release, StatusError> {
        self.status.set_status_phase(release, phase).await
    }

    pub async fn set_status_weight(
        &self,
        release: &Release,
        weight: i32,
    ) -> Result<Release, StatusError> {
        self.status.set_status_weight(release, weight).await
    }

    pub async fn set_status_iterations(
        &self,
        release: &Release,
        iterations: i32,
    ) -> Result<Release, StatusError> {
        self.status.set_status_iterations(release, iterations).await
    }

    pub async fn set_status_failed_checks(
        &self,
        release: &Release,
        failed_checks: i32,
    ) -> Result<Release, StatusError> {
        self.status
            .set_status_failed_checks(release, failed_checks)
            .await
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::client::MockObjectClient;
    use crate::controller::backoff::Backoff;
    use crate::controller::clock::MockClock;
    use crate::controller::config_tracker::KubeConfigTracker;
    use crate::controller::status::StatusStore;
    use crate::controller::store::MockReleaseStore;
    use crate::controller::target::{has_template_changed, MockWorkloadSource, WorkloadSource};
    use crate::crd::release::{AnalysisSpec, ReleaseSpec, ServiceSpec, TargetRef};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// Records calls and answers from fixed state
    struct MockTarget {
        workloads: Arc<MockWorkloadSource>,
        calls: Mutex<Vec<String>>,
        canary_ready: bool,
    }

    impl MockTarget {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: impl Into<String>) {
            self.calls.lock().unwrap().push(call.into());
        }
    }

    #[async_trait]
    impl TargetController for MockTarget {
        async fn is_primary_ready(&self, _release: &Release) -> Result<bool, TargetError> {
            self.record("is_primary_ready");
            Ok(true)
        }

        async fn is_canary_ready(&self, release: &Release) -> Result<bool, TargetError> {
            self.record("is_canary_ready");
            if !self.canary_ready {
                return Err(TargetError::NotReady {
                    kind: "Deployment".to_string(),
                    namespace: "default".to_string(),
                    name: release.spec.target_ref.name.clone(),
                    reason: "progress deadline exceeded".to_string(),
                });
            }
            Ok(true)
        }

        async fn initialize(
            &self,
            _release: &Release,
            skip_liveness_checks: bool,
        ) -> Result<Initialization, TargetError> {
            self.record(format!("initialize({skip_liveness_checks})"));
            Ok(Initialization {
                label: "app".to_string(),
                ports: BTreeMap::from([("http".to_string(), 9898)]),
            })
        }

        async fn promote(&self, _release: &Release) -> Result<(), TargetError> {
            self.record("promote");
            Ok(())
        }

        async fn has_target_changed(&self, release: &Release) -> Result<bool, TargetError> {
            self.record("has_target_changed");
            has_template_changed(self.workloads.as_ref(), release).await
        }

        async fn have_dependencies_changed(&self, _release: &Release) -> Result<bool, TargetError> {
            self.record("have_dependencies_changed");
            Ok(false)
        }

        async fn scale(&self, _release: &Release, replicas: i32) -> Result<(), TargetError> {
            self.record(format!("scale({replicas})"));
            Ok(())
        }

        async fn scale_from_zero(&self, _release: &Release) -> Result<(), TargetError> {
            self.record("scale_from_zero");
            Ok(())
        }
    }

    fn release() -> Release {
        let mut release = Release::new(
            "podinfo",
            ReleaseSpec {
                target_ref: TargetRef {
                    api_version: None,
                    kind: "Deployment".to_string(),
                    name: "podinfo".to_string(),
                },
                provider: None,
                service: ServiceSpec {
                    port: 9898,
                    port_name: None,
                    target_port: None,
                },
                analysis: AnalysisSpec {
                    interval: "1m".to_string(),
                    threshold: 2,
                    max_weight: Some(50),
                    step_weight: Some(25),
                    iterations: None,
                    metrics: vec![],
                },
                skip_analysis: false,
                progress_deadline_seconds: Some(60),
            },
        );
        release.metadata.namespace = Some("default".to_string());
        release
    }

    fn controller(canary_ready: bool) -> (ReleaseController, Arc<MockTarget>, Arc<MockReleaseStore>) {
        let workloads = Arc::new(MockWorkloadSource::new());
        workloads.set_template("podinfo", json!({"spec": {"containers": [{"image": "podinfo:1"}]}}));
        let target = Arc::new(MockTarget {
            workloads: workloads.clone(),
            calls: Mutex::new(vec![]),
            canary_ready,
        });
        let store = Arc::new(MockReleaseStore::new());
        let status = StatusStore::new(store.clone(), Arc::new(MockClock::at_epoch_offset(0)))
            .with_backoff(Backoff::immediate(4));
        let updater = StatusUpdater::new(
            status,
            workloads,
            Arc::new(KubeConfigTracker::new(Arc::new(MockObjectClient::new()))),
        );
        (
            ReleaseController::new(target.clone(), updater),
            target,
            store,
        )
    }

    #[tokio::test]
    async fn test_initialization_flow() {
        let (controller, target, store) = controller(true);
        let snapshot = store.insert(release());

        let init = controller.initialize(&snapshot, true).await.unwrap();
        assert_eq!(init.label, "app");
        assert_eq!(init.ports["http"], 9898);

        let synced = controller
            .sync_status(
                &snapshot,
                &ReleaseStatus {
                    phase: Some(Phase::Initializing),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(!controller.has_target_changed(&synced).await.unwrap());

        let initialized = controller
            .set_status_phase(&synced, Phase::Initialized)
            .await
            .unwrap();
        let status = initialized.status.unwrap();
        assert_eq!(status.phase, Some(Phase::Initialized));
        assert_eq!(status.last_promoted_spec, status.last_applied_spec);

        assert_eq!(
            target.calls(),
            vec!["initialize(true)", "has_target_changed"]
        );
    }

    #[tokio::test]
    async fn test_analysis_step_writes() {
        let (controller, target, store) = controller(true);
        let snapshot = store.insert(release());

        assert!(controller.is_primary_ready(&snapshot).await.unwrap());
        assert!(controller.is_canary_ready(&snapshot).await.unwrap());
        let progressing = controller
            .set_status_phase(&snapshot, Phase::Progressing)
            .await
            .unwrap();
        let weighted = controller
            .set_status_weight(&progressing, 25)
            .await
            .unwrap();
        let iterated = controller
            .set_status_iterations(&weighted, 1)
            .await
            .unwrap();
        let checked = controller
            .set_status_failed_checks(&iterated, 1)
            .await
            .unwrap();

        let status = checked.status.unwrap();
        assert_eq!(status.canary_weight, 25);
        assert_eq!(status.iterations, 1);
        assert_eq!(status.failed_checks, 1);
        assert_eq!(
            target.calls(),
            vec!["is_primary_ready", "is_canary_ready"]
        );
    }

    #[tokio::test]
    async fn test_readiness_error_is_not_a_boolean() {
        let (controller, _, store) = controller(false);
        let snapshot = store.insert(release());

        let err = controller.is_canary_ready(&snapshot).await.unwrap_err();
        assert!(matches!(err, TargetError::NotReady { .. }));
        assert!(err.to_string().contains("progress deadline exceeded"));
    }

    #[tokio::test]
    async fn test_scaling_and_promotion_delegate_to_target() {
        let (controller, target, store) = controller(true);
        let snapshot = store.insert(release());

        controller.scale_from_zero(&snapshot).await.unwrap();
        controller.promote(&snapshot).await.unwrap();
        assert!(!controller.have_dependencies_changed(&snapshot).await.unwrap());
        controller.scale(&snapshot, 0).await.unwrap();

        assert_eq!(
            target.calls(),
            vec![
                "scale_from_zero",
                "promote",
                "have_dependencies_changed",
                "scale(0)"
            ]
        );
        // The workload source is shared with the status updater
        assert!(target
            .workloads
            .template("default", &snapshot.spec.target_ref)
            .await
            .is_ok());
    }
}
