#![allow(clippy::unwrap_used)] // Tests can use unwrap for brevity
#![allow(clippy::expect_used)] // Tests can use expect for better error messages

use super::*;
use kube::CustomResourceExt;

#[test]
fn test_release_deserialize_from_yaml() {
    let yaml = r#"
apiVersion: serin.io/v1alpha1
kind: Release
metadata:
  name: podinfo
  namespace: test
spec:
  targetRef:
    apiVersion: apps/v1
    kind: Deployment
    name: podinfo
  provider: smi:linkerd
  service:
    port: 9898
  analysis:
    threshold: 5
    maxWeight: 50
    stepWeight: 10
    metrics:
    - name: request-success-rate
      threshold: 99
      interval: 1m
    - name: request-duration
      threshold: 500
"#;

    let release: Release = serde_yaml::from_str(yaml).expect("Failed to deserialize Release");

    assert_eq!(release.metadata.name.as_deref(), Some("podinfo"));
    assert_eq!(release.spec.target_ref.kind, "Deployment");
    assert_eq!(release.spec.provider.as_deref(), Some("smi:linkerd"));
    assert_eq!(release.spec.service.port, 9898);
    assert_eq!(release.spec.analysis.interval, "1m");
    assert_eq!(release.spec.analysis.max_weight, Some(50));
    assert_eq!(release.spec.analysis.metrics.len(), 2);
    assert!(!release.spec.skip_analysis);
    assert!(release.status.is_none());
}

#[test]
fn test_status_serializes_compatibility_field_names() {
    let status = ReleaseStatus {
        phase: Some(Phase::Progressing),
        canary_weight: 20,
        failed_checks: 1,
        iterations: 2,
        last_applied_spec: Some("00000000000000000042".to_string()),
        last_promoted_spec: Some("00000000000000000041".to_string()),
        tracked_configs: Some(BTreeMap::from([(
            "configmap/podinfo-config".to_string(),
            "00000000000000000007".to_string(),
        )])),
        conditions: vec![ReleaseCondition {
            condition_type: ConditionType::Promoted,
            status: ConditionStatus::Unknown,
            last_update_time: "2024-01-01T00:00:00Z".to_string(),
            last_transition_time: "2024-01-01T00:00:00Z".to_string(),
            reason: "Progressing".to_string(),
            message: "new revision detected, starting analysis".to_string(),
        }],
        last_transition_time: Some("2024-01-01T00:00:00Z".to_string()),
    };

    let json = serde_json::to_value(&status).unwrap();

    assert_eq!(json["phase"], "Progressing");
    assert_eq!(json["canaryWeight"], 20);
    assert_eq!(json["failedChecks"], 1);
    assert_eq!(json["iterations"], 2);
    assert_eq!(json["lastAppliedSpec"], "00000000000000000042");
    assert_eq!(json["lastPromotedSpec"], "00000000000000000041");
    assert_eq!(
        json["trackedConfigs"]["configmap/podinfo-config"],
        "00000000000000000007"
    );
    assert_eq!(json["conditions"][0]["type"], "Promoted");
    assert_eq!(json["conditions"][0]["status"], "Unknown");
    assert_eq!(json["conditions"][0]["reason"], "Progressing");
    assert_eq!(json["lastTransitionTime"], "2024-01-01T00:00:00Z");
}

#[test]
fn test_status_defaults_when_fields_missing() {
    let status: ReleaseStatus = serde_json::from_str(r#"{"phase":"Succeeded"}"#).unwrap();

    assert_eq!(status.phase, Some(Phase::Succeeded));
    assert_eq!(status.canary_weight, 0);
    assert_eq!(status.iterations, 0);
    assert!(status.conditions.is_empty());
    assert!(status.condition(ConditionType::Promoted).is_none());
}

#[test]
fn test_phase_string_form_matches_serde() {
    for phase in [
        Phase::Initializing,
        Phase::Initialized,
        Phase::Waiting,
        Phase::Progressing,
        Phase::Promoting,
        Phase::Finalising,
        Phase::Succeeded,
        Phase::Failed,
    ] {
        let json = serde_json::to_value(phase).unwrap();
        assert_eq!(json, phase.as_str());
    }
}

#[test]
fn test_crd_has_status_subresource() {
    let crd = serde_json::to_value(Release::crd()).unwrap();

    assert_eq!(crd["spec"]["group"], "serin.io");
    assert_eq!(crd["spec"]["names"]["kind"], "Release");
    assert!(crd["spec"]["versions"][0]["subresources"]["status"].is_object());
}
