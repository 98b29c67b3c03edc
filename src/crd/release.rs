use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Release is a Custom Resource describing one managed canary rollout
///
/// The spec is owned by the operator; the status is written exclusively
/// by the controller through `StatusStore`.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "serin.io",
    version = "v1alpha1",
    kind = "Release",
    namespaced,
    status = "ReleaseStatus",
    printcolumn = r#"{"name":"Status", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Weight", "type":"integer", "jsonPath":".status.canaryWeight"}"#,
    printcolumn = r#"{"name":"FailedChecks", "type":"integer", "priority":1, "jsonPath":".status.failedChecks"}"#,
    printcolumn = r#"{"name":"LastTransitionTime", "type":"string", "jsonPath":".status.lastTransitionTime"}"#
)]
pub struct ReleaseSpec {
    /// Workload managed by this release
    #[serde(rename = "targetRef")]
    pub target_ref: TargetRef,

    /// Traffic routing provider (e.g. "istio", "smi:linkerd", "gloo:gloo-system")
    /// Falls back to the controller-wide default when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    /// Service exposed by the primary and canary variants
    pub service: ServiceSpec,

    /// Canary analysis parameters
    pub analysis: AnalysisSpec,

    /// Promote without running the analysis
    #[serde(rename = "skipAnalysis", default)]
    pub skip_analysis: bool,

    /// Maximum time in seconds for a release to make progress before it is considered failed
    #[serde(
        rename = "progressDeadlineSeconds",
        skip_serializing_if = "Option::is_none"
    )]
    pub progress_deadline_seconds: Option<i32>,
}

/// Reference to the workload being released
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
pub struct TargetRef {
    #[serde(rename = "apiVersion", skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    /// Workload kind (Deployment, Service, ...)
    pub kind: String,

    pub name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
pub struct ServiceSpec {
    /// Container port exposed through the apex service
    pub port: i32,

    /// Port name (default: "http")
    #[serde(rename = "portName", skip_serializing_if = "Option::is_none")]
    pub port_name: Option<String>,

    /// Target port on the pods (default: same as `port`)
    #[serde(rename = "targetPort", skip_serializing_if = "Option::is_none")]
    pub target_port: Option<i32>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct AnalysisSpec {
    /// Schedule interval between analysis runs (e.g. "1m")
    #[serde(default = "default_interval")]
    pub interval: String,

    /// Number of failed checks before rollback
    pub threshold: i32,

    /// Maximum canary weight (percentage)
    #[serde(rename = "maxWeight", skip_serializing_if = "Option::is_none")]
    pub max_weight: Option<i32>,

    /// Weight increment per iteration (percentage)
    #[serde(rename = "stepWeight", skip_serializing_if = "Option::is_none")]
    pub step_weight: Option<i32>,

    /// Fixed number of iterations (blue/green style analysis)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iterations: Option<i32>,

    #[serde(default)]
    pub metrics: Vec<MetricSpec>,
}

fn default_interval() -> String {
    "1m".to_string()
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct MetricSpec {
    /// Builtin check name ("request-success-rate", "request-duration")
    pub name: String,

    /// Minimum success rate (percentage) or maximum duration (milliseconds)
    pub threshold: f64,

    /// Query window (default: analysis interval)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
}

/// Phase of a Release
///
/// The string form of each variant is read by external tooling.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, JsonSchema)]
pub enum Phase {
    /// Primary variant is being created
    Initializing,
    /// Primary variant is running the promoted spec
    Initialized,
    /// Analysis is paused waiting for approval
    Waiting,
    /// Analysis is shifting traffic to the canary
    Progressing,
    /// Canary spec is being copied onto the primary
    Promoting,
    /// All traffic is being routed back to the primary
    Finalising,
    /// Release completed and was promoted
    Succeeded,
    /// Release was rolled back
    Failed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Initializing => "Initializing",
            Phase::Initialized => "Initialized",
            Phase::Waiting => "Waiting",
            Phase::Progressing => "Progressing",
            Phase::Promoting => "Promoting",
            Phase::Finalising => "Finalising",
            Phase::Succeeded => "Succeeded",
            Phase::Failed => "Failed",
        }
    }

    /// Weight and iteration counters only carry meaning in these phases
    pub fn is_analysing(&self) -> bool {
        matches!(self, Phase::Progressing | Phase::Waiting)
    }

    /// Phases in which the primary is known to run a safe spec
    pub fn is_promoted(&self) -> bool {
        matches!(self, Phase::Initialized | Phase::Succeeded)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum ConditionType {
    Promoted,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// Typed, timestamped status assertion
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
pub struct ReleaseCondition {
    #[serde(rename = "type")]
    pub condition_type: ConditionType,

    pub status: ConditionStatus,

    /// Last time the condition was written (RFC3339)
    #[serde(rename = "lastUpdateTime")]
    pub last_update_time: String,

    /// Last time the status value flipped (RFC3339)
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: String,

    pub reason: String,

    pub message: String,
}

/// Status of the Release
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct ReleaseStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,

    /// Percentage of traffic routed to the canary
    #[serde(rename = "canaryWeight", default)]
    pub canary_weight: i32,

    /// Consecutive failed analysis checks
    #[serde(rename = "failedChecks", default)]
    pub failed_checks: i32,

    /// Completed analysis cycles
    #[serde(default)]
    pub iterations: i32,

    /// Fingerprint of the workload template at the last status sync
    #[serde(rename = "lastAppliedSpec", skip_serializing_if = "Option::is_none")]
    pub last_applied_spec: Option<String>,

    /// Fingerprint of the last template promoted to primary
    #[serde(rename = "lastPromotedSpec", skip_serializing_if = "Option::is_none")]
    pub last_promoted_spec: Option<String>,

    /// Tracked ConfigMap/Secret fingerprints, keyed by "<kind>/<name>"
    #[serde(rename = "trackedConfigs", skip_serializing_if = "Option::is_none")]
    pub tracked_configs: Option<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ReleaseCondition>,

    /// Timestamp of the last status write (RFC3339)
    #[serde(rename = "lastTransitionTime", skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

impl ReleaseStatus {
    /// Look up a condition by type
    pub fn condition(&self, condition_type: ConditionType) -> Option<&ReleaseCondition> {
        self.conditions
            .iter()
            .find(|c| c.condition_type == condition_type)
    }
}

#[cfg(test)]
#[path = "release_test.rs"]
mod tests;
