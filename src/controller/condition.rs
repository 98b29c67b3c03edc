//! `Promoted` condition derived from the release phase

use crate::crd::release::{ConditionStatus, ConditionType, Phase, ReleaseCondition, ReleaseStatus};

/// Condition status and human-readable message for a phase
pub fn phase_condition(phase: Phase) -> (ConditionStatus, &'static str) {
    match phase {
        Phase::Initializing => (
            ConditionStatus::Unknown,
            "new deployment detected, starting initialization",
        ),
        Phase::Initialized => (ConditionStatus::True, "initialization completed"),
        Phase::Waiting => (ConditionStatus::Unknown, "waiting for approval"),
        Phase::Progressing => (
            ConditionStatus::Unknown,
            "new revision detected, starting analysis",
        ),
        Phase::Promoting => (
            ConditionStatus::Unknown,
            "analysis completed, starting primary rollout",
        ),
        Phase::Finalising => (
            ConditionStatus::Unknown,
            "analysis completed, routing all traffic to primary",
        ),
        Phase::Succeeded => (
            ConditionStatus::True,
            "analysis completed successfully, promotion finished",
        ),
        Phase::Failed => (
            ConditionStatus::False,
            "analysis failed, deployment scaled to zero",
        ),
    }
}

/// Compute the condition set for a phase transition
///
/// Returns `None` when the current `Promoted` condition already carries the
/// same status and reason, so no write is needed. Otherwise returns the
/// singleton condition set to store:
/// - status unchanged (reason changed): `lastTransitionTime` is carried over
/// - status changed or no prior condition: both timestamps are `now`
pub fn make_status_conditions(
    status: &ReleaseStatus,
    phase: Phase,
    now: &str,
) -> Option<Vec<ReleaseCondition>> {
    let current = status.condition(ConditionType::Promoted);
    let (condition_status, message) = phase_condition(phase);
    let reason = phase.as_str();

    let last_transition_time = match current {
        Some(c) if c.status == condition_status && c.reason == reason => return None,
        Some(c) if c.status == condition_status => c.last_transition_time.clone(),
        _ => now.to_string(),
    };

    Some(vec![ReleaseCondition {
        condition_type: ConditionType::Promoted,
        status: condition_status,
        last_update_time: now.to_string(),
        last_transition_time,
        reason: reason.to_string(),
        message: message.to_string(),
    }])
}
