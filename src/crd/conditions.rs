//! Cluster API style conditions
//!
//! Conditions live in a plain `Vec<Condition>` on each status. Setting a
//! condition keeps its `lastTransitionTime` unless the status flips, so a
//! status that did not change serializes identically and no patch is sent.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The summary condition computed from the pool's other conditions
pub const READY_CONDITION: &str = "Ready";

/// Condition status following Kubernetes conventions
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// How much attention a false condition deserves
///
/// Ordered so that `Error > Warning > Info`.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, PartialOrd, Ord,
)]
pub enum ConditionSeverity {
    /// Expected, transient state (waiting on a dependency)
    #[default]
    Info,
    /// Degraded but may recover without intervention
    Warning,
    /// Requires intervention
    Error,
}

/// Kubernetes-style condition with Cluster API severity
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition (e.g., ASGReady)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Severity, only meaningful when status is False
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<ConditionSeverity>,

    /// Machine-readable reason for the condition
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,

    /// Human-readable message
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    /// Last time the condition transitioned
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a new condition with the current timestamp
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            severity: None,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }

    /// Attach a severity
    pub fn with_severity(mut self, severity: ConditionSeverity) -> Self {
        self.severity = Some(severity);
        self
    }

    fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

/// Look up a condition by type
pub fn get<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// True when the condition exists and is True
pub fn is_true(conditions: &[Condition], type_: &str) -> bool {
    get(conditions, type_).is_some_and(Condition::is_true)
}

/// Insert or replace a condition, preserving the transition time when the
/// status is unchanged
pub fn set(conditions: &mut Vec<Condition>, mut condition: Condition) {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) => {
            if existing.status == condition.status {
                condition.last_transition_time = existing.last_transition_time;
            }
            *existing = condition;
        }
        None => {
            conditions.push(condition);
            conditions.sort_by(|a, b| a.type_.cmp(&b.type_));
        }
    }
}

/// Mark a condition True
pub fn mark_true(conditions: &mut Vec<Condition>, type_: &str) {
    set(
        conditions,
        Condition::new(type_, ConditionStatus::True, "", ""),
    );
}

/// Mark a condition False with a reason and severity
pub fn mark_false(
    conditions: &mut Vec<Condition>,
    type_: &str,
    reason: &str,
    severity: ConditionSeverity,
    message: impl Into<String>,
) {
    set(
        conditions,
        Condition::new(type_, ConditionStatus::False, reason, message).with_severity(severity),
    );
}

/// Mark a condition Unknown with a reason
pub fn mark_unknown(
    conditions: &mut Vec<Condition>,
    type_: &str,
    reason: &str,
    message: impl Into<String>,
) {
    set(
        conditions,
        Condition::new(type_, ConditionStatus::Unknown, reason, message),
    );
}

/// Summarize `types` into the Ready condition
///
/// All True gives Ready True. Otherwise Ready takes the status, reason and
/// severity of the most severe non-True condition (False/Error first,
/// Unknown last) and a "N of M completed" message. When none of `types`
/// has been set yet, Ready is left untouched.
pub fn set_summary(conditions: &mut Vec<Condition>, types: &[&str]) {
    let present: Vec<&Condition> = types.iter().filter_map(|t| get(conditions, t)).collect();
    if present.is_empty() {
        return;
    }

    let completed = present.iter().filter(|c| c.is_true()).count();
    if completed == types.len() {
        mark_true(conditions, READY_CONDITION);
        return;
    }

    let worst = present
        .iter()
        .filter(|c| !c.is_true())
        .max_by_key(|c| match c.status {
            ConditionStatus::False => 1 + c.severity.unwrap_or_default() as u8,
            _ => 0,
        })
        .copied();

    let summary = match worst {
        Some(worst) => {
            let mut summary = Condition::new(
                READY_CONDITION,
                worst.status,
                worst.reason.clone(),
                format!("{} of {} completed", completed, types.len()),
            );
            summary.severity = worst.severity;
            summary
        }
        // Some of `types` are missing and the rest are True
        None => Condition::new(
            READY_CONDITION,
            ConditionStatus::Unknown,
            "",
            format!("{} of {} completed", completed, types.len()),
        ),
    };
    set(conditions, summary);
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: &str = "ASGReady";
    const B: &str = "LaunchTemplateReady";

    #[test]
    fn set_preserves_transition_time_when_status_unchanged() {
        let mut conditions = Vec::new();
        mark_false(&mut conditions, A, "Waiting", ConditionSeverity::Info, "");
        let first = get(&conditions, A).unwrap().last_transition_time;

        mark_false(&mut conditions, A, "StillWaiting", ConditionSeverity::Info, "");
        let c = get(&conditions, A).unwrap();
        assert_eq!(c.last_transition_time, first);
        assert_eq!(c.reason, "StillWaiting");
    }

    #[test]
    fn set_replaces_instead_of_duplicating() {
        let mut conditions = Vec::new();
        mark_unknown(&mut conditions, A, "ASGNotFound", "lookup failed");
        mark_true(&mut conditions, A);
        assert_eq!(conditions.len(), 1);
        assert!(is_true(&conditions, A));
    }

    #[test]
    fn summary_all_true_marks_ready() {
        let mut conditions = Vec::new();
        mark_true(&mut conditions, A);
        mark_true(&mut conditions, B);
        set_summary(&mut conditions, &[A, B]);
        assert!(is_true(&conditions, READY_CONDITION));
    }

    #[test]
    fn summary_picks_most_severe_false_condition() {
        let mut conditions = Vec::new();
        mark_unknown(&mut conditions, A, "ASGNotFound", "");
        mark_false(&mut conditions, B, "TemplateBroken", ConditionSeverity::Error, "");
        set_summary(&mut conditions, &[A, B]);

        let ready = get(&conditions, READY_CONDITION).unwrap();
        assert_eq!(ready.status, ConditionStatus::False);
        assert_eq!(ready.reason, "TemplateBroken");
        assert_eq!(ready.severity, Some(ConditionSeverity::Error));
        assert_eq!(ready.message, "0 of 2 completed");
    }

    #[test]
    fn summary_counts_completed_steps() {
        let mut conditions = Vec::new();
        mark_true(&mut conditions, B);
        mark_false(
            &mut conditions,
            A,
            "WaitingForBootstrapData",
            ConditionSeverity::Info,
            "",
        );
        set_summary(&mut conditions, &[A, B]);

        let ready = get(&conditions, READY_CONDITION).unwrap();
        assert_eq!(ready.message, "1 of 2 completed");
        assert_eq!(ready.reason, "WaitingForBootstrapData");
    }

    #[test]
    fn summary_with_missing_condition_is_unknown() {
        let mut conditions = Vec::new();
        mark_true(&mut conditions, B);
        set_summary(&mut conditions, &[A, B]);
        let ready = get(&conditions, READY_CONDITION).unwrap();
        assert_eq!(ready.status, ConditionStatus::Unknown);
    }

    #[test]
    fn summary_without_inputs_leaves_ready_alone() {
        let mut conditions = Vec::new();
        set_summary(&mut conditions, &[A, B]);
        assert!(conditions.is_empty());
    }

    #[test]
    fn severity_ordering() {
        assert!(ConditionSeverity::Error > ConditionSeverity::Warning);
        assert!(ConditionSeverity::Warning > ConditionSeverity::Info);
    }
}
