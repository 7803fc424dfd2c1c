//! Status conditions and the status block shared by managed resources and claims.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionType {
    /// Whether the resource is ready for use.
    Ready,
    /// Whether the last reconcile of the record succeeded.
    Synced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionReason {
    Available,
    Unavailable,
    Creating,
    Deleting,
    ReconcileSuccess,
    ReconcileError,
}

impl fmt::Display for ConditionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConditionReason::Available => "Available",
            ConditionReason::Unavailable => "Unavailable",
            ConditionReason::Creating => "Creating",
            ConditionReason::Deleting => "Deleting",
            ConditionReason::ReconcileSuccess => "ReconcileSuccess",
            ConditionReason::ReconcileError => "ReconcileError",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: ConditionType,
    pub status: ConditionStatus,
    pub reason: ConditionReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    fn new(type_: ConditionType, status: ConditionStatus, reason: ConditionReason) -> Self {
        Self {
            type_,
            status,
            reason,
            message: None,
            last_transition_time: Utc::now(),
        }
    }

    /// The resource is being created.
    pub fn creating() -> Self {
        Self::new(
            ConditionType::Ready,
            ConditionStatus::False,
            ConditionReason::Creating,
        )
    }

    /// The resource is available for use.
    pub fn available() -> Self {
        Self::new(
            ConditionType::Ready,
            ConditionStatus::True,
            ConditionReason::Available,
        )
    }

    /// The resource exists but is not usable.
    pub fn unavailable() -> Self {
        Self::new(
            ConditionType::Ready,
            ConditionStatus::False,
            ConditionReason::Unavailable,
        )
    }

    /// The resource is being deleted.
    pub fn deleting() -> Self {
        Self::new(
            ConditionType::Ready,
            ConditionStatus::False,
            ConditionReason::Deleting,
        )
    }

    pub fn reconcile_success() -> Self {
        Self::new(
            ConditionType::Synced,
            ConditionStatus::True,
            ConditionReason::ReconcileSuccess,
        )
    }

    pub fn reconcile_error(err: &dyn std::error::Error) -> Self {
        let mut c = Self::new(
            ConditionType::Synced,
            ConditionStatus::False,
            ConditionReason::ReconcileError,
        );
        c.message = Some(err.to_string());
        c
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Equal ignoring the transition time.
    pub fn equal(&self, other: &Condition) -> bool {
        self.type_ == other.type_
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
    }
}

/// Whether a claim or managed resource is bound to its counterpart.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BindingPhase {
    /// Not yet bound. Also the state of records that were never bound.
    #[default]
    Unbound,
    Bound,
    /// A managed resource whose claim went away.
    Released,
}

/// Status common to managed resources and claims.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceStatus {
    pub conditions: Vec<Condition>,
    pub binding_phase: BindingPhase,
}

impl ResourceStatus {
    /// Set conditions, replacing any existing condition of the same type.
    /// A condition equal to the current one keeps its transition time.
    pub fn set_conditions(&mut self, conditions: impl IntoIterator<Item = Condition>) {
        for new in conditions {
            match self.conditions.iter_mut().find(|c| c.type_ == new.type_) {
                Some(existing) if existing.equal(&new) => {}
                Some(existing) => *existing = new,
                None => self.conditions.push(new),
            }
        }
    }

    pub fn get_condition(&self, type_: ConditionType) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    /// Ready and available.
    pub fn is_available(&self) -> bool {
        self.get_condition(ConditionType::Ready)
            .is_some_and(|c| c.reason == ConditionReason::Available)
    }
}
