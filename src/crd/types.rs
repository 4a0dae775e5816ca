//! Supporting types shared by the Strata CRDs

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Lifecycle phase of a managed StrataDB cluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[non_exhaustive]
pub enum ClusterPhase {
    /// Cluster workloads are being created or reconfigured
    #[default]
    Provisioning,
    /// Cluster is up and accepting admin connections
    Ready,
    /// Cluster provisioning failed
    Failed,
}

impl std::fmt::Display for ClusterPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Provisioning => write!(f, "Provisioning"),
            Self::Ready => write!(f, "Ready"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Lifecycle phase of an access object (role, grant, or user)
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[non_exhaustive]
pub enum AccessPhase {
    /// Scheduled but not yet confirmed applied to the database
    #[default]
    Pending,
    /// Applied to the managed database
    Ready,
    /// Spec is invalid and cannot be applied until edited
    Failed,
}

impl std::fmt::Display for AccessPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Ready => write!(f, "Ready"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Status of a condition (True, False, Unknown)
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// The condition holds
    True,
    /// The condition does not hold
    False,
    /// The condition cannot be determined
    Unknown,
}

/// A condition describing one aspect of an object's state
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Condition {
    /// Type of condition (e.g., Ready, DependenciesSatisfied)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    pub reason: String,

    /// Human-readable message
    pub message: String,

    /// Last time the condition transitioned
    #[serde(rename = "lastTransitionTime")]
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
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }
}

/// Resolve the owning cluster of an access object.
///
/// The explicit `clusterRef` spec field is authoritative. Splitting the
/// object name on `.` (legacy `<cluster>.<object>` naming) is a fragile
/// fallback kept only for objects created before `clusterRef` existed.
pub fn owning_cluster_of(cluster_ref: &str, object_name: &str) -> Option<String> {
    if !cluster_ref.is_empty() {
        return Some(cluster_ref.to_string());
    }

    // Legacy fallback: "<cluster>.<object>". A name with no separator has no
    // derivable owner.
    match object_name.split_once('.') {
        Some((cluster, rest)) if !cluster.is_empty() && !rest.is_empty() => {
            Some(cluster.to_string())
        }
        _ => None,
    }
}
