//! StrataCluster Custom Resource Definition
//!
//! The StrataCluster CRD represents one managed StrataDB cluster. The access
//! controllers consult its status as the readiness gate before scheduling
//! any role, grant, or user work for that cluster.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{ClusterPhase, Condition};

/// Specification for a StrataCluster
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "strata.dev",
    version = "v1alpha1",
    kind = "StrataCluster",
    plural = "strataclusters",
    shortname = "sdc",
    status = "StrataClusterStatus",
    namespaced = false,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".spec.version"}"#,
    printcolumn = r#"{"name":"Replicas","type":"integer","jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct StrataClusterSpec {
    /// StrataDB version to deploy
    pub version: String,

    /// Number of database replicas
    pub replicas: u32,

    /// Plugins to install into the cluster
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plugins: Vec<String>,
}

impl StrataClusterSpec {
    /// Validate the cluster specification
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.version.is_empty() {
            return Err(crate::Error::validation("cluster version must not be empty"));
        }
        if self.replicas == 0 {
            return Err(crate::Error::validation("replicas must be at least 1"));
        }
        Ok(())
    }
}

/// Status for a StrataCluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StrataClusterStatus {
    /// Current phase of the cluster lifecycle
    #[serde(default)]
    pub phase: ClusterPhase,

    /// Human-readable message about current state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Conditions representing the cluster state
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Number of ready database replicas
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready_replicas: Option<u32>,
}

impl StrataCluster {
    /// Returns true if the cluster is ready for access provisioning
    pub fn is_ready(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(|s| s.phase == ClusterPhase::Ready)
    }
}
