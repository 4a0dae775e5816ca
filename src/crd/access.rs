//! Access-control Custom Resource Definitions
//!
//! StrataRole, StrataGrant, and StrataUser describe the access-control
//! objects of a managed StrataDB cluster. They form a dependency chain the
//! coordinator enforces at dispatch time:
//!
//! - a **role** is a named permission bundle,
//! - a **grant** assigns privileges to a role and must wait for that role,
//! - a **user** is an account holding roles and must wait for its roles and
//!   for every grant targeting them.
//!
//! All three carry an explicit `clusterRef` naming their owning
//! StrataCluster. Deriving the owner from a `<cluster>.<object>` name is a
//! deprecated fallback (see [`owning_cluster_of`]).

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{owning_cluster_of, AccessPhase, Condition};
use crate::coordinator::ResourceRef;

/// Specification for a StrataRole
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "strata.dev",
    version = "v1alpha1",
    kind = "StrataRole",
    plural = "strataroles",
    status = "AccessStatus",
    namespaced,
    printcolumn = r#"{"name":"Cluster","type":"string","jsonPath":".spec.clusterRef"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct StrataRoleSpec {
    /// Name of the owning StrataCluster
    #[serde(default)]
    pub cluster_ref: String,

    /// Privileges bundled into this role (e.g. SELECT, INSERT)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub privileges: Vec<String>,
}

/// Specification for a StrataGrant
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "strata.dev",
    version = "v1alpha1",
    kind = "StrataGrant",
    plural = "stratagrants",
    status = "AccessStatus",
    namespaced,
    printcolumn = r#"{"name":"Cluster","type":"string","jsonPath":".spec.clusterRef"}"#,
    printcolumn = r#"{"name":"Role","type":"string","jsonPath":".spec.roleRef"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct StrataGrantSpec {
    /// Name of the owning StrataCluster
    #[serde(default)]
    pub cluster_ref: String,

    /// Name of the StrataRole this grant assigns privileges to
    pub role_ref: String,

    /// Privileges assigned by this grant
    pub privileges: Vec<String>,

    /// Database object the privileges apply to (e.g. "sales.orders");
    /// cluster-wide when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,
}

/// Specification for a StrataUser
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "strata.dev",
    version = "v1alpha1",
    kind = "StrataUser",
    plural = "stratausers",
    status = "AccessStatus",
    namespaced,
    printcolumn = r#"{"name":"Cluster","type":"string","jsonPath":".spec.clusterRef"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct StrataUserSpec {
    /// Name of the owning StrataCluster
    #[serde(default)]
    pub cluster_ref: String,

    /// Roles held by this user account
    pub roles: Vec<String>,

    /// Name of the Secret holding the account credentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_secret_ref: Option<String>,
}

/// Status shared by all access objects
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AccessStatus {
    /// Current phase of the access object
    #[serde(default)]
    pub phase: AccessPhase,

    /// Human-readable message about current state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Conditions representing the object state
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl AccessStatus {
    /// Create a new status with the given phase
    pub fn with_phase(phase: AccessPhase) -> Self {
        Self {
            phase,
            ..Default::default()
        }
    }

    /// Set the message and return self for chaining
    pub fn message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Add a condition, replacing any existing condition of the same type
    pub fn condition(mut self, condition: Condition) -> Self {
        self.conditions.retain(|c| c.type_ != condition.type_);
        self.conditions.push(condition);
        self
    }
}

impl StrataRole {
    /// The owning cluster, from `clusterRef` or the legacy name fallback
    pub fn owning_cluster(&self) -> Option<String> {
        owning_cluster_of(&self.spec.cluster_ref, &self.name_any())
    }

    /// Coordinator reference to this object
    pub fn resource_ref(&self) -> ResourceRef {
        ResourceRef::role(self.name_any(), self.namespace().unwrap_or_default())
    }
}

impl StrataGrant {
    /// The owning cluster, from `clusterRef` or the legacy name fallback
    pub fn owning_cluster(&self) -> Option<String> {
        owning_cluster_of(&self.spec.cluster_ref, &self.name_any())
    }

    /// Coordinator reference to this object
    pub fn resource_ref(&self) -> ResourceRef {
        ResourceRef::grant(self.name_any(), self.namespace().unwrap_or_default())
    }

    /// Validate the grant specification
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.spec.role_ref.is_empty() {
            return Err(crate::Error::validation(format!(
                "grant '{}' must reference a role",
                self.name_any()
            )));
        }
        if self.spec.privileges.is_empty() {
            return Err(crate::Error::validation(format!(
                "grant '{}' must assign at least one privilege",
                self.name_any()
            )));
        }
        Ok(())
    }
}

impl StrataUser {
    /// The owning cluster, from `clusterRef` or the legacy name fallback
    pub fn owning_cluster(&self) -> Option<String> {
        owning_cluster_of(&self.spec.cluster_ref, &self.name_any())
    }

    /// Coordinator reference to this object
    pub fn resource_ref(&self) -> ResourceRef {
        ResourceRef::user(self.name_any(), self.namespace().unwrap_or_default())
    }

    /// Validate the user specification
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.spec.roles.is_empty() {
            return Err(crate::Error::validation(format!(
                "user '{}' must hold at least one role",
                self.name_any()
            )));
        }
        Ok(())
    }
}
