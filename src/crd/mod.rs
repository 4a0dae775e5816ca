//! Custom Resource Definitions for Strata
//!
//! This module contains all CRD definitions used by the Strata operator.

mod access;
mod cluster;
mod types;

pub use access::{
    AccessStatus, StrataGrant, StrataGrantSpec, StrataRole, StrataRoleSpec, StrataUser,
    StrataUserSpec,
};
pub use cluster::{StrataCluster, StrataClusterSpec, StrataClusterStatus};
pub use types::{owning_cluster_of, AccessPhase, ClusterPhase, Condition, ConditionStatus};
