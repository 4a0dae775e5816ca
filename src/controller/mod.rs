//! Controller implementations for Strata CRDs
//!
//! The access controllers (role, grant, user) follow the Kubernetes
//! controller pattern but delegate ordering to the dependency coordinator:
//! reconcile functions only gate and schedule, the coordinator's workers
//! apply changes to the managed database.

mod access;
mod database;
mod readiness;

pub use access::{
    access_error_policy, reconcile_grant, reconcile_role, reconcile_user, AccessContext,
    KubeDependencyLookup,
};
pub use database::{
    DatabaseAdmin, GrantReconcileOperation, LoggingDatabaseAdmin, RoleReconcileOperation,
    UserReconcileOperation,
};
pub use readiness::{CachedClusterReadiness, ClusterReadiness, KubeClusterReadiness};
