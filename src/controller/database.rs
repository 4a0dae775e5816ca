//! Managed-database admin surface and the per-kind reconcile operations
//!
//! [`DatabaseAdmin`] abstracts the calls into the managed StrataDB cluster;
//! the wire protocol behind it is deliberately opaque. The per-kind
//! reconcile operations fetch the current object from the API server, drive
//! the admin call, and record the Ready phase on success. Transient database
//! failures surface as errors and are retried by the coordinator's workers
//! with a fixed delay and no attempt cap.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use kube::api::{Patch, PatchParams};
use kube::core::NamespaceResourceScope;
use kube::{Api, Client, ResourceExt};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use crate::coordinator::{ReconcileOperation, ReconcileOutcome, ResourceRef};
use crate::crd::{
    AccessPhase, AccessStatus, Condition, ConditionStatus, StrataGrant, StrataRole, StrataUser,
};
use crate::Error;

/// Field manager name used for all status patches
const FIELD_MANAGER: &str = "strata-controller";

/// Admin call surface of a managed StrataDB cluster
///
/// Implementations perform the actual create/update statements. All calls
/// must be idempotent: the coordinator re-dispatches items freely under its
/// level-triggered model.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DatabaseAdmin: Send + Sync {
    /// Ensure the role exists in the cluster with the declared privileges
    async fn ensure_role(&self, cluster: &str, role: &StrataRole) -> Result<(), Error>;

    /// Ensure the grant's privileges are assigned to its role
    async fn ensure_grant(&self, cluster: &str, grant: &StrataGrant) -> Result<(), Error>;

    /// Ensure the user account exists and holds its declared roles
    async fn ensure_user(&self, cluster: &str, user: &StrataUser) -> Result<(), Error>;
}

/// Development backend that logs the statements it would execute
///
/// Stands in for a real database driver in local runs and tests, the same
/// way a dry-run backend would.
pub struct LoggingDatabaseAdmin;

#[async_trait]
impl DatabaseAdmin for LoggingDatabaseAdmin {
    async fn ensure_role(&self, cluster: &str, role: &StrataRole) -> Result<(), Error> {
        info!(
            cluster,
            role = %role.name_any(),
            privileges = ?role.spec.privileges,
            "Would ensure role"
        );
        Ok(())
    }

    async fn ensure_grant(&self, cluster: &str, grant: &StrataGrant) -> Result<(), Error> {
        info!(
            cluster,
            grant = %grant.name_any(),
            role = %grant.spec.role_ref,
            privileges = ?grant.spec.privileges,
            object = ?grant.spec.object,
            "Would ensure grant"
        );
        Ok(())
    }

    async fn ensure_user(&self, cluster: &str, user: &StrataUser) -> Result<(), Error> {
        info!(
            cluster,
            user = %user.name_any(),
            roles = ?user.spec.roles,
            "Would ensure user"
        );
        Ok(())
    }
}

/// Patch an access object's status subresource
pub(crate) async fn patch_access_status<K>(
    client: &Client,
    namespace: &str,
    name: &str,
    status: &AccessStatus,
) -> Result<(), Error>
where
    K: kube::Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + DeserializeOwned
        + Debug,
{
    let api: Api<K> = Api::namespaced(client.clone(), namespace);
    let patch = serde_json::json!({ "status": status });
    api.patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

fn ready_status() -> AccessStatus {
    AccessStatus::with_phase(AccessPhase::Ready).condition(Condition::new(
        "Ready",
        ConditionStatus::True,
        "Applied",
        "applied to the managed database",
    ))
}

/// Reconcile operation for StrataRole objects
pub struct RoleReconcileOperation {
    client: Client,
    admin: Arc<dyn DatabaseAdmin>,
}

impl RoleReconcileOperation {
    /// Create the operation with the given client and database backend
    pub fn new(client: Client, admin: Arc<dyn DatabaseAdmin>) -> Self {
        Self { client, admin }
    }
}

#[async_trait]
impl ReconcileOperation for RoleReconcileOperation {
    async fn reconcile(&self, item: &ResourceRef) -> Result<ReconcileOutcome, Error> {
        let api: Api<StrataRole> = Api::namespaced(self.client.clone(), &item.namespace);
        let Some(role) = api.get_opt(&item.name).await? else {
            // Deleted since it was scheduled: nothing to apply.
            debug!(reference = %item, "Role no longer exists, nothing to do");
            return Ok(ReconcileOutcome::done());
        };

        let cluster = role.owning_cluster().ok_or_else(|| {
            Error::validation(format!("cannot determine owning cluster for role '{}'", item.name))
        })?;

        self.admin.ensure_role(&cluster, &role).await?;
        patch_access_status::<StrataRole>(&self.client, &item.namespace, &item.name, &ready_status())
            .await?;
        Ok(ReconcileOutcome::done())
    }
}

/// Reconcile operation for StrataGrant objects
pub struct GrantReconcileOperation {
    client: Client,
    admin: Arc<dyn DatabaseAdmin>,
}

impl GrantReconcileOperation {
    /// Create the operation with the given client and database backend
    pub fn new(client: Client, admin: Arc<dyn DatabaseAdmin>) -> Self {
        Self { client, admin }
    }
}

#[async_trait]
impl ReconcileOperation for GrantReconcileOperation {
    async fn reconcile(&self, item: &ResourceRef) -> Result<ReconcileOutcome, Error> {
        let api: Api<StrataGrant> = Api::namespaced(self.client.clone(), &item.namespace);
        let Some(grant) = api.get_opt(&item.name).await? else {
            debug!(reference = %item, "Grant no longer exists, nothing to do");
            return Ok(ReconcileOutcome::done());
        };

        grant.validate()?;
        let cluster = grant.owning_cluster().ok_or_else(|| {
            Error::validation(format!(
                "cannot determine owning cluster for grant '{}'",
                item.name
            ))
        })?;

        self.admin.ensure_grant(&cluster, &grant).await?;
        patch_access_status::<StrataGrant>(&self.client, &item.namespace, &item.name, &ready_status())
            .await?;
        Ok(ReconcileOutcome::done())
    }
}

/// Reconcile operation for StrataUser objects
pub struct UserReconcileOperation {
    client: Client,
    admin: Arc<dyn DatabaseAdmin>,
}

impl UserReconcileOperation {
    /// Create the operation with the given client and database backend
    pub fn new(client: Client, admin: Arc<dyn DatabaseAdmin>) -> Self {
        Self { client, admin }
    }
}

#[async_trait]
impl ReconcileOperation for UserReconcileOperation {
    async fn reconcile(&self, item: &ResourceRef) -> Result<ReconcileOutcome, Error> {
        let api: Api<StrataUser> = Api::namespaced(self.client.clone(), &item.namespace);
        let Some(user) = api.get_opt(&item.name).await? else {
            debug!(reference = %item, "User no longer exists, nothing to do");
            return Ok(ReconcileOutcome::done());
        };

        user.validate()?;
        let cluster = user.owning_cluster().ok_or_else(|| {
            Error::validation(format!(
                "cannot determine owning cluster for user '{}'",
                item.name
            ))
        })?;

        self.admin.ensure_user(&cluster, &user).await?;
        patch_access_status::<StrataUser>(&self.client, &item.namespace, &item.name, &ready_status())
            .await?;
        Ok(ReconcileOutcome::done())
    }
}
