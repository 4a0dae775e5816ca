//! Access controllers: glue between CRD events and the coordinator
//!
//! The reconcile functions here are deliberately thin. They gate on cluster
//! readiness, resolve the owning cluster, and hand the object to the
//! dependency coordinator; the coordinator's workers do the actual database
//! work in dependency order. Every reconcile requeues at the periodic resync
//! interval - the coordinator's drop-on-full queue policy depends on that.

use std::sync::Arc;

use async_trait::async_trait;
use kube::api::ListParams;
use kube::runtime::controller::Action;
use kube::{Api, Client, ResourceExt};
use tracing::{debug, warn};

use crate::coordinator::{DependencyCoordinator, DependencyLookup, ResourceKind, ResourceRef};
use crate::crd::{AccessPhase, AccessStatus, StrataGrant, StrataRole, StrataUser};
use crate::{Error, DEFAULT_NOT_READY_REQUEUE, DEFAULT_RESYNC_INTERVAL};

use super::database::patch_access_status;
use super::readiness::ClusterReadiness;

/// Shared context for the three access controllers
pub struct AccessContext {
    /// Kubernetes client
    pub client: Client,
    /// The dependency coordinator all three controllers feed
    pub coordinator: Arc<DependencyCoordinator>,
    /// Readiness gate consulted before any scheduling
    pub readiness: Arc<dyn ClusterReadiness>,
}

impl AccessContext {
    /// Create a new context
    pub fn new(
        client: Client,
        coordinator: Arc<DependencyCoordinator>,
        readiness: Arc<dyn ClusterReadiness>,
    ) -> Self {
        Self {
            client,
            coordinator,
            readiness,
        }
    }
}

/// Reconcile a StrataRole: gate on readiness, then schedule it
pub async fn reconcile_role(role: Arc<StrataRole>, ctx: Arc<AccessContext>) -> Result<Action, Error> {
    let reference = role.resource_ref();

    let Some(cluster) = role.owning_cluster() else {
        return fail_unowned::<StrataRole>(&ctx, &reference).await;
    };

    if !ctx.readiness.is_ready(&cluster).await? {
        debug!(%reference, cluster, "Owning cluster not ready, deferring");
        return Ok(Action::requeue(DEFAULT_NOT_READY_REQUEUE));
    }

    ctx.coordinator.schedule_role(reference, &cluster);
    Ok(Action::requeue(DEFAULT_RESYNC_INTERVAL))
}

/// Reconcile a StrataGrant: validate, gate on readiness, then schedule it
pub async fn reconcile_grant(
    grant: Arc<StrataGrant>,
    ctx: Arc<AccessContext>,
) -> Result<Action, Error> {
    let reference = grant.resource_ref();

    if let Err(e) = grant.validate() {
        return fail_invalid::<StrataGrant>(&ctx, &reference, &e).await;
    }

    let Some(cluster) = grant.owning_cluster() else {
        return fail_unowned::<StrataGrant>(&ctx, &reference).await;
    };

    if !ctx.readiness.is_ready(&cluster).await? {
        debug!(%reference, cluster, "Owning cluster not ready, deferring");
        return Ok(Action::requeue(DEFAULT_NOT_READY_REQUEUE));
    }

    ctx.coordinator.schedule_grant(reference, &cluster);
    Ok(Action::requeue(DEFAULT_RESYNC_INTERVAL))
}

/// Reconcile a StrataUser: validate, gate on readiness, then schedule it
pub async fn reconcile_user(user: Arc<StrataUser>, ctx: Arc<AccessContext>) -> Result<Action, Error> {
    let reference = user.resource_ref();

    if let Err(e) = user.validate() {
        return fail_invalid::<StrataUser>(&ctx, &reference, &e).await;
    }

    let Some(cluster) = user.owning_cluster() else {
        return fail_unowned::<StrataUser>(&ctx, &reference).await;
    };

    if !ctx.readiness.is_ready(&cluster).await? {
        debug!(%reference, cluster, "Owning cluster not ready, deferring");
        return Ok(Action::requeue(DEFAULT_NOT_READY_REQUEUE));
    }

    ctx.coordinator.schedule_user(reference, &cluster);
    Ok(Action::requeue(DEFAULT_RESYNC_INTERVAL))
}

/// Error policy shared by the three controllers: log and retry soon
pub fn access_error_policy<K>(obj: Arc<K>, error: &Error, _ctx: Arc<AccessContext>) -> Action
where
    K: kube::Resource,
{
    warn!(name = %obj.name_any(), error = %error, "Reconciliation failed, will retry");
    Action::requeue(DEFAULT_NOT_READY_REQUEUE)
}

/// Mark an object Failed because its owning cluster cannot be determined.
///
/// User error: requeue only at the slow resync interval so a spec edit gets
/// picked up without hammering the API server in between.
async fn fail_unowned<K>(ctx: &AccessContext, reference: &ResourceRef) -> Result<Action, Error>
where
    K: kube::Resource<Scope = kube::core::NamespaceResourceScope, DynamicType = ()>
        + Clone
        + serde::de::DeserializeOwned
        + std::fmt::Debug,
{
    warn!(%reference, "Cannot determine owning cluster; set spec.clusterRef");
    let status = AccessStatus::with_phase(AccessPhase::Failed)
        .message("cannot determine owning cluster; set spec.clusterRef");
    patch_access_status::<K>(&ctx.client, &reference.namespace, &reference.name, &status).await?;
    Ok(Action::requeue(DEFAULT_RESYNC_INTERVAL))
}

/// Mark an object Failed because its spec is invalid
async fn fail_invalid<K>(
    ctx: &AccessContext,
    reference: &ResourceRef,
    error: &Error,
) -> Result<Action, Error>
where
    K: kube::Resource<Scope = kube::core::NamespaceResourceScope, DynamicType = ()>
        + Clone
        + serde::de::DeserializeOwned
        + std::fmt::Debug,
{
    warn!(%reference, error = %error, "Invalid spec, marking Failed");
    let status = AccessStatus::with_phase(AccessPhase::Failed).message(error.to_string());
    patch_access_status::<K>(&ctx.client, &reference.namespace, &reference.name, &status).await?;
    Ok(Action::requeue(DEFAULT_RESYNC_INTERVAL))
}

/// Dependency lookup backed by the CRDs' declared references
///
/// - A role has no upstream dependencies.
/// - A grant depends on the role named by `spec.roleRef`.
/// - A user depends on every role in `spec.roles`, plus every grant in the
///   same namespace and cluster that targets one of those roles.
pub struct KubeDependencyLookup {
    client: Client,
}

impl KubeDependencyLookup {
    /// Create a lookup reading declared references through the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn grant_dependencies(&self, item: &ResourceRef) -> Result<Vec<ResourceRef>, Error> {
        let api: Api<StrataGrant> = Api::namespaced(self.client.clone(), &item.namespace);
        let Some(grant) = api.get_opt(&item.name).await? else {
            // Deleted: no dependencies left to wait on.
            return Ok(Vec::new());
        };
        Ok(vec![ResourceRef::role(
            grant.spec.role_ref.clone(),
            item.namespace.clone(),
        )])
    }

    async fn user_dependencies(&self, item: &ResourceRef) -> Result<Vec<ResourceRef>, Error> {
        let users: Api<StrataUser> = Api::namespaced(self.client.clone(), &item.namespace);
        let Some(user) = users.get_opt(&item.name).await? else {
            return Ok(Vec::new());
        };

        let cluster = user.owning_cluster();
        let mut deps: Vec<ResourceRef> = user
            .spec
            .roles
            .iter()
            .map(|role| ResourceRef::role(role.clone(), item.namespace.clone()))
            .collect();

        // Grants targeting any of the user's roles, same namespace and cluster
        let grants: Api<StrataGrant> = Api::namespaced(self.client.clone(), &item.namespace);
        for grant in grants.list(&ListParams::default()).await? {
            if user.spec.roles.contains(&grant.spec.role_ref) && grant.owning_cluster() == cluster {
                deps.push(grant.resource_ref());
            }
        }

        Ok(deps)
    }
}

#[async_trait]
impl DependencyLookup for KubeDependencyLookup {
    async fn dependencies(&self, item: &ResourceRef) -> Result<Vec<ResourceRef>, Error> {
        match item.kind {
            ResourceKind::Role => Ok(Vec::new()),
            ResourceKind::Grant => self.grant_dependencies(item).await,
            ResourceKind::User => self.user_dependencies(item).await,
        }
    }
}
