//! Strata Operator - access-control provisioning for managed StrataDB clusters

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures::StreamExt;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use strata::controller::{
    access_error_policy, reconcile_grant, reconcile_role, reconcile_user, AccessContext,
    CachedClusterReadiness, GrantReconcileOperation, KubeClusterReadiness, KubeDependencyLookup,
    LoggingDatabaseAdmin, RoleReconcileOperation, UserReconcileOperation,
};
use strata::coordinator::{DependencyCoordinator, KindOperations};
use strata::crd::{StrataCluster, StrataGrant, StrataRole, StrataUser};

/// How long a cluster readiness answer is trusted before re-reading the CRD
const READINESS_CACHE_TTL: Duration = Duration::from_secs(30);

/// Strata - Kubernetes operator provisioning roles, grants, and users on
/// managed StrataDB clusters
#[derive(Parser, Debug)]
#[command(name = "strata", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if cli.crd {
        print_crds()?;
        return Ok(());
    }

    run_controller().await
}

/// Serialize every CRD manifest to stdout as a multi-document YAML stream
fn print_crds() -> anyhow::Result<()> {
    let crds = [
        serde_yaml::to_string(&StrataCluster::crd())?,
        serde_yaml::to_string(&StrataRole::crd())?,
        serde_yaml::to_string(&StrataGrant::crd())?,
        serde_yaml::to_string(&StrataUser::crd())?,
    ];
    for crd in crds {
        println!("---");
        print!("{crd}");
    }
    Ok(())
}

/// Ensure all Strata CRDs are installed
///
/// The operator installs its own CRDs on startup using server-side apply so
/// the CRD versions always match the operator version.
async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
    use kube::api::{Patch, PatchParams};

    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply("strata-controller").force();

    let manifests = [
        ("strataclusters.strata.dev", StrataCluster::crd()),
        ("strataroles.strata.dev", StrataRole::crd()),
        ("stratagrants.strata.dev", StrataGrant::crd()),
        ("stratausers.strata.dev", StrataUser::crd()),
    ];

    for (name, crd) in manifests {
        tracing::info!(crd = name, "Installing CRD...");
        crds.patch(name, &params, &Patch::Apply(&crd))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to install CRD {}: {}", name, e))?;
    }

    tracing::info!("All Strata CRDs installed/updated");
    Ok(())
}

/// Run in controller mode - watches the access CRDs and feeds the coordinator
async fn run_controller() -> anyhow::Result<()> {
    tracing::info!("Strata controller starting...");

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    // Operator installs its own CRDs on startup
    ensure_crds_installed(&client).await?;

    // Wire the coordinator: per-kind reconcile operations over the database
    // admin backend, plus the dependency lookup the workers consult at
    // dispatch time.
    let admin = Arc::new(LoggingDatabaseAdmin);
    let operations = KindOperations {
        role: Arc::new(RoleReconcileOperation::new(client.clone(), admin.clone())),
        grant: Arc::new(GrantReconcileOperation::new(client.clone(), admin.clone())),
        user: Arc::new(UserReconcileOperation::new(client.clone(), admin)),
    };
    let lookup = Arc::new(KubeDependencyLookup::new(client.clone()));
    let coordinator = Arc::new(DependencyCoordinator::with_defaults(operations, lookup));
    coordinator.start();

    let readiness = Arc::new(CachedClusterReadiness::new(
        KubeClusterReadiness::new(client.clone()),
        READINESS_CACHE_TTL,
    ));

    let ctx = Arc::new(AccessContext::new(
        client.clone(),
        coordinator.clone(),
        readiness,
    ));

    let roles: Api<StrataRole> = Api::all(client.clone());
    let grants: Api<StrataGrant> = Api::all(client.clone());
    let users: Api<StrataUser> = Api::all(client);

    tracing::info!("Starting Strata controllers...");
    tracing::info!("  - StrataRole controller");
    tracing::info!("  - StrataGrant controller");
    tracing::info!("  - StrataUser controller");

    let role_controller = Controller::new(roles, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile_role, access_error_policy, ctx.clone())
        .for_each(|result| async move {
            match result {
                Ok(action) => {
                    tracing::debug!(?action, "Role reconciliation completed");
                }
                Err(e) => {
                    tracing::error!(error = ?e, "Role reconciliation error");
                }
            }
        });

    let grant_controller = Controller::new(grants, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile_grant, access_error_policy, ctx.clone())
        .for_each(|result| async move {
            match result {
                Ok(action) => {
                    tracing::debug!(?action, "Grant reconciliation completed");
                }
                Err(e) => {
                    tracing::error!(error = ?e, "Grant reconciliation error");
                }
            }
        });

    let user_controller = Controller::new(users, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile_user, access_error_policy, ctx.clone())
        .for_each(|result| async move {
            match result {
                Ok(action) => {
                    tracing::debug!(?action, "User reconciliation completed");
                }
                Err(e) => {
                    tracing::error!(error = ?e, "User reconciliation error");
                }
            }
        });

    // Run all controllers concurrently until signal-driven shutdown
    tokio::select! {
        _ = role_controller => {
            tracing::info!("Role controller completed");
        }
        _ = grant_controller => {
            tracing::info!("Grant controller completed");
        }
        _ = user_controller => {
            tracing::info!("User controller completed");
        }
    }

    // Drain the coordinator: in-flight reconciles finish, queued work is dropped
    coordinator.stop().await;

    tracing::info!("Strata controller shutting down");
    Ok(())
}
