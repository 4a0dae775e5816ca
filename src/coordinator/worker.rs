//! Kind workers: one concurrent task per kind draining its dispatch queue
//!
//! A worker blocks only while idly waiting on its queue; retry and
//! re-submission delays run on detached timer tasks so the worker keeps
//! draining. On shutdown a worker exits between items - an in-flight
//! reconcile operation always finishes before the worker stops.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::types::{ResourceKind, WorkItem};
use super::DependencyCoordinator;

/// Worker loop for one kind. Spawned by [`DependencyCoordinator::start`].
pub(crate) async fn run(
    coordinator: Arc<DependencyCoordinator>,
    kind: ResourceKind,
    mut rx: mpsc::Receiver<WorkItem>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(%kind, "Access worker started");

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            item = rx.recv() => match item {
                Some(item) => process(&coordinator, kind, item).await,
                None => break,
            },
        }
    }

    info!(%kind, "Access worker stopped");
}

/// Handle one dispatched item: dependency resolution, then the reconcile
/// operation, then outcome reporting.
async fn process(coordinator: &Arc<DependencyCoordinator>, kind: ResourceKind, item: WorkItem) {
    // Dependencies are resolved at dispatch time, not schedule time: the
    // dependency state can change while the item sits queued.
    if kind.has_dependencies() {
        match coordinator.lookup().dependencies(&item.reference).await {
            Ok(deps) => {
                let unsatisfied: Vec<_> = deps
                    .iter()
                    .filter(|dep| !coordinator.is_completed(dep))
                    .collect();

                if !unsatisfied.is_empty() {
                    debug!(
                        %kind,
                        reference = %item.reference,
                        cluster = %item.cluster,
                        waiting_on = ?unsatisfied,
                        "Dependencies not ready, re-submitting after delay"
                    );
                    resubmit_after(
                        coordinator,
                        kind,
                        item,
                        coordinator.config().dependency_retry_delay,
                    );
                    return;
                }
            }
            Err(e) => {
                warn!(
                    %kind,
                    reference = %item.reference,
                    error = %e,
                    "Dependency lookup failed, re-submitting after delay"
                );
                resubmit_after(
                    coordinator,
                    kind,
                    item,
                    coordinator.config().reconcile_retry_delay,
                );
                return;
            }
        }
    }

    match coordinator.operation(kind).reconcile(&item.reference).await {
        Ok(outcome) => {
            report_complete(coordinator, kind, &item);
            if let Some(delay) = outcome.requeue_after {
                debug!(
                    %kind,
                    reference = %item.reference,
                    ?delay,
                    "Reconcile requested re-check"
                );
                resubmit_after(coordinator, kind, item, delay);
            }
        }
        Err(e) => {
            // No attempt cap: retries continue until success, object
            // deletion, or shutdown.
            warn!(
                %kind,
                reference = %item.reference,
                cluster = %item.cluster,
                error = %e,
                retry_in = ?coordinator.config().reconcile_retry_delay,
                "Reconcile operation failed, will retry"
            );
            resubmit_after(
                coordinator,
                kind,
                item,
                coordinator.config().reconcile_retry_delay,
            );
        }
    }
}

fn report_complete(coordinator: &Arc<DependencyCoordinator>, kind: ResourceKind, item: &WorkItem) {
    match kind {
        ResourceKind::Role => {
            coordinator.on_role_complete(&item.reference, &item.cluster, true);
        }
        ResourceKind::Grant => {
            coordinator.on_grant_complete(&item.reference, &item.cluster, true);
        }
        ResourceKind::User => {
            coordinator.on_user_complete(&item.reference, &item.cluster, true);
        }
    }
}

/// Re-enqueue an item after a delay on a detached timer task.
///
/// The timer observes the shutdown signal so a stopping coordinator does not
/// leak sleepers. The send bypasses the schedule path: the item is already
/// tracked as pending, and a full queue here just waits for capacity instead
/// of dropping a retry that nothing would reschedule.
fn resubmit_after(
    coordinator: &Arc<DependencyCoordinator>,
    kind: ResourceKind,
    item: WorkItem,
    delay: Duration,
) {
    let tx = coordinator.resubmit_sender(kind);
    let mut shutdown = coordinator.shutdown_rx();

    tokio::spawn(async move {
        tokio::select! {
            biased;
            _ = shutdown.changed() => {}
            _ = tokio::time::sleep(delay) => {
                // Send failure means the worker is gone; the item stays pending.
                let _ = tx.send(item).await;
            }
        }
    });
}
