//! Dependency-ordered reconciliation coordinator
//!
//! The coordinator sequences access-control work across three interdependent
//! kinds - Role, Grant, User - so that privilege grants are never applied
//! before their target role exists in the managed database, and user accounts
//! are never created before every role and grant they depend on has
//! converged.
//!
//! # Model
//!
//! Each kind owns a pending set (refs awaiting confirmation, grouped by
//! owning cluster), a completion tracker (timestamped records of converged
//! refs), and a bounded dispatch queue drained by exactly one worker. The
//! per-kind state never contends on another kind's lock.
//!
//! Per-kind controllers call [`DependencyCoordinator::schedule_role`] (and
//! friends) whenever an object needs attention, and
//! [`DependencyCoordinator::on_role_complete`] (and friends) after that
//! kind's reconcile operation has run. When a cluster's pending set for one
//! kind drains, every pending item of the next kind in the chain is
//! (re-)dispatched for that cluster.
//!
//! Workers re-resolve dependencies at dispatch time rather than at schedule
//! time: a role can be scheduled, fail, then later succeed while a dependent
//! grant sits queued, and the grant must see the fresh outcome.
//!
//! # Failure model
//!
//! Every failure degrades to "try again later": unsatisfied dependencies and
//! failed reconcile operations are re-submitted after fixed delays with no
//! attempt cap, and a saturated queue drops the newest item, relying on the
//! controllers' periodic resync for recovery. Nothing here is fatal.

mod queue;
mod store;
mod types;
mod worker;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

use crate::Error;
use queue::{DispatchQueue, EnqueueResult};
use store::KindState;

pub use types::{ResourceKind, ResourceRef, WorkItem};

/// Outcome of a successful reconcile operation
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// If set, the worker re-enqueues the item after this delay for a re-check
    pub requeue_after: Option<Duration>,
}

impl ReconcileOutcome {
    /// Outcome requesting no follow-up dispatch
    pub fn done() -> Self {
        Self::default()
    }

    /// Outcome requesting a re-check after the given delay
    pub fn requeue_after(delay: Duration) -> Self {
        Self {
            requeue_after: Some(delay),
        }
    }
}

/// One kind's reconcile operation, owned by that kind's resource controller
///
/// Performs the actual create/update against the managed database. The
/// coordinator guarantees at most one concurrent invocation per (kind, ref)
/// because each kind has exactly one worker draining its queue.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ReconcileOperation: Send + Sync {
    /// Drive the referenced object toward its desired state
    async fn reconcile(&self, item: &ResourceRef) -> Result<ReconcileOutcome, Error>;
}

/// Reads an object's declared upstream dependencies
///
/// For a grant this is the roles it references; for a user it is the user's
/// roles plus the grants targeting those roles. Called by the workers at
/// dispatch time, never cached, so dependency state is always fresh.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DependencyLookup: Send + Sync {
    /// The refs that must be completed before this item may dispatch
    async fn dependencies(&self, item: &ResourceRef) -> Result<Vec<ResourceRef>, Error>;
}

/// The three per-kind reconcile operations wired into a coordinator
#[derive(Clone)]
pub struct KindOperations {
    /// Reconcile operation for roles
    pub role: Arc<dyn ReconcileOperation>,
    /// Reconcile operation for grants
    pub grant: Arc<dyn ReconcileOperation>,
    /// Reconcile operation for users
    pub user: Arc<dyn ReconcileOperation>,
}

impl KindOperations {
    /// Use the same operation for all three kinds (handy in tests)
    pub fn uniform(op: Arc<dyn ReconcileOperation>) -> Self {
        Self {
            role: op.clone(),
            grant: op.clone(),
            user: op,
        }
    }

    fn get(&self, kind: ResourceKind) -> &Arc<dyn ReconcileOperation> {
        match kind {
            ResourceKind::Role => &self.role,
            ResourceKind::Grant => &self.grant,
            ResourceKind::User => &self.user,
        }
    }
}

/// Tunable timings and capacities for a coordinator instance
///
/// Defaults match production behavior; tests shrink them to keep suites fast.
#[derive(Clone, Debug)]
pub struct CoordinatorConfig {
    /// Capacity of each kind's dispatch queue
    pub queue_capacity: usize,
    /// Delay before re-submitting an item whose dependencies are not yet complete
    pub dependency_retry_delay: Duration,
    /// Delay before re-submitting an item whose reconcile operation failed
    pub reconcile_retry_delay: Duration,
    /// How long completion records are kept before the sweep purges them
    pub completion_retention: Duration,
    /// How often the completion sweep runs
    pub sweep_interval: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            dependency_retry_delay: Duration::from_secs(10),
            reconcile_retry_delay: Duration::from_secs(30),
            completion_retention: Duration::from_secs(24 * 3600),
            sweep_interval: Duration::from_secs(3600),
        }
    }
}

/// Per-kind slot: bookkeeping, queue, and the worker's receiver
struct KindSlot {
    /// Pending set + completion tracker, one exclusive lock per kind
    state: Mutex<KindState>,
    queue: DispatchQueue,
    /// Taken by the kind worker on start
    receiver: Mutex<Option<mpsc::Receiver<WorkItem>>>,
    op: Arc<dyn ReconcileOperation>,
}

/// Coordinates dependency-ordered dispatch of access-control work
///
/// State is explicitly owned by the instance - no process-wide singletons -
/// so multiple independent coordinators (one per test, for example) never
/// cross-contaminate.
pub struct DependencyCoordinator {
    config: CoordinatorConfig,
    kinds: [KindSlot; 3],
    lookup: Arc<dyn DependencyLookup>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl DependencyCoordinator {
    /// Create a coordinator with the given config and collaborators
    pub fn new(
        config: CoordinatorConfig,
        operations: KindOperations,
        lookup: Arc<dyn DependencyLookup>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);

        let kinds = ResourceKind::ALL.map(|kind| {
            let (queue, rx) = DispatchQueue::new(kind, config.queue_capacity);
            KindSlot {
                state: Mutex::new(KindState::new()),
                queue,
                receiver: Mutex::new(Some(rx)),
                op: operations.get(kind).clone(),
            }
        });

        Self {
            config,
            kinds,
            lookup,
            shutdown,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Create a coordinator with default production timings
    pub fn with_defaults(operations: KindOperations, lookup: Arc<dyn DependencyLookup>) -> Self {
        Self::new(CoordinatorConfig::default(), operations, lookup)
    }

    // =========================================================================
    // Schedule entry points
    // =========================================================================

    /// Schedule a role for reconciliation
    pub fn schedule_role(&self, reference: ResourceRef, cluster: &str) {
        debug_assert_eq!(reference.kind, ResourceKind::Role);
        self.schedule_item(ResourceKind::Role, reference, cluster);
    }

    /// Schedule a grant for reconciliation
    pub fn schedule_grant(&self, reference: ResourceRef, cluster: &str) {
        debug_assert_eq!(reference.kind, ResourceKind::Grant);
        self.schedule_item(ResourceKind::Grant, reference, cluster);
    }

    /// Schedule a user for reconciliation
    pub fn schedule_user(&self, reference: ResourceRef, cluster: &str) {
        debug_assert_eq!(reference.kind, ResourceKind::User);
        self.schedule_item(ResourceKind::User, reference, cluster);
    }

    fn schedule_item(&self, kind: ResourceKind, reference: ResourceRef, cluster: &str) {
        let slot = self.slot(kind);

        let newly_inserted = slot
            .state
            .lock()
            .expect("kind state lock poisoned")
            .insert_pending(cluster, reference.clone());

        if !newly_inserted {
            // Already pending: either queued, in flight, or in a retry delay.
            // The existing tracking owns it.
            debug!(%kind, %reference, cluster, "Already pending, schedule is a no-op");
            return;
        }

        match slot.queue.push(WorkItem::new(reference.clone(), cluster)) {
            EnqueueResult::Enqueued => {
                debug!(%kind, %reference, cluster, "Scheduled for dispatch");
            }
            EnqueueResult::Saturated => {
                // Roll the insert back so the next periodic resync re-enters
                // through the fresh-insert path instead of no-opping on a
                // pending entry that nothing will ever dispatch.
                slot.state
                    .lock()
                    .expect("kind state lock poisoned")
                    .remove_pending(cluster, &reference);
            }
            EnqueueResult::Closed => {
                // Coordinator stopped: the schedule is accepted but the item
                // is never dispatched.
                debug!(%kind, %reference, cluster, "Coordinator stopped, item accepted but not dispatched");
            }
        }
    }

    // =========================================================================
    // Completion entry points
    // =========================================================================

    /// Record the outcome of a role reconcile operation
    pub fn on_role_complete(&self, reference: &ResourceRef, cluster: &str, success: bool) {
        self.complete_item(ResourceKind::Role, reference, cluster, success);
    }

    /// Record the outcome of a grant reconcile operation
    pub fn on_grant_complete(&self, reference: &ResourceRef, cluster: &str, success: bool) {
        self.complete_item(ResourceKind::Grant, reference, cluster, success);
    }

    /// Record the outcome of a user reconcile operation
    pub fn on_user_complete(&self, reference: &ResourceRef, cluster: &str, success: bool) {
        self.complete_item(ResourceKind::User, reference, cluster, success);
    }

    fn complete_item(
        &self,
        kind: ResourceKind,
        reference: &ResourceRef,
        cluster: &str,
        success: bool,
    ) {
        if !success {
            // The ref stays pending; retry is the worker's responsibility.
            debug!(%kind, %reference, cluster, "Completion reported as failed, ref stays pending");
            return;
        }

        let drained = self
            .slot(kind)
            .state
            .lock()
            .expect("kind state lock poisoned")
            .complete(cluster, reference);

        debug!(%kind, %reference, cluster, "Completion recorded");

        if drained {
            if let Some(next) = kind.downstream() {
                self.dispatch_pending(next, cluster);
            }
        }
    }

    /// Enqueue every currently pending item of a kind for one cluster
    fn dispatch_pending(&self, kind: ResourceKind, cluster: &str) {
        let slot = self.slot(kind);
        let pending = slot
            .state
            .lock()
            .expect("kind state lock poisoned")
            .pending_for_cluster(cluster);

        if pending.is_empty() {
            return;
        }

        info!(
            %kind,
            cluster,
            count = pending.len(),
            "Upstream kind drained, dispatching pending items"
        );

        for reference in pending {
            let item = WorkItem::new(reference.clone(), cluster);
            if slot.queue.push(item) == EnqueueResult::Saturated {
                slot.state
                    .lock()
                    .expect("kind state lock poisoned")
                    .remove_pending(cluster, &reference);
            }
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Start the three kind workers and the completion sweep.
    ///
    /// Idempotent: a second call on a running coordinator is a warning no-op.
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().expect("task list lock poisoned");
        if !tasks.is_empty() {
            warn!("Coordinator already started");
            return;
        }

        for kind in ResourceKind::ALL {
            let receiver = self.slot(kind)
                .receiver
                .lock()
                .expect("receiver lock poisoned")
                .take();
            match receiver {
                Some(rx) => {
                    tasks.push(tokio::spawn(worker::run(
                        Arc::clone(self),
                        kind,
                        rx,
                        self.shutdown.subscribe(),
                    )));
                }
                None => warn!(%kind, "Worker receiver already taken, worker not started"),
            }
        }

        tasks.push(tokio::spawn(run_sweep(
            Arc::clone(self),
            self.shutdown.subscribe(),
        )));

        info!("Dependency coordinator started");
    }

    /// Signal graceful shutdown and wait for workers to finish.
    ///
    /// In-flight reconcile operations always run to completion; queued items
    /// that have not been dispatched are abandoned. Scheduling after stop is
    /// still accepted but nothing is dispatched anymore.
    pub async fn stop(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut tasks = self.tasks.lock().expect("task list lock poisoned");
            tasks.drain(..).collect()
        };
        if handles.is_empty() {
            return;
        }

        let _ = self.shutdown.send(true);
        for handle in handles {
            let _ = handle.await;
        }

        info!("Dependency coordinator stopped");
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Returns true if this specific ref has converged and its completion
    /// record has not yet expired
    pub fn is_completed(&self, reference: &ResourceRef) -> bool {
        self.slot(reference.kind)
            .state
            .lock()
            .expect("kind state lock poisoned")
            .is_completed(reference)
    }

    /// Number of refs currently pending for a kind, across all clusters
    pub fn pending_len(&self, kind: ResourceKind) -> usize {
        self.slot(kind)
            .state
            .lock()
            .expect("kind state lock poisoned")
            .pending_len()
    }

    /// Number of live completion records for a kind
    pub fn completed_len(&self, kind: ResourceKind) -> usize {
        self.slot(kind)
            .state
            .lock()
            .expect("kind state lock poisoned")
            .completed_len()
    }

    // =========================================================================
    // Worker plumbing
    // =========================================================================

    fn slot(&self, kind: ResourceKind) -> &KindSlot {
        &self.kinds[kind.index()]
    }

    pub(crate) fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub(crate) fn lookup(&self) -> &Arc<dyn DependencyLookup> {
        &self.lookup
    }

    pub(crate) fn operation(&self, kind: ResourceKind) -> Arc<dyn ReconcileOperation> {
        self.slot(kind).op.clone()
    }

    /// Sender used by delayed re-submission timers; bypasses the pending-set
    /// no-op check because the item is already tracked as pending
    pub(crate) fn resubmit_sender(&self, kind: ResourceKind) -> mpsc::Sender<WorkItem> {
        self.slot(kind).queue.sender()
    }

    pub(crate) fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Purge completion records older than the retention window, all kinds
    fn purge_expired_completions(&self) {
        for kind in ResourceKind::ALL {
            let purged = self
                .slot(kind)
                .state
                .lock()
                .expect("kind state lock poisoned")
                .purge_completed_older_than(self.config.completion_retention);
            if purged > 0 {
                debug!(%kind, purged, "Purged expired completion records");
            }
        }
    }
}

/// Periodic completion-record sweep
///
/// Memory-bound only: dependents always re-resolve at dispatch time, so an
/// expired upstream record just blocks the dependent until the upstream is
/// rescheduled and recompletes through its controller's normal resync.
async fn run_sweep(coordinator: Arc<DependencyCoordinator>, mut shutdown: watch::Receiver<bool>) {
    let interval = coordinator.config().sweep_interval;
    debug!(?interval, "Completion sweep started");

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(interval) => {
                coordinator.purge_expired_completions();
            }
        }
    }

    debug!("Completion sweep stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_op() -> Arc<dyn ReconcileOperation> {
        let mut op = MockReconcileOperation::new();
        op.expect_reconcile()
            .returning(|_| Ok(ReconcileOutcome::done()));
        Arc::new(op)
    }

    fn empty_lookup() -> Arc<dyn DependencyLookup> {
        let mut lookup = MockDependencyLookup::new();
        lookup.expect_dependencies().returning(|_| Ok(Vec::new()));
        Arc::new(lookup)
    }

    fn unstarted_coordinator(capacity: usize) -> DependencyCoordinator {
        let config = CoordinatorConfig {
            queue_capacity: capacity,
            ..Default::default()
        };
        DependencyCoordinator::new(config, KindOperations::uniform(ok_op()), empty_lookup())
    }

    #[tokio::test]
    async fn schedule_is_idempotent_while_pending() {
        let coordinator = unstarted_coordinator(8);
        let admin = ResourceRef::role("admin", "default");

        coordinator.schedule_role(admin.clone(), "c1");
        coordinator.schedule_role(admin, "c1");

        assert_eq!(coordinator.pending_len(ResourceKind::Role), 1);
    }

    #[tokio::test]
    async fn saturated_schedule_rolls_back_pending_insert() {
        let coordinator = unstarted_coordinator(1);

        coordinator.schedule_role(ResourceRef::role("first", "default"), "c1");
        // Queue capacity is 1: the second insert is dropped and rolled back
        // so a later resync can retry it from scratch.
        coordinator.schedule_role(ResourceRef::role("second", "default"), "c1");

        assert_eq!(coordinator.pending_len(ResourceKind::Role), 1);
    }

    #[tokio::test]
    async fn failed_completion_keeps_ref_pending() {
        let coordinator = unstarted_coordinator(8);
        let admin = ResourceRef::role("admin", "default");

        coordinator.schedule_role(admin.clone(), "c1");
        coordinator.on_role_complete(&admin, "c1", false);

        assert_eq!(coordinator.pending_len(ResourceKind::Role), 1);
        assert!(!coordinator.is_completed(&admin));
    }

    #[tokio::test]
    async fn successful_completion_moves_pending_to_completed() {
        let coordinator = unstarted_coordinator(8);
        let admin = ResourceRef::role("admin", "default");

        coordinator.schedule_role(admin.clone(), "c1");
        coordinator.on_role_complete(&admin, "c1", true);

        assert_eq!(coordinator.pending_len(ResourceKind::Role), 0);
        assert!(coordinator.is_completed(&admin));
    }

    #[tokio::test]
    async fn worker_reconciles_scheduled_role() {
        let coordinator = Arc::new(unstarted_coordinator(8));
        let admin = ResourceRef::role("admin", "default");

        coordinator.schedule_role(admin.clone(), "c1");
        coordinator.start();

        // Poll until the worker has driven the role to completion
        for _ in 0..200 {
            if coordinator.is_completed(&admin) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(coordinator.is_completed(&admin));

        coordinator.stop().await;
    }

    #[tokio::test]
    async fn stop_is_graceful_and_schedules_after_stop_never_dispatch() {
        let coordinator = Arc::new(unstarted_coordinator(8));
        coordinator.start();
        coordinator.stop().await;

        let late = ResourceRef::role("late", "default");
        coordinator.schedule_role(late.clone(), "c1");

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!coordinator.is_completed(&late));
    }

    #[tokio::test]
    async fn start_twice_is_a_noop() {
        let coordinator = Arc::new(unstarted_coordinator(8));
        coordinator.start();
        coordinator.start();
        coordinator.stop().await;
    }
}
