//! End-to-end tests for the dependency coordinator
//!
//! These run fully in-process against scripted reconcile operations and a
//! static dependency lookup; no Kubernetes cluster is involved. Timings are
//! shrunk far below production values to keep the suite fast, and every
//! assertion that waits on worker progress polls with a deadline instead of
//! sleeping a fixed amount.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use strata::coordinator::{
    CoordinatorConfig, DependencyCoordinator, DependencyLookup, KindOperations,
    ReconcileOperation, ReconcileOutcome, ResourceRef,
};
use strata::Error;

// =========================================================================
// Test doubles
// =========================================================================

/// Reconcile operation that records its invocations and can be scripted to
/// fail a fixed number of times before succeeding
struct ScriptedOp {
    calls: Mutex<Vec<ResourceRef>>,
    /// Remaining failures, per ref name
    failures: Mutex<HashMap<String, u32>>,
    /// Flipped on every successful reconcile, visible to other ops
    on_success: Option<Arc<AtomicBool>>,
}

impl ScriptedOp {
    fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            on_success: None,
        }
    }

    fn failing(name: &str, times: u32) -> Self {
        let op = Self::new();
        op.failures.lock().unwrap().insert(name.to_string(), times);
        op
    }

    fn with_success_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.on_success = Some(flag);
        self
    }

    fn call_count(&self, name: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.name == name)
            .count()
    }

    fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn call_order(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.name.clone())
            .collect()
    }
}

#[async_trait]
impl ReconcileOperation for ScriptedOp {
    async fn reconcile(&self, item: &ResourceRef) -> Result<ReconcileOutcome, Error> {
        self.calls.lock().unwrap().push(item.clone());

        let mut failures = self.failures.lock().unwrap();
        if let Some(remaining) = failures.get_mut(&item.name) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(Error::database_op(format!(
                    "scripted failure for '{}'",
                    item.name
                )));
            }
        }
        drop(failures);

        if let Some(flag) = &self.on_success {
            flag.store(true, Ordering::SeqCst);
        }
        Ok(ReconcileOutcome::done())
    }
}

/// Lookup answering from a fixed ref-to-dependencies table
struct StaticLookup {
    deps: HashMap<ResourceRef, Vec<ResourceRef>>,
}

impl StaticLookup {
    fn empty() -> Self {
        Self {
            deps: HashMap::new(),
        }
    }

    fn with(mut self, item: ResourceRef, deps: Vec<ResourceRef>) -> Self {
        self.deps.insert(item, deps);
        self
    }
}

#[async_trait]
impl DependencyLookup for StaticLookup {
    async fn dependencies(&self, item: &ResourceRef) -> Result<Vec<ResourceRef>, Error> {
        Ok(self.deps.get(item).cloned().unwrap_or_default())
    }
}

/// Lookup that fails a fixed number of times before delegating to a table
struct FlakyLookup {
    inner: StaticLookup,
    failures: AtomicU32,
    calls: AtomicU32,
}

#[async_trait]
impl DependencyLookup for FlakyLookup {
    async fn dependencies(&self, item: &ResourceRef) -> Result<Vec<ResourceRef>, Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Error::database_op("lookup backend unavailable"));
        }
        self.inner.dependencies(item).await
    }
}

// =========================================================================
// Helpers
// =========================================================================

/// Timings shrunk for tests: retries fire within tens of milliseconds
fn fast_config() -> CoordinatorConfig {
    CoordinatorConfig {
        queue_capacity: 32,
        dependency_retry_delay: Duration::from_millis(25),
        reconcile_retry_delay: Duration::from_millis(25),
        completion_retention: Duration::from_secs(3600),
        sweep_interval: Duration::from_secs(3600),
    }
}

/// Poll until the condition holds or a 5s deadline passes
async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within deadline");
}

fn role(name: &str) -> ResourceRef {
    ResourceRef::role(name, "default")
}

fn grant(name: &str) -> ResourceRef {
    ResourceRef::grant(name, "default")
}

fn user(name: &str) -> ResourceRef {
    ResourceRef::user(name, "default")
}

// =========================================================================
// Scenarios
// =========================================================================

#[tokio::test]
async fn role_without_dependencies_completes() {
    let op = Arc::new(ScriptedOp::new());
    let coordinator = Arc::new(DependencyCoordinator::new(
        fast_config(),
        KindOperations::uniform(op.clone()),
        Arc::new(StaticLookup::empty()),
    ));
    coordinator.start();

    coordinator.schedule_role(role("admin"), "c1");

    wait_until(|| coordinator.is_completed(&role("admin"))).await;
    assert_eq!(op.call_count("admin"), 1);

    coordinator.stop().await;
}

#[tokio::test]
async fn grant_waits_for_its_role() {
    // The role op flips this flag on success; the grant op asserts it was
    // already set, proving the role converged strictly first.
    let role_done = Arc::new(AtomicBool::new(false));

    let role_op = Arc::new(ScriptedOp::new().with_success_flag(role_done.clone()));
    let grant_op = Arc::new(ScriptedOp::new());

    struct OrderCheckingGrantOp {
        inner: Arc<ScriptedOp>,
        role_done: Arc<AtomicBool>,
    }

    #[async_trait]
    impl ReconcileOperation for OrderCheckingGrantOp {
        async fn reconcile(&self, item: &ResourceRef) -> Result<ReconcileOutcome, Error> {
            assert!(
                self.role_done.load(Ordering::SeqCst),
                "grant reconciled before its role completed"
            );
            self.inner.reconcile(item).await
        }
    }

    let operations = KindOperations {
        role: role_op.clone(),
        grant: Arc::new(OrderCheckingGrantOp {
            inner: grant_op.clone(),
            role_done: role_done.clone(),
        }),
        user: Arc::new(ScriptedOp::new()),
    };

    let lookup = StaticLookup::empty().with(grant("g1"), vec![role("admin")]);
    let coordinator = Arc::new(DependencyCoordinator::new(
        fast_config(),
        operations,
        Arc::new(lookup),
    ));
    coordinator.start();

    // Schedule the grant first so it must sit blocked on the missing role
    coordinator.schedule_grant(grant("g1"), "c1");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!coordinator.is_completed(&grant("g1")));

    coordinator.schedule_role(role("admin"), "c1");

    wait_until(|| coordinator.is_completed(&grant("g1"))).await;
    // A retry timer racing the drain-triggered dispatch can reconcile the
    // grant more than once; that is benign, order is what matters.
    assert!(grant_op.call_count("g1") >= 1);

    coordinator.stop().await;
}

#[tokio::test]
async fn user_waits_for_roles_and_grants() {
    let op = Arc::new(ScriptedOp::new());
    let lookup = StaticLookup::empty()
        .with(grant("g1"), vec![role("admin")])
        .with(user("u1"), vec![role("admin"), grant("g1")]);

    let coordinator = Arc::new(DependencyCoordinator::new(
        fast_config(),
        KindOperations::uniform(op.clone()),
        Arc::new(lookup),
    ));
    coordinator.start();

    // Schedule in reverse dependency order to force the coordinator to sort
    // it out itself.
    coordinator.schedule_user(user("u1"), "c1");
    coordinator.schedule_grant(grant("g1"), "c1");
    coordinator.schedule_role(role("admin"), "c1");

    wait_until(|| coordinator.is_completed(&user("u1"))).await;

    let order = op.call_order();
    let pos = |name: &str| order.iter().position(|n| n == name).unwrap();
    assert!(pos("admin") < pos("g1"), "role must converge before grant");
    assert!(pos("g1") < pos("u1"), "grant must converge before user");

    coordinator.stop().await;
}

#[tokio::test]
async fn failed_reconcile_retries_until_success() {
    // Fails three times, succeeds on the fourth attempt
    let op = Arc::new(ScriptedOp::failing("g2", 3));
    let lookup = StaticLookup::empty().with(grant("g2"), vec![role("admin")]);

    let coordinator = Arc::new(DependencyCoordinator::new(
        fast_config(),
        KindOperations::uniform(op.clone()),
        Arc::new(lookup),
    ));
    coordinator.start();

    coordinator.schedule_role(role("admin"), "c1");
    coordinator.schedule_grant(grant("g2"), "c1");

    wait_until(|| coordinator.is_completed(&grant("g2"))).await;
    assert!(
        op.call_count("g2") >= 4,
        "three scripted failures plus the final success"
    );

    coordinator.stop().await;
}

#[tokio::test]
async fn double_schedule_reconciles_once() {
    let op = Arc::new(ScriptedOp::new());
    let coordinator = Arc::new(DependencyCoordinator::new(
        fast_config(),
        KindOperations::uniform(op.clone()),
        Arc::new(StaticLookup::empty()),
    ));

    // Both schedules land before the workers start, so the second must
    // no-op against the pending entry of the first.
    coordinator.schedule_role(role("admin"), "c1");
    coordinator.schedule_role(role("admin"), "c1");
    coordinator.start();

    wait_until(|| coordinator.is_completed(&role("admin"))).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(op.call_count("admin"), 1);

    coordinator.stop().await;
}

#[tokio::test]
async fn saturated_queue_drops_newest_without_failing_caller() {
    let op = Arc::new(ScriptedOp::new());
    let config = CoordinatorConfig {
        queue_capacity: 3,
        ..fast_config()
    };
    let coordinator = Arc::new(DependencyCoordinator::new(
        config,
        KindOperations::uniform(op.clone()),
        Arc::new(StaticLookup::empty()),
    ));

    // Workers not started: the queue fills at capacity 3 and the overflow
    // is dropped. None of these calls errors.
    for i in 0..5 {
        coordinator.schedule_role(role(&format!("r{i}")), "c1");
    }

    coordinator.start();

    wait_until(|| op.total_calls() >= 3).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Only the first three survived, in FIFO order
    assert_eq!(op.call_order(), vec!["r0", "r1", "r2"]);

    coordinator.stop().await;
}

#[tokio::test]
async fn lookup_failure_delays_but_does_not_drop_the_item() {
    let op = Arc::new(ScriptedOp::new());
    let lookup = FlakyLookup {
        inner: StaticLookup::empty().with(grant("g1"), vec![]),
        failures: AtomicU32::new(2),
        calls: AtomicU32::new(0),
    };

    let coordinator = Arc::new(DependencyCoordinator::new(
        fast_config(),
        KindOperations::uniform(op.clone()),
        Arc::new(lookup),
    ));
    coordinator.start();

    coordinator.schedule_grant(grant("g1"), "c1");

    // Two failed lookups each cost one retry delay before the item gets
    // through and reconciles.
    wait_until(|| coordinator.is_completed(&grant("g1"))).await;
    assert_eq!(op.call_count("g1"), 1);

    coordinator.stop().await;
}

#[tokio::test]
async fn expired_completion_blocks_dependents_until_recompletion() {
    let op = Arc::new(ScriptedOp::new());
    let lookup = StaticLookup::empty().with(grant("g1"), vec![role("admin")]);

    // Completion records expire almost immediately and the sweep runs often
    let config = CoordinatorConfig {
        completion_retention: Duration::from_millis(20),
        sweep_interval: Duration::from_millis(20),
        ..fast_config()
    };
    let coordinator = Arc::new(DependencyCoordinator::new(
        config,
        KindOperations::uniform(op.clone()),
        Arc::new(lookup),
    ));
    coordinator.start();

    coordinator.schedule_role(role("admin"), "c1");
    wait_until(|| coordinator.is_completed(&role("admin"))).await;

    // The sweep purges the role's completion record
    wait_until(|| !coordinator.is_completed(&role("admin"))).await;

    // A grant scheduled now re-resolves at dispatch time, sees the expired
    // upstream, and blocks.
    coordinator.schedule_grant(grant("g1"), "c1");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!coordinator.is_completed(&grant("g1")));

    // The controllers' periodic resync would reschedule the role; once it
    // recompletes the grant unblocks on its next retry.
    coordinator.schedule_role(role("admin"), "c1");
    wait_until(|| coordinator.is_completed(&grant("g1"))).await;

    coordinator.stop().await;
}
