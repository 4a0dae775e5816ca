//! Per-kind bookkeeping: pending sets and the completion tracker
//!
//! Each kind owns one [`KindState`], guarded by a single mutex in the
//! coordinator. Pending refs are grouped by owning cluster so the coordinator
//! can answer "is every role for cluster X done" without scanning unrelated
//! clusters. Completion records are timestamped and purged by a periodic
//! sweep; purging only bounds memory, it never resurrects pending-ness,
//! because dependents always re-resolve dependencies at dispatch time.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use super::types::ResourceRef;

/// Mutable bookkeeping for one resource kind
#[derive(Debug, Default)]
pub(crate) struct KindState {
    /// Refs not yet confirmed complete, keyed by owning cluster
    pending: HashMap<String, HashSet<ResourceRef>>,
    /// Successfully processed refs and when they completed
    completed: HashMap<ResourceRef, Instant>,
}

impl KindState {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Idempotent insert into the pending set.
    ///
    /// Returns true if the ref was newly inserted, false if it was already
    /// pending (re-scheduling an already-pending ref is a no-op).
    pub(crate) fn insert_pending(&mut self, cluster: &str, reference: ResourceRef) -> bool {
        self.pending
            .entry(cluster.to_string())
            .or_default()
            .insert(reference)
    }

    /// Remove a ref from the pending set without recording completion.
    ///
    /// Used to roll back a schedule whose enqueue was dropped on a full
    /// queue: leaving the ref pending would block downstream kinds until a
    /// resync that would otherwise no-op on the still-pending entry.
    pub(crate) fn remove_pending(&mut self, cluster: &str, reference: &ResourceRef) -> bool {
        match self.pending.get_mut(cluster) {
            Some(set) => {
                let removed = set.remove(reference);
                if set.is_empty() {
                    self.pending.remove(cluster);
                }
                removed
            }
            None => false,
        }
    }

    /// Record a successful completion, moving the ref from pending to completed.
    ///
    /// Returns true if the ref was pending and its removal left the cluster's
    /// pending set empty - the signal to trigger the downstream kind.
    pub(crate) fn complete(&mut self, cluster: &str, reference: &ResourceRef) -> bool {
        let removed = self.remove_pending(cluster, reference);
        self.completed.insert(reference.clone(), Instant::now());
        removed && !self.has_pending(cluster)
    }

    /// Returns true if this specific ref has a completion record
    pub(crate) fn is_completed(&self, reference: &ResourceRef) -> bool {
        self.completed.contains_key(reference)
    }

    /// Returns true if any ref is pending for the given cluster
    pub(crate) fn has_pending(&self, cluster: &str) -> bool {
        self.pending.get(cluster).is_some_and(|s| !s.is_empty())
    }

    /// All refs currently pending for the given cluster
    pub(crate) fn pending_for_cluster(&self, cluster: &str) -> Vec<ResourceRef> {
        self.pending
            .get(cluster)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove completion records older than the retention window.
    ///
    /// Returns the number of purged records.
    pub(crate) fn purge_completed_older_than(&mut self, retention: Duration) -> usize {
        let before = self.completed.len();
        let now = Instant::now();
        self.completed
            .retain(|_, completed_at| now.duration_since(*completed_at) < retention);
        before - self.completed.len()
    }

    /// Total number of pending refs across all clusters
    pub(crate) fn pending_len(&self) -> usize {
        self.pending.values().map(HashSet::len).sum()
    }

    /// Number of completion records
    pub(crate) fn completed_len(&self) -> usize {
        self.completed.len()
    }
}
