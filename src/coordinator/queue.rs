//! Bounded dispatch queues feeding the kind workers
//!
//! One queue exists per kind. Overflow policy is drop-newest with a logged
//! warning: `schedule_*` must never block its caller (it runs inside the
//! controllers' reconcile loops), and every live object is rescheduled by
//! the controllers' periodic resync, which recovers dropped items.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use super::types::{ResourceKind, WorkItem};

/// Outcome of a non-blocking enqueue attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum EnqueueResult {
    /// Item accepted onto the queue
    Enqueued,
    /// Queue full; item dropped (recovered by the callers' periodic resync)
    Saturated,
    /// Worker side has shut down; nothing will be dispatched anymore
    Closed,
}

/// Bounded FIFO awaiting one kind worker
pub(crate) struct DispatchQueue {
    kind: ResourceKind,
    tx: mpsc::Sender<WorkItem>,
}

impl DispatchQueue {
    /// Create a queue with the given capacity, returning the worker's receiver
    pub(crate) fn new(kind: ResourceKind, capacity: usize) -> (Self, mpsc::Receiver<WorkItem>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { kind, tx }, rx)
    }

    /// Attempt to enqueue without blocking.
    ///
    /// A saturated queue drops the item with a warning; no error reaches the
    /// caller. Existing queued order is never disturbed.
    pub(crate) fn push(&self, item: WorkItem) -> EnqueueResult {
        match self.tx.try_send(item) {
            Ok(()) => EnqueueResult::Enqueued,
            Err(TrySendError::Full(item)) => {
                warn!(
                    kind = %self.kind,
                    reference = %item.reference,
                    cluster = %item.cluster,
                    "Dispatch queue saturated, dropping item; periodic resync will reschedule"
                );
                EnqueueResult::Saturated
            }
            Err(TrySendError::Closed(item)) => {
                debug!(
                    kind = %self.kind,
                    reference = %item.reference,
                    "Dispatch queue closed, item will not be dispatched"
                );
                EnqueueResult::Closed
            }
        }
    }

    /// A sender handle for delayed re-submissions from detached timer tasks
    pub(crate) fn sender(&self) -> mpsc::Sender<WorkItem> {
        self.tx.clone()
    }
}
