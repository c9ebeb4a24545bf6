//! The seam between the engine and whatever actually runs workloads.
//!
//! The scheduler never starts or stops anything itself. It tells an
//! [`EvictionHandler`] that a workload was placed or must be evicted, and
//! learns about terminations later through
//! [`PreemptionScheduler::workload_finished`](crate::scheduler::PreemptionScheduler::workload_finished).

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

use crate::error::{PreemptionError, Result};
use crate::resource::ResourceVector;
use crate::types::{Workload, WorkloadId};

/// Handler for placing and evicting workloads.
///
/// Implement this trait to integrate with your workload runtime. Both calls
/// must return promptly; they run while the scheduler holds its lock.
pub trait EvictionHandler: Send + Sync {
    /// Notifies the runtime that a workload was admitted and may start.
    ///
    /// # Errors
    ///
    /// Returns error if the runtime refuses the workload. The scheduler then
    /// keeps it pending.
    fn placed(&self, workload: &Workload) -> Result<()>;

    /// Sends a graceful shutdown signal to the workload.
    ///
    /// # Errors
    ///
    /// Returns error if the eviction signal cannot be sent.
    fn evict(&self, workload_id: &WorkloadId, grace_period: Duration) -> Result<()>;
}

impl<H: EvictionHandler + ?Sized> EvictionHandler for Arc<H> {
    fn placed(&self, workload: &Workload) -> Result<()> {
        (**self).placed(workload)
    }

    fn evict(&self, workload_id: &WorkloadId, grace_period: Duration) -> Result<()> {
        (**self).evict(workload_id, grace_period)
    }
}

/// A no-op eviction handler for testing.
///
/// Records every call and can be told to fail evictions for chosen
/// workloads.
#[derive(Debug, Default)]
pub struct NoOpEvictionHandler {
    placements: RwLock<Vec<WorkloadId>>,
    evictions: RwLock<Vec<(WorkloadId, Duration)>>,
    failing: RwLock<HashSet<WorkloadId>>,
}

impl NoOpEvictionHandler {
    /// Creates a new no-op handler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every eviction of `workload_id` fail until cleared.
    pub fn fail_evictions_for(&self, workload_id: &WorkloadId) {
        self.failing.write().insert(workload_id.clone());
    }

    /// Stops injecting failures.
    pub fn clear_failures(&self) {
        self.failing.write().clear();
    }

    /// Returns the workloads placed so far, in order.
    #[must_use]
    pub fn placements(&self) -> Vec<WorkloadId> {
        self.placements.read().clone()
    }

    /// Returns the evictions sent so far with their grace periods.
    #[must_use]
    pub fn evictions(&self) -> Vec<(WorkloadId, Duration)> {
        self.evictions.read().clone()
    }

    /// Returns the ids of evicted workloads, in order.
    #[must_use]
    pub fn evicted_ids(&self) -> Vec<WorkloadId> {
        self.evictions.read().iter().map(|(id, _)| id.clone()).collect()
    }
}

impl EvictionHandler for NoOpEvictionHandler {
    fn placed(&self, workload: &Workload) -> Result<()> {
        debug!(workload_id = %workload.id, queue = %workload.queue, "NoOp placement recorded");
        self.placements.write().push(workload.id.clone());
        Ok(())
    }

    fn evict(&self, workload_id: &WorkloadId, grace_period: Duration) -> Result<()> {
        if self.failing.read().contains(workload_id) {
            return Err(PreemptionError::EvictionFailed {
                reason: format!("injected failure for {workload_id}"),
            });
        }
        debug!(workload_id = %workload_id, "NoOp eviction signal sent");
        self.evictions.write().push((workload_id.clone(), grace_period));
        Ok(())
    }
}

/// Instruction emitted towards the orchestration layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterIntent {
    /// Start the workload.
    Place {
        /// Workload to start.
        workload_id: WorkloadId,
        /// Leaf queue it was admitted to.
        queue: String,
        /// Resources it was granted.
        resources: ResourceVector,
    },
    /// Stop the workload gracefully.
    Evict {
        /// Workload to stop.
        workload_id: WorkloadId,
        /// Time allowed for a clean shutdown.
        grace_period: Duration,
    },
}

/// Eviction handler that forwards intents over a bounded channel.
///
/// Sending never waits. A full channel is reported as an error so the
/// scheduler retries on a later tick.
#[derive(Debug, Clone)]
pub struct ChannelEvictionHandler {
    tx: mpsc::Sender<ClusterIntent>,
}

impl ChannelEvictionHandler {
    /// Wraps an existing sender.
    #[must_use]
    pub const fn new(tx: mpsc::Sender<ClusterIntent>) -> Self {
        Self { tx }
    }

    /// Creates a handler together with the receiving end of its channel.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ClusterIntent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    fn send(&self, intent: ClusterIntent) -> Result<()> {
        self.tx.try_send(intent).map_err(|e| {
            let reason = match e {
                TrySendError::Full(_) => "intent channel is full",
                TrySendError::Closed(_) => "intent channel is closed",
            };
            PreemptionError::EvictionFailed {
                reason: reason.into(),
            }
        })
    }
}

impl EvictionHandler for ChannelEvictionHandler {
    fn placed(&self, workload: &Workload) -> Result<()> {
        self.send(ClusterIntent::Place {
            workload_id: workload.id.clone(),
            queue: workload.queue.clone(),
            resources: workload.resources.clone(),
        })
    }

    fn evict(&self, workload_id: &WorkloadId, grace_period: Duration) -> Result<()> {
        self.send(ClusterIntent::Evict {
            workload_id: workload_id.clone(),
            grace_period,
        })
    }
}
