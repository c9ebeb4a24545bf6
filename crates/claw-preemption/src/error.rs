//! Error types for the preemption engine.

use thiserror::Error;

/// Result type for preemption operations.
pub type Result<T> = std::result::Result<T, PreemptionError>;

/// Errors that can occur in the preemption engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PreemptionError {
    /// The queue configuration document was rejected.
    #[error("invalid queue configuration: {reason}")]
    InvalidConfig {
        /// Description of why the configuration is invalid.
        reason: String,
    },

    /// Queue path does not exist in the tree.
    #[error("queue not found: {path}")]
    QueueNotFound {
        /// Full dotted path that was looked up.
        path: String,
    },

    /// A resource quantity string could not be parsed.
    #[error("invalid quantity {value:?} for resource {resource}: {reason}")]
    InvalidQuantity {
        /// Resource name the quantity was given for.
        resource: String,
        /// The raw quantity string.
        value: String,
        /// Description of the parse failure.
        reason: String,
    },

    /// A duration string could not be parsed.
    #[error("invalid duration {value:?}: {reason}")]
    InvalidDuration {
        /// The raw duration string.
        value: String,
        /// Description of the parse failure.
        reason: String,
    },

    /// Workloads can only be submitted to leaf queues.
    #[error("queue {path} is not a leaf queue")]
    NotALeafQueue {
        /// Path of the parent queue.
        path: String,
    },

    /// The queue was removed from the configuration and only drains.
    #[error("queue {path} is draining and accepts no new workloads")]
    QueueDraining {
        /// Path of the draining queue.
        path: String,
    },

    /// Workload not found.
    #[error("workload not found: {workload_id}")]
    WorkloadNotFound {
        /// ID of the workload that was not found.
        workload_id: String,
    },

    /// A workload with this id is already tracked.
    #[error("workload already exists: {workload_id}")]
    DuplicateWorkload {
        /// ID of the duplicate workload.
        workload_id: String,
    },

    /// Eviction failed.
    #[error("eviction failed: {reason}")]
    EvictionFailed {
        /// Description of why the eviction failed.
        reason: String,
    },

    /// The runtime refused to start a workload.
    #[error("placement rejected for {workload_id}: {reason}")]
    PlacementRejected {
        /// ID of the workload that was not placed.
        workload_id: String,
        /// Description of why the placement was refused.
        reason: String,
    },

    /// A workload state transition that cannot happen.
    #[error("invalid state transition for {workload_id}: {reason}")]
    InvalidState {
        /// ID of the workload.
        workload_id: String,
        /// Description of the rejected transition.
        reason: String,
    },

    /// Invalid resource specification.
    #[error("invalid resource specification: {reason}")]
    InvalidResource {
        /// Description of why the resource specification is invalid.
        reason: String,
    },
}
