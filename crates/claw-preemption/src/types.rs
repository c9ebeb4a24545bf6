//! Core types for the preemption engine.
//!
//! This module provides the workload-side types used throughout claw-preemption:
//! - [`WorkloadId`]: Identifier of a workload
//! - [`WorkloadState`]: Lifecycle state of a workload
//! - [`WorkloadSpec`]: What a caller submits
//! - [`Workload`]: A tracked workload
//! - [`PendingRequest`]: A workload waiting for capacity
//! - [`EvictionRecord`]: History entry for one preemption decision

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::resource::ResourceVector;

/// Unique identifier for a workload.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkloadId(String);

impl WorkloadId {
    /// Creates a new workload ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a new random workload ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// State of a workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum WorkloadState {
    /// Workload is waiting for capacity.
    #[default]
    Pending,
    /// Workload is running.
    Running,
    /// Workload was asked to stop and still holds its resources.
    Terminating,
    /// Workload completed successfully.
    Succeeded,
    /// Workload failed or was evicted.
    Failed,
}

impl WorkloadState {
    /// Returns true if the workload is running and can be preempted.
    #[must_use]
    pub const fn is_preemptible(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Returns true if the workload is in a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Returns true if the workload counts towards queue usage.
    #[must_use]
    pub const fn holds_resources(&self) -> bool {
        matches!(self, Self::Running | Self::Terminating)
    }
}

impl fmt::Display for WorkloadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Terminating => "Terminating",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// A workload submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadSpec {
    /// Explicit id; a random one is generated when unset.
    pub id: Option<WorkloadId>,
    /// Full path of the leaf queue.
    pub queue: String,
    /// Resources the workload holds while running.
    pub resources: ResourceVector,
    /// Grace period for eviction; the engine default applies when unset.
    pub grace_period: Option<Duration>,
}

impl WorkloadSpec {
    /// Creates a spec for the given queue and resources.
    #[must_use]
    pub fn new(queue: impl Into<String>, resources: ResourceVector) -> Self {
        Self {
            id: None,
            queue: queue.into(),
            resources,
            grace_period: None,
        }
    }

    /// Sets an explicit workload id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(WorkloadId::new(id));
        self
    }

    /// Sets the eviction grace period.
    #[must_use]
    pub const fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = Some(grace_period);
        self
    }
}

/// A workload tracked by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workload {
    /// Workload identifier.
    pub id: WorkloadId,
    /// Leaf queue path.
    pub queue: String,
    /// Resources held while running.
    pub resources: ResourceVector,
    /// Current state.
    pub state: WorkloadState,
    /// When the workload was submitted.
    pub submitted_at: DateTime<Utc>,
    /// When the workload was placed.
    pub started_at: Option<DateTime<Utc>>,
    /// When the workload reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,
    /// Whether the workload was evicted to make room for another.
    pub preempted: bool,
    /// Grace period used on eviction.
    #[serde(with = "crate::config::duration_str")]
    pub grace_period: Duration,
}

impl Workload {
    /// Creates a pending workload.
    #[must_use]
    pub fn pending(
        id: WorkloadId,
        queue: impl Into<String>,
        resources: ResourceVector,
        grace_period: Duration,
        submitted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            queue: queue.into(),
            resources,
            state: WorkloadState::Pending,
            submitted_at,
            started_at: None,
            finished_at: None,
            preempted: false,
            grace_period,
        }
    }

    /// Returns how long the workload has been running at `now`.
    #[must_use]
    pub fn running_duration(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.started_at.map(|start| {
            now.signed_duration_since(start)
                .to_std()
                .unwrap_or(Duration::ZERO)
        })
    }
}

/// Receipt returned by a successful submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestHandle {
    /// Identifier of the submitted workload.
    pub workload_id: WorkloadId,
    /// Leaf queue path.
    pub queue: String,
    /// Submission time.
    pub submitted_at: DateTime<Utc>,
}

/// A workload waiting for capacity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRequest {
    /// The waiting workload.
    pub workload_id: WorkloadId,
    /// Leaf queue path.
    pub queue: String,
    /// Resources requested.
    pub resources: ResourceVector,
    /// Start of the current wait.
    pub waiting_since: DateTime<Utc>,
    /// Victims evicted for this request that have not terminated yet.
    pub awaiting: Vec<WorkloadId>,
    /// Capacity held back for this request while its victims terminate and
    /// until it is placed. Other requests cannot use it.
    #[serde(default)]
    pub reserved: ResourceVector,
    /// Larger than the partition capacity; can never be placed as is.
    pub unsatisfiable: bool,
}

impl PendingRequest {
    /// Creates a request that starts waiting at `waiting_since`.
    #[must_use]
    pub fn new(workload: &Workload, waiting_since: DateTime<Utc>) -> Self {
        Self {
            workload_id: workload.id.clone(),
            queue: workload.queue.clone(),
            resources: workload.resources.clone(),
            waiting_since,
            awaiting: Vec::new(),
            reserved: ResourceVector::new(),
            unsatisfiable: false,
        }
    }

    /// Returns the time spent waiting at `now`.
    #[must_use]
    pub fn waited(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.waiting_since)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

/// Record of one preemption decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvictionRecord {
    /// Workload the victims were evicted for.
    pub requested_by: WorkloadId,
    /// Queue of the requesting workload.
    pub queue: String,
    /// Workloads that were evicted.
    pub evicted_workloads: Vec<WorkloadId>,
    /// Total resources freed by eviction.
    pub freed_resources: ResourceVector,
    /// When the eviction was initiated.
    pub initiated_at: DateTime<Utc>,
    /// Any failures during eviction.
    pub failures: Vec<EvictionFailure>,
}

impl EvictionRecord {
    /// Creates an empty record.
    #[must_use]
    pub fn new(requested_by: WorkloadId, queue: impl Into<String>, initiated_at: DateTime<Utc>) -> Self {
        Self {
            requested_by,
            queue: queue.into(),
            evicted_workloads: Vec::new(),
            freed_resources: ResourceVector::new(),
            initiated_at,
            failures: Vec::new(),
        }
    }

    /// Adds an evicted workload.
    pub fn add_evicted(&mut self, workload_id: WorkloadId, resources: &ResourceVector) {
        self.evicted_workloads.push(workload_id);
        self.freed_resources = self.freed_resources.add(resources);
    }

    /// Adds a failure.
    pub fn add_failure(&mut self, failure: EvictionFailure) {
        self.failures.push(failure);
    }

    /// Returns true if all evictions were successful.
    #[must_use]
    pub fn is_successful(&self) -> bool {
        self.failures.is_empty()
    }

    /// Returns the number of evicted workloads.
    #[must_use]
    pub fn evicted_count(&self) -> usize {
        self.evicted_workloads.len()
    }
}

/// A failure during eviction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvictionFailure {
    /// Workload that failed to evict.
    pub workload_id: WorkloadId,
    /// Reason for the failure.
    pub reason: String,
    /// When the failure occurred.
    pub failed_at: DateTime<Utc>,
}

impl EvictionFailure {
    /// Creates a new eviction failure.
    #[must_use]
    pub fn new(workload_id: WorkloadId, reason: impl Into<String>, failed_at: DateTime<Utc>) -> Self {
        Self {
            workload_id,
            reason: reason.into(),
            failed_at,
        }
    }
}
