//! Hierarchical queue preemption for Clawbernetes.
//!
//! `claw-preemption` decides which running workloads to evict so that a
//! starved queue can reach its guaranteed share of a partition. Queues form
//! a tree; every queue may carry a guarantee, a preemption delay and a
//! fence policy, and resource usage is tracked at every level.
//!
//! # Features
//!
//! - **Queue Tree**: Dotted paths under `root`, usage accounted up the tree
//! - **Guarantees**: Multi-resource minimum shares per queue
//! - **Fences**: `fence` queues neither preempt out of nor get preempted from outside their subtree
//! - **Preemption Delay**: A request must wait before it may evict anything
//! - **Victim Selection**: Youngest workloads first, never pushing a queue below its guarantee
//! - **Reconfiguration**: Atomic config swaps with draining of removed queues
//! - **Simulation**: A deterministic cluster for scripted scenarios
//!
//! # Queue Properties
//!
//! | Property | Values | Default |
//! |----------|--------|---------|
//! | `preemption.policy` | `normal`, `fence`, `disabled` | `normal` |
//! | `preemption.delay` | humantime duration, e.g. `30s` | `30s` |
//!
//! # Example
//!
//! ```rust
//! use chrono::{Duration as ChronoDuration, Utc};
//! use claw_preemption::{
//!     NoOpEvictionHandler, PreemptionScheduler, QueueConfig, QueueConfigDocument,
//!     ResourceVector, WorkloadSpec,
//! };
//!
//! let document = QueueConfigDocument::new(
//!     QueueConfig::new("root")
//!         .with_child(
//!             QueueConfig::new("batch")
//!                 .with_guaranteed("memory", "1G")
//!                 .with_preemption_delay("5s"),
//!         )
//!         .with_child(QueueConfig::new("adhoc")),
//! );
//!
//! let scheduler = PreemptionScheduler::with_defaults(NoOpEvictionHandler::new());
//! scheduler.apply_queue_config(&document).unwrap();
//! scheduler.set_capacity(ResourceVector::new().with_memory(2_000_000_000));
//!
//! // adhoc takes the whole partition
//! let start = Utc::now();
//! scheduler
//!     .submit(WorkloadSpec::new("root.adhoc", ResourceVector::new().with_memory(1_000_000_000)).with_id("a1"), start)
//!     .unwrap();
//! scheduler
//!     .submit(WorkloadSpec::new("root.adhoc", ResourceVector::new().with_memory(1_000_000_000)).with_id("a2"), start)
//!     .unwrap();
//! assert_eq!(scheduler.tick(start).placed.len(), 2);
//!
//! // batch is below its guarantee and may evict once the delay has passed
//! scheduler
//!     .submit(WorkloadSpec::new("root.batch", ResourceVector::new().with_memory(1_000_000_000)), start)
//!     .unwrap();
//! let outcome = scheduler.tick(start + ChronoDuration::seconds(5));
//! assert_eq!(outcome.evicted.len(), 1);
//! ```
//!
//! # Queue Configuration
//!
//! Queue trees are usually loaded from JSON:
//!
//! ```rust
//! use claw_preemption::{QueueConfigDocument, QueueTree};
//!
//! let document = QueueConfigDocument::from_json(r#"{
//!     "queues": [{
//!         "name": "root",
//!         "queues": [
//!             {
//!                 "name": "tenant-a",
//!                 "resources": {"guaranteed": {"memory": "8G", "vcore": "4"}},
//!                 "properties": {"preemption.policy": "fence"}
//!             }
//!         ]
//!     }]
//! }"#).unwrap();
//!
//! let tree = QueueTree::from_config(&document).unwrap();
//! assert!(tree.get("root.tenant-a").is_some_and(|q| q.policy.is_fence()));
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │      Scheduler task (runner)            │
//! │  ┌─────────────────────────────────────┐│
//! │  │       PreemptionScheduler           ││
//! │  │  ┌───────────┐  ┌────────────────┐ ││
//! │  │  │  Queue    │  │    Victim      │ ││
//! │  │  │  Tree     │  │   Selector     │ ││
//! │  │  └───────────┘  └────────────────┘ ││
//! │  └─────────────────────────────────────┘│
//! │  ┌─────────────────────────────────────┐│
//! │  │        Eviction Handler             ││
//! │  │  (placed, evict)                    ││
//! │  └─────────────────────────────────────┘│
//! └─────────────────────────────────────────┘
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]

pub mod config;
pub mod error;
pub mod eviction;
pub mod queue;
pub mod resource;
pub mod runner;
pub mod scheduler;
pub mod selector;
pub mod sim;
pub mod tree;
pub mod types;

// Re-export main types
pub use config::{PreemptionConfig, QueueConfig, QueueConfigDocument, QueueResources, QueueSettings};
pub use error::{PreemptionError, Result};
pub use eviction::{ChannelEvictionHandler, ClusterIntent, EvictionHandler, NoOpEvictionHandler};
pub use queue::{PreemptionPolicy, QueueId, QueueNode, QueueStatus};
pub use resource::ResourceVector;
pub use runner::{SchedulerEvent, SchedulerHandle, SchedulerTaskConfig, start_scheduler_task};
pub use scheduler::{PreemptionScheduler, SchedulerStats, TickOutcome};
pub use selector::{PreemptionRequest, VictimSelector, VictimSet};
pub use sim::{Scenario, ScenarioWorkload, SimulatedCluster, SimulationReport, WorkloadReport};
pub use tree::QueueTree;
pub use types::{
    EvictionFailure, EvictionRecord, PendingRequest, RequestHandle, Workload, WorkloadId,
    WorkloadSpec, WorkloadState,
};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::config::{PreemptionConfig, QueueConfig, QueueConfigDocument};
    pub use crate::error::{PreemptionError, Result};
    pub use crate::eviction::{EvictionHandler, NoOpEvictionHandler};
    pub use crate::queue::{PreemptionPolicy, QueueStatus};
    pub use crate::resource::ResourceVector;
    pub use crate::runner::{SchedulerEvent, SchedulerHandle, start_scheduler_task};
    pub use crate::scheduler::{PreemptionScheduler, TickOutcome};
    pub use crate::selector::{PreemptionRequest, VictimSelector, VictimSet};
    pub use crate::tree::QueueTree;
    pub use crate::types::{EvictionRecord, Workload, WorkloadId, WorkloadSpec, WorkloadState};
}
