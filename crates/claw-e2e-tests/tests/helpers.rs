//! Test helpers for E2E tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Once};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use claw_preemption::{
    PreemptionConfig, PreemptionScheduler, QueueConfig, QueueConfigDocument, ResourceVector,
    SimulatedCluster, TickOutcome, Workload, WorkloadId, WorkloadSpec, WorkloadState,
};
use tracing_subscriber::EnvFilter;

/// Install a test subscriber once per binary. Set `RUST_LOG` to see output.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Wall-clock instant `secs` after a fixed origin.
pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0)
        .single()
        .unwrap_or_default()
}

/// Memory-only resource vector.
pub fn mem(units: u64) -> ResourceVector {
    ResourceVector::new().with_memory(units)
}

/// Two sibling sandboxes under `root`, each with the same memory guarantee
/// and a one second preemption delay.
pub fn sandboxes(guarantee: &str, sandbox2_policy: &str) -> QueueConfigDocument {
    QueueConfigDocument::new(
        QueueConfig::new("root")
            .with_child(
                QueueConfig::new("sandbox1")
                    .with_guaranteed("memory", guarantee)
                    .with_preemption_delay("1s"),
            )
            .with_child(
                QueueConfig::new("sandbox2")
                    .with_guaranteed("memory", guarantee)
                    .with_preemption_delay("1s")
                    .with_preemption_policy(sandbox2_policy),
            ),
    )
}

/// A scheduler wired to a simulated partition, driven one second at a time.
pub struct TestCluster {
    pub cluster: Arc<SimulatedCluster>,
    pub scheduler: PreemptionScheduler<Arc<SimulatedCluster>>,
    elapsed: i64,
    finished: BTreeMap<WorkloadId, Workload>,
}

impl TestCluster {
    /// Start a cluster with default engine settings.
    pub fn start(document: &QueueConfigDocument, capacity: ResourceVector, termination_delay: Duration) -> Self {
        Self::with_config(document, capacity, termination_delay, PreemptionConfig::default())
    }

    /// Start a cluster with custom engine settings.
    pub fn with_config(
        document: &QueueConfigDocument,
        capacity: ResourceVector,
        termination_delay: Duration,
        config: PreemptionConfig,
    ) -> Self {
        init_tracing();
        let cluster = Arc::new(SimulatedCluster::new(capacity.clone(), termination_delay));
        let scheduler = PreemptionScheduler::new(config, Arc::clone(&cluster));
        let applied = scheduler.apply_queue_config(document);
        assert!(applied.is_ok(), "queue config rejected: {applied:?}");
        scheduler.set_capacity(capacity);
        Self {
            cluster,
            scheduler,
            elapsed: 0,
            finished: BTreeMap::new(),
        }
    }

    /// Current simulated time.
    pub fn now(&self) -> DateTime<Utc> {
        at(self.elapsed)
    }

    /// Seconds since the cluster started.
    pub const fn elapsed(&self) -> i64 {
        self.elapsed
    }

    /// Submit a workload at the current time.
    pub fn submit(&self, id: &str, queue: &str, resources: ResourceVector) {
        let result = self
            .scheduler
            .submit(WorkloadSpec::new(queue, resources).with_id(id), self.now());
        assert!(result.is_ok(), "submit {id} failed: {result:?}");
    }

    /// Submit a workload that completes `secs` after it is placed.
    pub fn submit_for(&self, id: &str, queue: &str, resources: ResourceVector, secs: u64) {
        self.cluster
            .set_lifetime(&WorkloadId::new(id), Duration::from_secs(secs));
        self.submit(id, queue, resources);
    }

    /// Report completions and tick without moving the clock.
    pub fn tick(&mut self) -> TickOutcome {
        let now = self.now();
        for workload in self.cluster.report_to(&self.scheduler, now) {
            self.finished.insert(workload.id.clone(), workload);
        }
        self.scheduler.tick(now)
    }

    /// Move the clock one second, then report and tick.
    pub fn step(&mut self) -> TickOutcome {
        self.elapsed += 1;
        self.tick()
    }

    /// Step `secs` times and return every outcome.
    pub fn run_for(&mut self, secs: i64) -> Vec<TickOutcome> {
        (0..secs).map(|_| self.step()).collect()
    }

    /// Step until `predicate` holds or `limit` seconds pass. Returns the
    /// elapsed time at which it held.
    pub fn run_until(&mut self, limit: i64, mut predicate: impl FnMut(&Self) -> bool) -> Option<i64> {
        for _ in 0..limit {
            if predicate(self) {
                return Some(self.elapsed);
            }
            self.step();
        }
        predicate(self).then_some(self.elapsed)
    }

    /// Last known state of a workload, tracked or finished.
    pub fn state(&self, id: &str) -> Option<WorkloadState> {
        let id = WorkloadId::new(id);
        self.scheduler
            .workload(&id)
            .map(|w| w.state)
            .or_else(|| self.finished.get(&id).map(|w| w.state))
    }

    /// Whether a finished workload was evicted.
    pub fn was_preempted(&self, id: &str) -> bool {
        self.finished
            .get(&WorkloadId::new(id))
            .is_some_and(|w| w.preempted)
    }

    /// Number of workloads in `queue` currently in `state`.
    pub fn count_in(&self, queue: &str, state: WorkloadState) -> usize {
        self.scheduler
            .workloads()
            .iter()
            .filter(|w| w.queue == queue && w.state == state)
            .count()
    }

    /// Total evictions sent so far.
    pub fn evictions(&self) -> u64 {
        self.scheduler.stats().evictions
    }
}
