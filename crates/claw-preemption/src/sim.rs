//! In-memory cluster used to exercise the scheduler end to end.
//!
//! [`SimulatedCluster`] plays the orchestration side: it accepts
//! placements, runs each workload for its configured lifetime, and takes
//! `termination_delay` (bounded by the grace period) to stop an evicted
//! workload. Completions are reported back through
//! [`SimulatedCluster::report_to`].
//!
//! [`Scenario`] is the serializable description used by `clawq simulate`.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{PreemptionConfig, QueueConfigDocument, duration_str};
use crate::error::{PreemptionError, Result};
use crate::eviction::EvictionHandler;
use crate::queue::QueueStatus;
use crate::resource::ResourceVector;
use crate::scheduler::{PreemptionScheduler, SchedulerStats};
use crate::types::{EvictionRecord, Workload, WorkloadId, WorkloadSpec, WorkloadState};

fn offset(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_default()
}

#[derive(Debug, Default)]
struct ClusterState {
    clock: DateTime<Utc>,
    in_use: ResourceVector,
    lifetimes: HashMap<WorkloadId, Duration>,
    running: BTreeMap<WorkloadId, (ResourceVector, Option<DateTime<Utc>>)>,
    terminating: BTreeMap<WorkloadId, DateTime<Utc>>,
}

/// A single-partition cluster simulated in memory.
#[derive(Debug)]
pub struct SimulatedCluster {
    capacity: ResourceVector,
    termination_delay: Duration,
    state: Mutex<ClusterState>,
}

impl SimulatedCluster {
    /// Creates a cluster with the given capacity and termination delay.
    #[must_use]
    pub fn new(capacity: ResourceVector, termination_delay: Duration) -> Self {
        Self {
            capacity,
            termination_delay,
            state: Mutex::new(ClusterState::default()),
        }
    }

    /// Returns the cluster capacity.
    #[must_use]
    pub const fn capacity(&self) -> &ResourceVector {
        &self.capacity
    }

    /// Sets how long a workload runs once placed. Workloads without a
    /// lifetime run until evicted.
    pub fn set_lifetime(&self, workload_id: &WorkloadId, lifetime: Duration) {
        self.state.lock().lifetimes.insert(workload_id.clone(), lifetime);
    }

    /// Returns the resources currently held on the cluster.
    #[must_use]
    pub fn in_use(&self) -> ResourceVector {
        self.state.lock().in_use.clone()
    }

    /// Returns the ids of workloads currently running or terminating.
    #[must_use]
    pub fn active(&self) -> Vec<WorkloadId> {
        self.state.lock().running.keys().cloned().collect()
    }

    /// Moves the clock to `now` and returns the workloads that stopped,
    /// with their final state, in completion order.
    pub fn advance(&self, now: DateTime<Utc>) -> Vec<(WorkloadId, WorkloadState)> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.clock = now;

        let mut done: Vec<(DateTime<Utc>, WorkloadId, WorkloadState)> = Vec::new();
        for (id, (_, deadline)) in &state.running {
            if let Some(deadline) = deadline.filter(|d| *d <= now) {
                done.push((deadline, id.clone(), WorkloadState::Succeeded));
            }
        }
        for (id, deadline) in &state.terminating {
            if *deadline <= now && !done.iter().any(|(_, done_id, _)| done_id == id) {
                done.push((*deadline, id.clone(), WorkloadState::Failed));
            }
        }
        done.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

        done.into_iter()
            .map(|(_, id, final_state)| {
                if let Some((resources, _)) = state.running.remove(&id) {
                    state.in_use = state.in_use.saturating_sub(&resources);
                }
                state.terminating.remove(&id);
                debug!(workload_id = %id, state = %final_state, "Simulated workload stopped");
                (id, final_state)
            })
            .collect()
    }

    /// Advances the clock and reports every stopped workload to the
    /// scheduler. Returns the final workload records.
    pub fn report_to<H: EvictionHandler>(&self, scheduler: &PreemptionScheduler<H>, now: DateTime<Utc>) -> Vec<Workload> {
        self.advance(now)
            .into_iter()
            .filter_map(|(id, final_state)| match scheduler.workload_finished(&id, final_state, now) {
                Ok(workload) => Some(workload),
                Err(e) => {
                    debug!(workload_id = %id, error = %e, "Scheduler no longer tracks workload");
                    None
                }
            })
            .collect()
    }
}

impl EvictionHandler for SimulatedCluster {
    fn placed(&self, workload: &Workload) -> Result<()> {
        let mut state = self.state.lock();
        let in_use = state.in_use.add(&workload.resources);
        if !in_use.fits_within(&self.capacity) {
            return Err(PreemptionError::PlacementRejected {
                workload_id: workload.id.to_string(),
                reason: format!("cluster cannot fit {}", workload.resources),
            });
        }
        let started = workload.started_at.unwrap_or(state.clock);
        let deadline = state
            .lifetimes
            .get(&workload.id)
            .map(|lifetime| started + offset(*lifetime));
        state.in_use = in_use;
        state
            .running
            .insert(workload.id.clone(), (workload.resources.clone(), deadline));
        Ok(())
    }

    fn evict(&self, workload_id: &WorkloadId, grace_period: Duration) -> Result<()> {
        let mut state = self.state.lock();
        if !state.running.contains_key(workload_id) {
            return Err(PreemptionError::WorkloadNotFound {
                workload_id: workload_id.to_string(),
            });
        }
        let deadline = state.clock + offset(self.termination_delay.min(grace_period));
        state.terminating.entry(workload_id.clone()).or_insert(deadline);
        Ok(())
    }
}

/// One workload in a [`Scenario`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioWorkload {
    /// Workload id.
    pub id: String,
    /// Leaf queue path.
    pub queue: String,
    /// Requested quantities, e.g. `{"memory": "1G"}`.
    pub resources: HashMap<String, String>,
    /// Offset from the start of the run at which the workload is submitted.
    #[serde(default, with = "duration_str")]
    pub submit_at: Duration,
    /// How long the workload runs once placed. Runs forever when absent.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "optional_duration")]
    pub lifetime: Option<Duration>,
}

/// A scripted run against a [`SimulatedCluster`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    /// Partition capacity as quantity strings.
    pub capacity: HashMap<String, String>,
    /// Time an evicted workload takes to stop.
    #[serde(default, with = "duration_str")]
    pub termination_delay: Duration,
    /// Total simulated time.
    #[serde(with = "duration_str")]
    pub duration: Duration,
    /// Simulated time between ticks.
    #[serde(with = "duration_str")]
    pub step: Duration,
    /// Workloads to submit.
    pub workloads: Vec<ScenarioWorkload>,
}

/// Final state of one workload after a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadReport {
    /// Workload id.
    pub id: WorkloadId,
    /// Leaf queue path.
    pub queue: String,
    /// Last known state.
    pub state: WorkloadState,
    /// Whether it was evicted.
    pub preempted: bool,
}

impl From<&Workload> for WorkloadReport {
    fn from(workload: &Workload) -> Self {
        Self {
            id: workload.id.clone(),
            queue: workload.queue.clone(),
            state: workload.state,
            preempted: workload.preempted,
        }
    }
}

/// Outcome of [`Scenario::run`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationReport {
    /// Queue status at the end of the run.
    pub queues: Vec<QueueStatus>,
    /// Every workload, ordered by id.
    pub workloads: Vec<WorkloadReport>,
    /// Preemption decisions taken.
    pub evictions: Vec<EvictionRecord>,
    /// Scheduler counters.
    pub stats: SchedulerStats,
}

impl SimulationReport {
    /// Looks up a workload by id.
    #[must_use]
    pub fn workload(&self, id: &str) -> Option<&WorkloadReport> {
        self.workloads.iter().find(|w| w.id.as_str() == id)
    }
}

impl Scenario {
    /// Parses a scenario from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`PreemptionError::InvalidConfig`] if the JSON is malformed.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| PreemptionError::InvalidConfig {
            reason: format!("scenario: {e}"),
        })
    }

    /// Reads a scenario from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| PreemptionError::InvalidConfig {
            reason: format!("cannot read {}: {e}", path.display()),
        })?;
        Self::from_json(&json)
    }

    /// Runs the scenario from the unix epoch with the given queue document.
    ///
    /// # Errors
    ///
    /// Returns an error if the scenario or document is invalid, or a
    /// submission is rejected.
    pub fn run(&self, document: &QueueConfigDocument, config: PreemptionConfig) -> Result<SimulationReport> {
        if self.step.is_zero() {
            return Err(PreemptionError::InvalidConfig {
                reason: "scenario step must be greater than zero".into(),
            });
        }
        let capacity = ResourceVector::from_quantities(&self.capacity)?;
        let cluster = Arc::new(SimulatedCluster::new(capacity.clone(), self.termination_delay));
        let scheduler = PreemptionScheduler::new(config, Arc::clone(&cluster));
        scheduler.apply_queue_config(document)?;
        scheduler.set_capacity(capacity);

        let mut submissions = Vec::with_capacity(self.workloads.len());
        for workload in &self.workloads {
            let resources = ResourceVector::from_quantities(&workload.resources)?;
            if let Some(lifetime) = workload.lifetime {
                cluster.set_lifetime(&WorkloadId::new(workload.id.clone()), lifetime);
            }
            submissions.push((
                workload.submit_at,
                WorkloadSpec::new(workload.queue.clone(), resources).with_id(workload.id.clone()),
            ));
        }
        submissions.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.id.cmp(&b.1.id)));
        let mut submissions = submissions.into_iter().peekable();

        let start = DateTime::<Utc>::default();
        let mut finished: Vec<Workload> = Vec::new();
        let mut elapsed = Duration::ZERO;
        loop {
            let now = start + offset(elapsed);
            while let Some((_, spec)) = submissions.next_if(|(at, _)| *at <= elapsed) {
                scheduler.submit(spec, now)?;
            }
            finished.extend(cluster.report_to(&scheduler, now));
            scheduler.tick(now);
            if elapsed >= self.duration {
                break;
            }
            elapsed += self.step;
        }

        let mut workloads: Vec<WorkloadReport> = finished
            .iter()
            .chain(scheduler.workloads().iter())
            .map(WorkloadReport::from)
            .collect();
        workloads.sort_by(|a, b| a.id.cmp(&b.id));

        let stats = scheduler.stats();
        info!(
            ticks = stats.ticks,
            placed = stats.placed,
            evictions = stats.evictions,
            "Simulation finished"
        );
        Ok(SimulationReport {
            queues: scheduler.queue_statuses(),
            workloads,
            evictions: scheduler.eviction_history(),
            stats,
        })
    }
}

mod optional_duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match duration {
            Some(duration) => crate::config::duration_str::serialize(duration, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        raw.map(|raw| humantime::parse_duration(&raw).map_err(serde::de::Error::custom))
            .transpose()
    }
}
