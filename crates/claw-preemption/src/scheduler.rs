//! Preemption scheduler for one partition.
//!
//! The [`PreemptionScheduler`] owns the queue tree, every tracked workload
//! and the pending requests. Each [`tick`](PreemptionScheduler::tick) places
//! what fits, and for the rest asks the [`VictimSelector`] whether evicting
//! something would let an under-served queue make progress.
//!
//! Evictions are fire-and-forget. A victim stays `Terminating`, and keeps
//! holding its resources, until the runtime reports it through
//! [`workload_finished`](PreemptionScheduler::workload_finished).

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{PreemptionConfig, QueueConfigDocument};
use crate::error::{PreemptionError, Result};
use crate::eviction::EvictionHandler;
use crate::queue::{PATH_SEPARATOR, QueueStatus};
use crate::resource::ResourceVector;
use crate::selector::{PreemptionRequest, VictimSelector, VictimSet};
use crate::tree::QueueTree;
use crate::types::{
    EvictionFailure, EvictionRecord, PendingRequest, RequestHandle, Workload, WorkloadId, WorkloadSpec,
    WorkloadState,
};

/// Counters describing scheduler activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SchedulerStats {
    /// Scheduling passes run.
    pub ticks: u64,
    /// Workloads accepted by `submit`.
    pub submitted: u64,
    /// Workloads placed.
    pub placed: u64,
    /// Workloads that finished on their own.
    pub completed: u64,
    /// Preemption decisions that evicted at least one workload.
    pub preemptions: u64,
    /// Eviction signals sent successfully.
    pub evictions: u64,
    /// Eviction signals that failed.
    pub eviction_failures: u64,
    /// Victims that reached the consecutive failure threshold.
    pub persistent_eviction_failures: u64,
}

/// What a single tick changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickOutcome {
    /// Workloads placed during the tick.
    pub placed: Vec<WorkloadId>,
    /// Workloads asked to terminate during the tick.
    pub evicted: Vec<WorkloadId>,
}

impl TickOutcome {
    /// Returns true if the tick changed nothing.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.placed.is_empty() && self.evicted.is_empty()
    }
}

#[derive(Debug, Default)]
struct SchedulerState {
    tree: QueueTree,
    capacity: ResourceVector,
    workloads: BTreeMap<WorkloadId, Workload>,
    pending: BTreeMap<WorkloadId, PendingRequest>,
    failed_evictions: HashMap<WorkloadId, u32>,
    history: VecDeque<EvictionRecord>,
    stats: SchedulerStats,
}

impl SchedulerState {
    fn free(&self) -> ResourceVector {
        self.capacity
            .saturating_sub(&self.tree.node(self.tree.root()).usage)
    }

    /// Capacity other pending requests hold back from `id`.
    ///
    /// The part of a reservation that terminating victims still hold is not
    /// counted, since that capacity is not free yet.
    fn reserved_for_others(&self, id: &WorkloadId) -> ResourceVector {
        self.pending
            .values()
            .filter(|r| &r.workload_id != id && !r.reserved.is_zero())
            .fold(ResourceVector::new(), |acc, request| {
                let in_flight = request
                    .awaiting
                    .iter()
                    .filter_map(|victim| self.workloads.get(victim))
                    .filter(|w| w.state == WorkloadState::Terminating)
                    .fold(ResourceVector::new(), |held, w| held.add(&w.resources));
                acc.add(&request.reserved.saturating_sub(&in_flight))
            })
    }

    fn occupied_queues(&self) -> BTreeSet<String> {
        self.workloads.values().map(|w| w.queue.clone()).collect()
    }
}

/// The preemption scheduler for a single partition.
pub struct PreemptionScheduler<H: EvictionHandler> {
    config: PreemptionConfig,
    selector: VictimSelector,
    handler: H,
    state: Mutex<SchedulerState>,
}

impl<H: EvictionHandler> PreemptionScheduler<H> {
    /// Creates a scheduler with a root-only queue tree and no capacity.
    #[must_use]
    pub fn new(config: PreemptionConfig, handler: H) -> Self {
        Self {
            selector: VictimSelector::new(config.clone()),
            config,
            handler,
            state: Mutex::new(SchedulerState::default()),
        }
    }

    /// Creates a scheduler with default configuration.
    #[must_use]
    pub fn with_defaults(handler: H) -> Self {
        Self::new(PreemptionConfig::default(), handler)
    }

    /// Returns the current configuration.
    #[must_use]
    pub const fn config(&self) -> &PreemptionConfig {
        &self.config
    }

    /// Returns the eviction handler.
    #[must_use]
    pub const fn handler(&self) -> &H {
        &self.handler
    }

    /// Submits a workload. It waits as a pending request until the next tick.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue does not exist, is not a leaf, is
    /// draining, or if the workload id is already tracked.
    pub fn submit(&self, spec: WorkloadSpec, now: DateTime<Utc>) -> Result<RequestHandle> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let queue = state.tree.lookup(&spec.queue)?;
        let node = state.tree.node(queue);
        if !node.is_leaf() {
            return Err(PreemptionError::NotALeafQueue { path: spec.queue });
        }
        if node.draining {
            return Err(PreemptionError::QueueDraining { path: spec.queue });
        }

        let id = spec.id.unwrap_or_else(WorkloadId::generate);
        if state.workloads.contains_key(&id) {
            return Err(PreemptionError::DuplicateWorkload {
                workload_id: id.to_string(),
            });
        }

        let grace_period = spec
            .grace_period
            .unwrap_or(self.config.default_grace_period)
            .min(self.config.max_grace_period);
        let workload = Workload::pending(id.clone(), spec.queue, spec.resources, grace_period, now);
        let mut request = PendingRequest::new(&workload, now);
        if !workload.resources.fits_within(&state.capacity) {
            request.unsatisfiable = true;
            warn!(
                workload_id = %id,
                queue = %workload.queue,
                requested = %workload.resources,
                capacity = %state.capacity,
                "Request exceeds partition capacity"
            );
        }

        info!(
            workload_id = %id,
            queue = %workload.queue,
            resources = %workload.resources,
            "Workload submitted"
        );
        let handle = RequestHandle {
            workload_id: id.clone(),
            queue: workload.queue.clone(),
            submitted_at: now,
        };
        state.pending.insert(id.clone(), request);
        state.workloads.insert(id, workload);
        state.stats.submitted += 1;
        Ok(handle)
    }

    /// Removes a pending request without side effects.
    ///
    /// # Errors
    ///
    /// Returns [`PreemptionError::WorkloadNotFound`] if no pending request
    /// has this id.
    pub fn withdraw(&self, workload_id: &WorkloadId) -> Result<Workload> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.pending.remove(workload_id).is_none() {
            return Err(PreemptionError::WorkloadNotFound {
                workload_id: workload_id.to_string(),
            });
        }
        let workload = state
            .workloads
            .remove(workload_id)
            .ok_or_else(|| PreemptionError::WorkloadNotFound {
                workload_id: workload_id.to_string(),
            })?;
        info!(workload_id = %workload_id, queue = %workload.queue, "Pending request withdrawn");
        let occupied = state.occupied_queues();
        state.tree.prune_drained(&occupied);
        Ok(workload)
    }

    /// Records that a workload terminated and releases its resources.
    ///
    /// Returns the final record of the workload, which is no longer tracked
    /// afterwards. A workload that was evicted is marked as preempted.
    ///
    /// # Errors
    ///
    /// Returns an error if `final_state` is not terminal or the workload is
    /// unknown.
    pub fn workload_finished(
        &self,
        workload_id: &WorkloadId,
        final_state: WorkloadState,
        now: DateTime<Utc>,
    ) -> Result<Workload> {
        if !final_state.is_terminal() {
            return Err(PreemptionError::InvalidState {
                workload_id: workload_id.to_string(),
                reason: format!("cannot finish in state {final_state}"),
            });
        }

        let mut guard = self.state.lock();
        let state = &mut *guard;
        let mut workload = state
            .workloads
            .remove(workload_id)
            .ok_or_else(|| PreemptionError::WorkloadNotFound {
                workload_id: workload_id.to_string(),
            })?;

        if workload.state.holds_resources() {
            if let Ok(leaf) = state.tree.lookup(&workload.queue) {
                state.tree.release(leaf, &workload.resources);
            }
        }
        if workload.state == WorkloadState::Terminating {
            workload.preempted = true;
        } else if workload.state == WorkloadState::Running {
            state.stats.completed += 1;
        }
        state.pending.remove(workload_id);
        state.failed_evictions.remove(workload_id);
        for request in state.pending.values_mut() {
            request.awaiting.retain(|id| id != workload_id);
        }

        workload.state = final_state;
        workload.finished_at = Some(now);
        info!(
            workload_id = %workload_id,
            queue = %workload.queue,
            state = %final_state,
            preempted = workload.preempted,
            "Workload finished"
        );

        let occupied = state.occupied_queues();
        if state.tree.prune_drained(&occupied) {
            info!("Removed drained queues");
        }
        Ok(workload)
    }

    /// Sets the partition capacity.
    pub fn set_capacity(&self, capacity: ResourceVector) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        info!(capacity = %capacity, "Partition capacity updated");
        for request in state.pending.values_mut() {
            let unsatisfiable = !request.resources.fits_within(&capacity);
            if unsatisfiable && !request.unsatisfiable {
                warn!(
                    workload_id = %request.workload_id,
                    requested = %request.resources,
                    capacity = %capacity,
                    "Request exceeds partition capacity"
                );
            }
            request.unsatisfiable = unsatisfiable;
        }
        state.capacity = capacity;
    }

    /// Returns the partition capacity.
    #[must_use]
    pub fn capacity(&self) -> ResourceVector {
        self.state.lock().capacity.clone()
    }

    /// Applies a queue configuration document.
    ///
    /// Usage is carried over. Queues that disappear but still hold workloads
    /// are kept as draining queues until they empty.
    ///
    /// # Errors
    ///
    /// Returns an error and keeps the current tree if the document is
    /// invalid or conflicts with running workloads.
    pub fn apply_queue_config(&self, document: &QueueConfigDocument) -> Result<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let occupied = state.occupied_queues();
        match state.tree.reconfigure(document, &occupied) {
            Ok(tree) => {
                state.tree = tree;
                info!(
                    partition = %document.partition,
                    queues = state.tree.queue_count(),
                    "Queue configuration applied"
                );
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Queue configuration rejected");
                Err(e)
            }
        }
    }

    /// Parses and applies a JSON queue configuration document.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or the document is rejected.
    pub fn apply_queue_config_json(&self, json: &str) -> Result<()> {
        let document = QueueConfigDocument::from_json(json)?;
        self.apply_queue_config(&document)
    }

    /// Returns the status of one queue.
    ///
    /// # Errors
    ///
    /// Returns [`PreemptionError::QueueNotFound`] for unknown paths.
    pub fn query_queue_status(&self, path: &str) -> Result<QueueStatus> {
        let state = self.state.lock();
        let mut status = state.tree.status(path)?;
        fill_counts(&state, &mut status);
        Ok(status)
    }

    /// Returns the status of every queue in tree order.
    #[must_use]
    pub fn queue_statuses(&self) -> Vec<QueueStatus> {
        let state = self.state.lock();
        state
            .tree
            .iter()
            .filter_map(|(_, node)| state.tree.status(&node.path).ok())
            .map(|mut status| {
                fill_counts(&state, &mut status);
                status
            })
            .collect()
    }

    /// Returns a snapshot of the queue tree.
    #[must_use]
    pub fn tree(&self) -> QueueTree {
        self.state.lock().tree.clone()
    }

    /// Returns a tracked workload.
    #[must_use]
    pub fn workload(&self, workload_id: &WorkloadId) -> Option<Workload> {
        self.state.lock().workloads.get(workload_id).cloned()
    }

    /// Returns all tracked workloads ordered by id.
    #[must_use]
    pub fn workloads(&self) -> Vec<Workload> {
        self.state.lock().workloads.values().cloned().collect()
    }

    /// Returns pending requests in scheduling order.
    #[must_use]
    pub fn pending(&self) -> Vec<PendingRequest> {
        let state = self.state.lock();
        let mut pending: Vec<PendingRequest> = state.pending.values().cloned().collect();
        pending.sort_by(|a, b| {
            a.waiting_since
                .cmp(&b.waiting_since)
                .then_with(|| a.workload_id.cmp(&b.workload_id))
        });
        pending
    }

    /// Returns eviction history, oldest first.
    #[must_use]
    pub fn eviction_history(&self) -> Vec<EvictionRecord> {
        self.state.lock().history.iter().cloned().collect()
    }

    /// Clears eviction history older than the given duration.
    pub fn clear_old_history(&self, older_than: Duration, now: DateTime<Utc>) {
        let cutoff = now - chrono::Duration::from_std(older_than).unwrap_or_default();
        let mut state = self.state.lock();
        state.history.retain(|r| r.initiated_at > cutoff);
    }

    /// Returns activity counters.
    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        self.state.lock().stats
    }

    /// Runs one scheduling pass at `now`.
    ///
    /// Pending requests are visited oldest first. A request that fits the
    /// free capacity is placed. Otherwise, if nothing is still terminating on
    /// its behalf, the selector looks for victims, and a victim set is
    /// evicted only when it frees enough for the whole request.
    ///
    /// A request that evicted is reserved its full size. Once its victims
    /// stop, the capacity they released is kept from every other request
    /// until the requester is placed, withdrawn or has to select again.
    pub fn tick(&self, now: DateTime<Utc>) -> TickOutcome {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.stats.ticks += 1;

        let mut order: Vec<(DateTime<Utc>, WorkloadId)> = state
            .pending
            .values()
            .map(|r| (r.waiting_since, r.workload_id.clone()))
            .collect();
        order.sort();

        let mut outcome = TickOutcome::default();
        for (_, id) in order {
            let Some(request) = state.pending.get_mut(&id) else {
                continue;
            };
            let workloads = &state.workloads;
            request.awaiting.retain(|victim| {
                workloads
                    .get(victim)
                    .is_some_and(|w| w.state == WorkloadState::Terminating)
            });
            let request = request.clone();

            let free = state.free().saturating_sub(&state.reserved_for_others(&id));
            if request.resources.fits_within(&free) {
                if self.place(state, &id, now) {
                    outcome.placed.push(id);
                }
                continue;
            }
            if !request.awaiting.is_empty() {
                continue;
            }
            // Victims are gone and the request still does not fit.
            if let Some(pending) = state.pending.get_mut(&id) {
                pending.reserved = ResourceVector::new();
            }
            if request.unsatisfiable || !self.config.enabled {
                continue;
            }

            let preemption = PreemptionRequest::new(
                request.queue.clone(),
                request.resources.saturating_sub(&free),
                request.waiting_since,
            );
            let set = self
                .selector
                .find_victims(&state.tree, state.workloads.values(), &preemption, now);
            if set.is_empty() {
                continue;
            }
            if !set.satisfies_request {
                debug!(
                    workload_id = %id,
                    queue = %request.queue,
                    freed = %set.total_freed,
                    required = %preemption.required,
                    "Victims would not free enough, waiting"
                );
                continue;
            }
            let record = self.evict_victims(state, &request, &set, now);
            outcome.evicted.extend(record.evicted_workloads.iter().cloned());
        }
        outcome
    }

    fn place(&self, state: &mut SchedulerState, id: &WorkloadId, now: DateTime<Utc>) -> bool {
        let Some(workload) = state.workloads.get_mut(id) else {
            return false;
        };
        let Ok(leaf) = state.tree.lookup(&workload.queue) else {
            warn!(workload_id = %id, queue = %workload.queue, "Queue vanished for pending workload");
            return false;
        };

        workload.state = WorkloadState::Running;
        workload.started_at = Some(now);
        if let Err(e) = self.handler.placed(workload) {
            warn!(workload_id = %id, error = %e, "Placement rejected, keeping workload pending");
            workload.state = WorkloadState::Pending;
            workload.started_at = None;
            return false;
        }

        state.tree.allocate(leaf, &workload.resources);
        info!(
            workload_id = %id,
            queue = %workload.queue,
            resources = %workload.resources,
            "Workload placed"
        );
        state.pending.remove(id);
        state.stats.placed += 1;
        true
    }

    fn evict_victims(
        &self,
        state: &mut SchedulerState,
        request: &PendingRequest,
        set: &VictimSet,
        now: DateTime<Utc>,
    ) -> EvictionRecord {
        let mut record = EvictionRecord::new(request.workload_id.clone(), request.queue.clone(), now);

        for victim in &set.victims {
            let grace_period = victim.grace_period.min(self.config.max_grace_period);
            info!(
                workload_id = %victim.id,
                queue = %victim.queue,
                requested_by = %request.workload_id,
                grace_period_secs = grace_period.as_secs(),
                "Initiating graceful eviction"
            );

            match self.handler.evict(&victim.id, grace_period) {
                Ok(()) => {
                    state.failed_evictions.remove(&victim.id);
                    if let Some(workload) = state.workloads.get_mut(&victim.id) {
                        workload.state = WorkloadState::Terminating;
                    }
                    record.add_evicted(victim.id.clone(), &victim.resources);
                }
                Err(e) => {
                    let failures = state.failed_evictions.entry(victim.id.clone()).or_insert(0);
                    *failures += 1;
                    warn!(
                        workload_id = %victim.id,
                        error = %e,
                        consecutive_failures = *failures,
                        "Failed to evict workload"
                    );
                    if *failures == self.config.eviction_failure_threshold {
                        warn!(
                            workload_id = %victim.id,
                            consecutive_failures = *failures,
                            threshold = self.config.eviction_failure_threshold,
                            "Eviction keeps failing"
                        );
                        state.stats.persistent_eviction_failures += 1;
                    }
                    record.add_failure(EvictionFailure::new(victim.id.clone(), e.to_string(), now));
                }
            }
        }

        if let Some(pending) = state.pending.get_mut(&request.workload_id) {
            pending.awaiting.extend(record.evicted_workloads.iter().cloned());
            if record.evicted_count() > 0 {
                pending.reserved = pending.resources.clone();
            }
        }
        state.stats.evictions += record.evicted_count() as u64;
        state.stats.eviction_failures += record.failures.len() as u64;
        if record.evicted_count() > 0 {
            state.stats.preemptions += 1;
        }

        state.history.push_back(record.clone());
        while state.history.len() > self.config.max_history {
            state.history.pop_front();
        }
        record
    }
}

fn fill_counts(state: &SchedulerState, status: &mut QueueStatus) {
    let prefix = format!("{}{PATH_SEPARATOR}", status.path);
    let inside = |queue: &str| queue == status.path || queue.starts_with(&prefix);
    status.running = state
        .workloads
        .values()
        .filter(|w| w.state.holds_resources() && inside(&w.queue))
        .count();
    status.pending = state.pending.values().filter(|r| inside(&r.queue)).count();
}
