//! Background task that drives a [`PreemptionScheduler`].
//!
//! The task ticks on an interval and also right after each batch of events,
//! so a submission or a termination is acted on without waiting for the next
//! interval. Events are applied between ticks, never during one.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Notify, mpsc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::{PreemptionConfig, QueueConfigDocument};
use crate::eviction::EvictionHandler;
use crate::resource::ResourceVector;
use crate::scheduler::PreemptionScheduler;
use crate::types::{WorkloadId, WorkloadSpec, WorkloadState};

/// Input accepted by the scheduler task.
#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    /// Submit a workload.
    Submit(WorkloadSpec),
    /// A workload reached a terminal state.
    Finished {
        /// The workload.
        workload_id: WorkloadId,
        /// Its final state.
        state: WorkloadState,
    },
    /// Withdraw a pending request.
    Withdraw(WorkloadId),
    /// Replace the queue configuration.
    ApplyConfig(QueueConfigDocument),
    /// Change the partition capacity.
    SetCapacity(ResourceVector),
}

/// Configuration for the scheduler task.
#[derive(Debug, Clone)]
pub struct SchedulerTaskConfig {
    /// Interval between ticks when no events arrive.
    pub tick_interval: Duration,
    /// Capacity of the event channel.
    pub event_buffer: usize,
}

impl Default for SchedulerTaskConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            event_buffer: 256,
        }
    }
}

impl From<&PreemptionConfig> for SchedulerTaskConfig {
    fn from(config: &PreemptionConfig) -> Self {
        Self {
            tick_interval: config.tick_interval,
            ..Self::default()
        }
    }
}

/// Handle for controlling the scheduler task.
#[derive(Debug)]
pub struct SchedulerHandle {
    running: Arc<AtomicBool>,
    ticks: Arc<AtomicU64>,
    shutdown: Arc<Notify>,
}

impl SchedulerHandle {
    pub(crate) fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            ticks: Arc::new(AtomicU64::new(0)),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Check if the scheduler task is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Number of ticks run so far.
    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    /// Stop the scheduler task.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.notify_one();
    }
}

/// Start the scheduler task.
///
/// Returns a handle to control the task and the sender for events. The task
/// ends when the handle is stopped or every sender is dropped.
pub fn start_scheduler_task<H>(
    scheduler: Arc<PreemptionScheduler<H>>,
    config: SchedulerTaskConfig,
) -> (SchedulerHandle, mpsc::Sender<SchedulerEvent>)
where
    H: EvictionHandler + 'static,
{
    let (tx, mut rx) = mpsc::channel::<SchedulerEvent>(config.event_buffer.max(1));
    let handle = SchedulerHandle::new();
    handle.running.store(true, Ordering::SeqCst);

    let running = Arc::clone(&handle.running);
    let ticks = Arc::clone(&handle.ticks);
    let shutdown = Arc::clone(&handle.shutdown);

    tokio::spawn(async move {
        let mut interval_timer = tokio::time::interval(config.tick_interval);
        interval_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(tick_interval_ms = config.tick_interval.as_millis(), "Scheduler task started");

        while running.load(Ordering::SeqCst) {
            tokio::select! {
                _ = interval_timer.tick() => {}
                event = rx.recv() => {
                    let Some(event) = event else {
                        debug!("Event channel closed");
                        break;
                    };
                    apply_event(&scheduler, event);
                    while let Ok(event) = rx.try_recv() {
                        apply_event(&scheduler, event);
                    }
                }
                () = shutdown.notified() => break,
            }

            if !running.load(Ordering::SeqCst) {
                break;
            }

            let outcome = scheduler.tick(Utc::now());
            ticks.fetch_add(1, Ordering::SeqCst);
            if !outcome.is_idle() {
                debug!(
                    placed = outcome.placed.len(),
                    evicted = outcome.evicted.len(),
                    "Scheduler tick"
                );
            }
        }

        running.store(false, Ordering::SeqCst);
        info!("Scheduler task stopped");
    });

    (handle, tx)
}

fn apply_event<H: EvictionHandler>(scheduler: &PreemptionScheduler<H>, event: SchedulerEvent) {
    let now = Utc::now();
    let result = match event {
        SchedulerEvent::Submit(spec) => scheduler.submit(spec, now).map(|_| ()),
        SchedulerEvent::Finished { workload_id, state } => {
            scheduler.workload_finished(&workload_id, state, now).map(|_| ())
        }
        SchedulerEvent::Withdraw(workload_id) => scheduler.withdraw(&workload_id).map(|_| ()),
        SchedulerEvent::ApplyConfig(document) => scheduler.apply_queue_config(&document),
        SchedulerEvent::SetCapacity(capacity) => {
            scheduler.set_capacity(capacity);
            Ok(())
        }
    };
    if let Err(e) = result {
        warn!(error = %e, "Scheduler event rejected");
    }
}
