//! End-to-end tests for the background scheduler task.
//!
//! The task is driven only through its event channel and observed only
//! through the intents it emits, the way an orchestration layer uses it.

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use claw_preemption::{
    ChannelEvictionHandler, ClusterIntent, PreemptionConfig, PreemptionScheduler, QueueConfig,
    QueueConfigDocument, SchedulerEvent, SchedulerTaskConfig, WorkloadId, WorkloadSpec,
    WorkloadState, start_scheduler_task,
};
use helpers::*;
use tokio::sync::mpsc;
use tokio::time::timeout;

const INTENT_TIMEOUT: Duration = Duration::from_secs(5);

fn document() -> QueueConfigDocument {
    QueueConfigDocument::new(
        QueueConfig::new("root")
            .with_child(
                QueueConfig::new("sandbox1")
                    .with_guaranteed("memory", "1")
                    .with_preemption_delay("0s"),
            )
            .with_child(
                QueueConfig::new("sandbox2")
                    .with_guaranteed("memory", "1")
                    .with_preemption_delay("0s"),
            ),
    )
}

async fn next_intent(rx: &mut mpsc::Receiver<ClusterIntent>) -> Option<ClusterIntent> {
    timeout(INTENT_TIMEOUT, rx.recv()).await.ok().flatten()
}

fn placed_id(intent: Option<&ClusterIntent>) -> Option<&str> {
    match intent {
        Some(ClusterIntent::Place { workload_id, .. }) => Some(workload_id.as_str()),
        _ => None,
    }
}

fn submit(id: &str, queue: &str) -> SchedulerEvent {
    SchedulerEvent::Submit(WorkloadSpec::new(queue, mem(1)).with_id(id))
}

// ============================================================================
// Intent Flow
// ============================================================================

#[tokio::test]
async fn test_task_preempts_and_places_through_intents() {
    init_tracing();
    let (handler, mut intents) = ChannelEvictionHandler::channel(64);
    let config = PreemptionConfig::default().with_tick_interval(Duration::from_millis(10));
    let scheduler = Arc::new(PreemptionScheduler::new(config, handler));
    let (handle, events) = start_scheduler_task(
        Arc::clone(&scheduler),
        SchedulerTaskConfig::from(scheduler.config()),
    );

    assert!(events.send(SchedulerEvent::ApplyConfig(document())).await.is_ok());
    assert!(events.send(SchedulerEvent::SetCapacity(mem(3))).await.is_ok());
    for id in ["s1-a", "s1-b", "s1-c"] {
        assert!(events.send(submit(id, "root.sandbox1")).await.is_ok());
    }

    let mut placed = Vec::new();
    for _ in 0..3 {
        let intent = next_intent(&mut intents).await;
        placed.extend(placed_id(intent.as_ref()).map(str::to_string));
    }
    assert_eq!(placed, vec!["s1-a", "s1-b", "s1-c"]);

    assert!(events.send(submit("s2-a", "root.sandbox2")).await.is_ok());
    // The youngest sandbox1 workload goes; which one depends on how the
    // submissions were batched.
    let victim = match next_intent(&mut intents).await {
        Some(ClusterIntent::Evict {
            workload_id,
            grace_period,
        }) if grace_period == Duration::from_secs(30) => Some(workload_id),
        _ => None,
    };
    assert!(victim.as_ref().is_some_and(|id| id.as_str().starts_with("s1-")));
    let victim = victim.unwrap_or_else(|| WorkloadId::new("s1-a"));
    assert_eq!(
        scheduler.workload(&victim).map(|w| w.state),
        Some(WorkloadState::Terminating)
    );

    let finished = SchedulerEvent::Finished {
        workload_id: victim.clone(),
        state: WorkloadState::Failed,
    };
    assert!(events.send(finished).await.is_ok());
    let placement = next_intent(&mut intents).await;
    assert_eq!(placed_id(placement.as_ref()), Some("s2-a"));

    assert_eq!(scheduler.stats().preemptions, 1);
    assert!(scheduler.workload(&victim).is_none());
    handle.stop();
}

#[tokio::test]
async fn test_withdrawn_request_is_never_placed() {
    init_tracing();
    let (handler, mut intents) = ChannelEvictionHandler::channel(64);
    let scheduler = Arc::new(PreemptionScheduler::with_defaults(handler));
    let (handle, events) = start_scheduler_task(
        Arc::clone(&scheduler),
        SchedulerTaskConfig {
            tick_interval: Duration::from_millis(10),
            event_buffer: 16,
        },
    );

    assert!(events.send(SchedulerEvent::ApplyConfig(document())).await.is_ok());
    assert!(events.send(submit("early", "root.sandbox1")).await.is_ok());
    assert!(events.send(SchedulerEvent::Withdraw(WorkloadId::new("early"))).await.is_ok());
    assert!(events.send(SchedulerEvent::SetCapacity(mem(1))).await.is_ok());
    assert!(events.send(submit("late", "root.sandbox1")).await.is_ok());

    let intent = next_intent(&mut intents).await;
    assert_eq!(placed_id(intent.as_ref()), Some("late"));
    assert!(scheduler.workload(&WorkloadId::new("early")).is_none());
    handle.stop();
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_task_stops_when_events_close() {
    init_tracing();
    let (handler, _intents) = ChannelEvictionHandler::channel(4);
    let scheduler = Arc::new(PreemptionScheduler::with_defaults(handler));
    let (handle, events) = start_scheduler_task(scheduler, SchedulerTaskConfig::default());
    assert!(handle.is_running());

    drop(events);
    for _ in 0..100 {
        if !handle.is_running() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!handle.is_running());
}
