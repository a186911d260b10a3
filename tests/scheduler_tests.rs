
use fleet_scheduler::catalog::SourceMode;
use fleet_scheduler::config::RetryPolicy;
use fleet_scheduler::ingest::SlotBinding;
use fleet_scheduler::proto::runner_callback_server::RunnerCallback;
use fleet_scheduler::proto::{ActionFinishedRequest, ActionType as ProtoActionType};
use fleet_scheduler::scheduler::{ActionStatus, ActionType, StreamVersion};
use tonic::Request;
use uuid::Uuid;

use test_harness::{due_stream, hall, Fleet};

async fn finish(fleet: &Fleet, hostname: &str, action_id: Uuid, action_type: ProtoActionType) {
    fleet
        .callback_service()
        .notify_action_finished(Request::new(ActionFinishedRequest {
            hostname: hostname.to_string(),
            action_id: action_id.to_string(),
            action_type: action_type as i32,
            success: true,
            error: String::new(),
        }))
        .await
        .unwrap();
}

/// A combined hall fans a due stream out to three jobs of three awaiting actions
#[tokio::test]
async fn test_discovery_creates_job_per_version() {
    let fleet = Fleet::new(vec![hall(1, SourceMode::Combined)], vec![due_stream(100, 1)]);

    let report = fleet.scheduler.notify_for_streams().await.unwrap();
    assert_eq!(report.jobs_created, 3);

    let jobs = fleet.state.jobs.read().await;
    let all = jobs.all_jobs();
    assert_eq!(all.len(), 3);
    for job in all {
        assert_eq!(job.actions.len(), 3);
        assert!(job.actions.iter().all(|a| a.status == ActionStatus::Awaiting));
        let types: Vec<ActionType> = job.actions.iter().map(|a| a.action_type()).collect();
        assert_eq!(
            types,
            vec![ActionType::Stream, ActionType::Transcode, ActionType::Upload]
        );
    }
}

/// One alive runner picks up an awaiting stream action and its workload grows
#[tokio::test]
async fn test_stream_action_dispatched_to_alive_runner() {
    let fleet = Fleet::new(
        vec![hall(1, SourceMode::PresentationOnly)],
        vec![due_stream(100, 1)],
    );
    fleet.register("runner-1").await;
    fleet.scheduler.notify_for_streams().await.unwrap();

    let report = fleet.scheduler.notify_runner_assignments().await;
    assert_eq!(report.dispatched, 1);

    let ids = fleet.action_ids(100, StreamVersion::Pres).await;
    assert_eq!(fleet.status(ids[0]).await, ActionStatus::Running);
    assert_eq!(fleet.runners_of(ids[0]).await, vec!["runner-1"]);
    assert_eq!(fleet.workload("runner-1").await, 2);

    let dispatches = fleet.control.dispatches();
    assert_eq!(dispatches.len(), 1);
    assert_eq!(dispatches[0].kind, "stream");
    assert_eq!(
        dispatches[0].ingest_url.as_deref(),
        Some("rtmp://ingest-a.ingest.test/live/s0")
    );
}

/// Later actions wait until every earlier action in the job has completed
#[tokio::test]
async fn test_actions_dispatch_in_list_order() {
    let fleet = Fleet::new(vec![hall(1, SourceMode::CameraOnly)], vec![due_stream(100, 1)]);
    fleet.register("runner-1").await;
    fleet.scheduler.notify_for_streams().await.unwrap();
    let ids = fleet.action_ids(100, StreamVersion::Cam).await;

    // Repeated passes while the stream runs dispatch nothing new
    for _ in 0..3 {
        fleet.scheduler.notify_runner_assignments().await;
    }
    assert_eq!(fleet.control.dispatches().len(), 1);
    assert_eq!(fleet.status(ids[1]).await, ActionStatus::Awaiting);

    finish(&fleet, "runner-1", ids[0], ProtoActionType::Stream).await;
    fleet.scheduler.notify_runner_assignments().await;
    assert_eq!(fleet.status(ids[1]).await, ActionStatus::Running);
    assert_eq!(fleet.status(ids[2]).await, ActionStatus::Awaiting);

    finish(&fleet, "runner-1", ids[1], ProtoActionType::Transcode).await;
    fleet.scheduler.notify_runner_assignments().await;
    assert_eq!(fleet.status(ids[2]).await, ActionStatus::Running);
    assert_eq!(fleet.runners_of(ids[2]).await, vec!["runner-1"]);

    finish(&fleet, "runner-1", ids[2], ProtoActionType::Upload).await;
    let jobs = fleet.state.jobs.read().await;
    assert!(jobs.open_jobs().is_empty());

    let order: Vec<Uuid> = fleet
        .control
        .dispatches()
        .into_iter()
        .map(|d| d.action_id)
        .collect();
    assert_eq!(order, vec![ids[0], ids[1]]);
}

/// An upload stranded on a dead transcode host moves to another alive runner
#[tokio::test]
async fn test_upload_reassigned_when_transcode_runner_dies() {
    let fleet = Fleet::new(vec![hall(1, SourceMode::CameraOnly)], vec![due_stream(100, 1)]);
    fleet.register("runner-1").await;
    fleet.scheduler.notify_for_streams().await.unwrap();
    let ids = fleet.action_ids(100, StreamVersion::Cam).await;

    fleet.scheduler.notify_runner_assignments().await;
    finish(&fleet, "runner-1", ids[0], ProtoActionType::Stream).await;
    fleet.scheduler.notify_runner_assignments().await;
    finish(&fleet, "runner-1", ids[1], ProtoActionType::Transcode).await;
    fleet.scheduler.notify_runner_assignments().await;
    assert_eq!(fleet.status(ids[2]).await, ActionStatus::Running);
    assert_eq!(fleet.runners_of(ids[2]).await, vec!["runner-1"]);

    fleet.register("runner-2").await;
    fleet.expire("runner-1").await;

    let report = fleet.scheduler.notify_runner_assignments().await;
    assert_eq!(report.failed, 1);
    assert_eq!(report.restarted, 1);
    assert_eq!(report.dispatched, 1);
    assert_eq!(report.deferred, 0);
    assert_eq!(fleet.status(ids[2]).await, ActionStatus::Running);
    assert_eq!(fleet.runners_of(ids[2]).await, vec!["runner-1", "runner-2"]);

    finish(&fleet, "runner-2", ids[2], ProtoActionType::Upload).await;
    assert!(fleet.state.jobs.read().await.open_jobs().is_empty());
}

/// A silent runner's action is failed, restarted and handed to another runner
#[tokio::test]
async fn test_dead_runner_action_is_reassigned() {
    let fleet = Fleet::new(
        vec![hall(1, SourceMode::PresentationOnly)],
        vec![due_stream(100, 1)],
    );
    fleet.register("runner-1").await;
    fleet.scheduler.notify_for_streams().await.unwrap();
    fleet.scheduler.notify_runner_assignments().await;
    let ids = fleet.action_ids(100, StreamVersion::Pres).await;
    assert_eq!(fleet.runners_of(ids[0]).await, vec!["runner-1"]);

    fleet.register("runner-2").await;
    fleet.expire("runner-1").await;

    let report = fleet.scheduler.notify_runner_assignments().await;
    assert_eq!(report.failed, 1);
    assert_eq!(report.restarted, 1);
    assert_eq!(report.dispatched, 1);

    assert_eq!(fleet.status(ids[0]).await, ActionStatus::Running);
    assert_eq!(fleet.runners_of(ids[0]).await, vec!["runner-1", "runner-2"]);
    assert_eq!(fleet.workload("runner-1").await, 0);
    assert_eq!(fleet.workload("runner-2").await, 2);

    // The stream keeps exactly one slot across the move
    let slots = fleet.state.slots.lock().await;
    let bound: usize = slots.endpoints().iter().map(|e| e.bound_count()).sum();
    assert_eq!(bound, 1);
    assert!(slots
        .lease_for(SlotBinding::new(100, StreamVersion::Pres))
        .is_some());
}

/// Without another alive runner the failed action is left restarted
#[tokio::test]
async fn test_dead_runner_without_replacement_leaves_action_restarted() {
    let fleet = Fleet::new(
        vec![hall(1, SourceMode::PresentationOnly)],
        vec![due_stream(100, 1)],
    );
    fleet.register("runner-1").await;
    fleet.scheduler.notify_for_streams().await.unwrap();
    fleet.scheduler.notify_runner_assignments().await;
    let ids = fleet.action_ids(100, StreamVersion::Pres).await;

    fleet.expire("runner-1").await;
    let report = fleet.scheduler.notify_runner_assignments().await;
    assert_eq!(report.failed, 1);
    assert_eq!(report.restarted, 1);
    assert_eq!(report.deferred, 1);
    assert_eq!(fleet.status(ids[0]).await, ActionStatus::Restarted);

    // The next pass picks it up through the regular path once a runner is back
    fleet.register("runner-2").await;
    let report = fleet.scheduler.notify_runner_assignments().await;
    assert_eq!(report.dispatched, 1);
    assert_eq!(fleet.status(ids[0]).await, ActionStatus::Running);
}

/// Each reconciliation pass moves a stranded action through exactly one
/// failed, restarted, running cycle
#[tokio::test]
async fn test_one_recovery_cycle_per_pass() {
    let fleet = Fleet::new(
        vec![hall(1, SourceMode::PresentationOnly)],
        vec![due_stream(100, 1)],
    );
    fleet.register("runner-1").await;
    fleet.scheduler.notify_for_streams().await.unwrap();
    fleet.scheduler.notify_runner_assignments().await;
    let ids = fleet.action_ids(100, StreamVersion::Pres).await;

    fleet.register("runner-2").await;
    fleet.expire("runner-1").await;
    fleet.scheduler.notify_runner_assignments().await;
    assert_eq!(fleet.runners_of(ids[0]).await.len(), 2);

    // runner-2 is healthy, so another pass changes nothing
    let report = fleet.scheduler.notify_runner_assignments().await;
    assert_eq!(report.failed, 0);
    assert_eq!(report.restarted, 0);
    assert_eq!(fleet.runners_of(ids[0]).await.len(), 2);
    assert_eq!(fleet.control.dispatches_for(ids[0]).len(), 2);
}

/// A failed dispatch leaves the action awaiting and frees its slot
#[tokio::test]
async fn test_unreachable_runner_keeps_action_awaiting() {
    let fleet = Fleet::new(
        vec![hall(1, SourceMode::PresentationOnly)],
        vec![due_stream(100, 1)],
    );
    fleet.register("runner-1").await;
    fleet.control.fail_host("runner-1");
    fleet.scheduler.notify_for_streams().await.unwrap();

    let report = fleet.scheduler.notify_runner_assignments().await;
    assert_eq!(report.deferred, 1);

    let ids = fleet.action_ids(100, StreamVersion::Pres).await;
    assert_eq!(fleet.status(ids[0]).await, ActionStatus::Awaiting);
    assert_eq!(fleet.workload("runner-1").await, 0);
    let slots = fleet.state.slots.lock().await;
    assert!(slots
        .lease_for(SlotBinding::new(100, StreamVersion::Pres))
        .is_none());
    drop(slots);

    fleet.control.heal_host("runner-1");
    fleet.scheduler.notify_runner_assignments().await;
    assert_eq!(fleet.status(ids[0]).await, ActionStatus::Running);
}

/// COMB streams need a transcoding slot; without one nothing is bound
#[tokio::test]
async fn test_comb_stream_without_transcoding_slot() {
    let fleet = Fleet::new(vec![hall(1, SourceMode::Combined)], vec![due_stream(100, 1)]);
    {
        let mut slots = fleet.state.slots.lock().await;
        for i in 0..4 {
            slots
                .reserve_and_bind(SlotBinding::new(900 + i, StreamVersion::Comb))
                .unwrap();
        }
    }
    fleet.register("runner-1").await;
    fleet.scheduler.notify_for_streams().await.unwrap();
    fleet.scheduler.notify_runner_assignments().await;

    let comb = fleet.action_ids(100, StreamVersion::Comb).await;
    assert_eq!(fleet.status(comb[0]).await, ActionStatus::Awaiting);
    // PRES and CAM still got plain slots
    let pres = fleet.action_ids(100, StreamVersion::Pres).await;
    assert_eq!(fleet.status(pres[0]).await, ActionStatus::Running);

    let slots = fleet.state.slots.lock().await;
    assert!(slots
        .lease_for(SlotBinding::new(100, StreamVersion::Comb))
        .is_none());
}

/// Least loaded runner wins, weighted by action type
#[tokio::test]
async fn test_work_spreads_over_runners() {
    let fleet = Fleet::new(
        vec![hall(1, SourceMode::PresentationOnly)],
        vec![due_stream(100, 1), due_stream(101, 1), due_stream(102, 1)],
    );
    fleet.register("runner-1").await;
    fleet.register("runner-2").await;
    fleet.scheduler.notify_for_streams().await.unwrap();
    fleet.scheduler.notify_runner_assignments().await;

    let hosts: Vec<String> = fleet
        .control
        .dispatches()
        .into_iter()
        .map(|d| d.hostname)
        .collect();
    assert_eq!(hosts, vec!["runner-1", "runner-2", "runner-1"]);
    assert_eq!(fleet.workload("runner-1").await, 4);
    assert_eq!(fleet.workload("runner-2").await, 2);
}

/// With a retry limit, an action that ran out of attempts stays failed
#[tokio::test]
async fn test_max_attempts_leaves_action_failed() {
    let fleet = Fleet::with_retry(
        vec![hall(1, SourceMode::PresentationOnly)],
        vec![due_stream(100, 1)],
        RetryPolicy {
            max_attempts: Some(1),
        },
    );
    fleet.register("runner-1").await;
    fleet.register("runner-2").await;
    fleet.scheduler.notify_for_streams().await.unwrap();
    fleet.scheduler.notify_runner_assignments().await;
    let ids = fleet.action_ids(100, StreamVersion::Pres).await;
    let first = fleet.runners_of(ids[0]).await[0].clone();

    fleet.expire(&first).await;
    let report = fleet.scheduler.notify_runner_assignments().await;
    assert_eq!(report.failed, 1);
    assert_eq!(report.abandoned, 1);
    assert_eq!(report.restarted, 0);
    assert_eq!(fleet.status(ids[0]).await, ActionStatus::Failed);
    assert_eq!(fleet.runners_of(ids[0]).await.len(), 1);
}

/// A late success from the replaced runner still completes the action
#[tokio::test]
async fn test_late_success_from_replaced_runner_completes_action() {
    let fleet = Fleet::new(
        vec![hall(1, SourceMode::PresentationOnly)],
        vec![due_stream(100, 1)],
    );
    fleet.register("runner-1").await;
    fleet.scheduler.notify_for_streams().await.unwrap();
    fleet.scheduler.notify_runner_assignments().await;
    let ids = fleet.action_ids(100, StreamVersion::Pres).await;

    fleet.register("runner-2").await;
    fleet.expire("runner-1").await;
    fleet.scheduler.notify_runner_assignments().await;

    finish(&fleet, "runner-1", ids[0], ProtoActionType::Stream).await;
    assert_eq!(fleet.status(ids[0]).await, ActionStatus::Completed);
    assert_eq!(fleet.workload("runner-2").await, 0);
}
