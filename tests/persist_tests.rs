
use fleet_scheduler::catalog::SourceMode;
use fleet_scheduler::config::SchedulerConfig;
use fleet_scheduler::ingest::SlotBinding;
use fleet_scheduler::persist::Snapshot;
use fleet_scheduler::scheduler::{ActionStatus, StreamVersion};

use test_harness::{due_stream, endpoint, hall, Fleet};

/// Jobs in flight, runners and slot bindings survive a save and restore
#[tokio::test]
async fn test_snapshot_restores_running_work() {
    let fleet = Fleet::new(
        vec![hall(1, SourceMode::PresentationOnly)],
        vec![due_stream(100, 1)],
    );
    fleet.register("runner-1").await;
    fleet.scheduler.notify_for_streams().await.unwrap();
    fleet.scheduler.notify_runner_assignments().await;
    let ids = fleet.action_ids(100, StreamVersion::Pres).await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    Snapshot::capture(&fleet.state).await.save(&path).await.unwrap();
    assert!(!dir.path().join("state.tmp").exists());

    let restored = Snapshot::load(&path)
        .await
        .unwrap()
        .expect("snapshot written")
        .restore(&SchedulerConfig::default(), vec![endpoint("ingest-a", 4, 4)])
        .unwrap();

    let jobs = restored.jobs.read().await;
    let action = jobs.get_action(&ids[0]).unwrap();
    assert_eq!(action.status, ActionStatus::Running);
    assert_eq!(action.runners, vec!["runner-1"]);
    assert!(jobs.has_job(100, StreamVersion::Pres));
    drop(jobs);

    let runners = restored.runners.read().await;
    assert_eq!(runners.get("runner-1").unwrap().workload, 2);
    drop(runners);

    let slots = restored.slots.lock().await;
    assert_eq!(slots.endpoints().len(), 1);
    let lease = slots
        .lease_for(SlotBinding::new(100, StreamVersion::Pres))
        .unwrap();
    assert_eq!(lease.slot, "s0");
}

/// New jobs after a restore continue the creation order
#[tokio::test]
async fn test_restored_store_keeps_job_order() {
    let fleet = Fleet::new(
        vec![hall(1, SourceMode::Combined)],
        vec![due_stream(100, 1)],
    );
    fleet.scheduler.notify_for_streams().await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    Snapshot::capture(&fleet.state).await.save(&path).await.unwrap();

    let restored = Snapshot::load(&path)
        .await
        .unwrap()
        .unwrap()
        .restore(&SchedulerConfig::default(), vec![])
        .unwrap();

    let mut jobs = restored.jobs.write().await;
    let now = chrono::Utc::now();
    let seq = jobs.create_job(200, StreamVersion::Cam, now, now, vec![]).seq;
    assert_eq!(seq, 3);
    let versions: Vec<StreamVersion> = jobs.all_jobs().iter().map(|j| j.version).collect();
    assert_eq!(
        versions,
        vec![
            StreamVersion::Pres,
            StreamVersion::Cam,
            StreamVersion::Comb,
            StreamVersion::Cam
        ]
    );
}

#[tokio::test]
async fn test_corrupt_snapshot_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    tokio::fs::write(&path, b"{ not json").await.unwrap();

    assert!(Snapshot::load(&path).await.is_err());
}
