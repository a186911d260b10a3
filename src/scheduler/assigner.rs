use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::catalog::Collaborators;
use crate::config::RetryPolicy;
use crate::error::{FleetError, Result};
use crate::grpc::RunnerControl;
use crate::ingest::{SlotBinding, SlotLease};
use crate::proto::{self, StreamRequest, TranscodingRequest};
use crate::registry::Runner;
use crate::scheduler::job::{Action, ActionKind, ActionStatus};
use crate::state::FleetState;

/// Outcome of one assignment and reconciliation pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AssignmentReport {
    /// Actions handed to a runner (first attempts and retries).
    pub dispatched: usize,
    /// Actions that could not be placed this tick and stay where they were.
    pub deferred: usize,
    /// Running actions whose runner was found dead.
    pub failed: usize,
    /// Failed actions moved to restarted.
    pub restarted: usize,
    /// Failed actions left alone because they hit the retry limit.
    pub abandoned: usize,
}

/// Places actions on runners and recovers from runner failure.
#[derive(Clone)]
pub struct Scheduler {
    pub(crate) state: FleetState,
    pub(crate) catalog: Collaborators,
    control: Arc<dyn RunnerControl>,
    retry: RetryPolicy,
}

impl Scheduler {
    pub fn new(
        state: FleetState,
        catalog: Collaborators,
        control: Arc<dyn RunnerControl>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            state,
            catalog,
            control,
            retry,
        }
    }

    pub fn state(&self) -> &FleetState {
        &self.state
    }

    /// One assignment and reconciliation pass.
    ///
    /// 1. The next action of every open job is dispatched if it is waiting.
    /// 2. Running actions whose runner is no longer alive become failed.
    /// 3. Failed actions are restarted and dispatched again.
    ///
    /// Failures to place an action are logged and retried on the next pass.
    pub async fn notify_runner_assignments(&self) -> AssignmentReport {
        let mut report = AssignmentReport::default();

        let pending: Vec<Uuid> = {
            let jobs = self.state.jobs.read().await;
            jobs.open_jobs()
                .into_iter()
                .filter_map(|job| match jobs.next_action(&job.id) {
                    Ok(action)
                        if matches!(
                            action.status,
                            ActionStatus::Awaiting | ActionStatus::Restarted
                        ) =>
                    {
                        Some(action.id)
                    }
                    Ok(_) => None,
                    Err(e) => {
                        tracing::debug!(job_id = %job.id, error = %e, "Open job has nothing to dispatch");
                        None
                    }
                })
                .collect()
        };

        for action_id in pending {
            match self.assign_action(&action_id).await {
                Ok(_) => report.dispatched += 1,
                Err(e) => {
                    tracing::warn!(action_id = %action_id, error = %e, "Action not assigned, retrying next tick");
                    report.deferred += 1;
                }
            }
        }

        report.failed = self.fail_orphaned_actions().await;

        let failed: Vec<(Uuid, usize)> = {
            let jobs = self.state.jobs.read().await;
            jobs.failed_actions()
                .into_iter()
                .map(|a| (a.id, a.attempts()))
                .collect()
        };

        for (action_id, attempts) in failed {
            if !self.retry.allows(attempts) {
                tracing::error!(action_id = %action_id, attempts, "Action exceeded retry limit, leaving it failed");
                report.abandoned += 1;
                continue;
            }
            if let Err(e) = self.state.jobs.write().await.mark_restarted(&action_id) {
                tracing::warn!(action_id = %action_id, error = %e, "Could not restart action");
                continue;
            }
            report.restarted += 1;
            tracing::info!(action_id = %action_id, attempts, "Action restarted");

            match self.assign_action(&action_id).await {
                Ok(_) => report.dispatched += 1,
                Err(e) => {
                    tracing::warn!(action_id = %action_id, error = %e, "Restarted action not assigned, retrying next tick");
                    report.deferred += 1;
                }
            }
        }

        if report != AssignmentReport::default() {
            tracing::info!(
                dispatched = report.dispatched,
                deferred = report.deferred,
                failed = report.failed,
                restarted = report.restarted,
                abandoned = report.abandoned,
                "Assignment pass finished"
            );
        }
        report
    }

    /// Fail every running action whose current runner is not alive. Returns
    /// how many were failed.
    async fn fail_orphaned_actions(&self) -> usize {
        let now = Utc::now();
        let orphaned: Vec<(Uuid, Option<String>)> = {
            let jobs = self.state.jobs.read().await;
            let runners = self.state.runners.read().await;
            jobs.running_actions()
                .into_iter()
                .filter(|a| {
                    a.current_runner()
                        .map_or(true, |host| !runners.is_alive_at(host, now))
                })
                .map(|a| (a.id, a.current_runner().map(str::to_string)))
                .collect()
        };

        let mut failed = 0;
        for (action_id, runner) in orphaned {
            // A completion callback may have landed since the scan; the
            // running -> failed edge no longer exists then.
            let action = {
                let mut jobs = self.state.jobs.write().await;
                if let Err(e) = jobs.mark_failed(&action_id) {
                    tracing::debug!(action_id = %action_id, error = %e, "Action changed before it could be failed");
                    continue;
                }
                jobs.get_action(&action_id).cloned()
            };
            failed += 1;
            tracing::warn!(action_id = %action_id, runner = ?runner, "Runner lost, action failed");

            if let Some(action) = action {
                if let Some(host) = &runner {
                    self.state
                        .runners
                        .write()
                        .await
                        .release_workload(host, action.action_type());
                }
                if let ActionKind::Stream(s) = &action.kind {
                    self.state
                        .slots
                        .lock()
                        .await
                        .release_binding(SlotBinding::new(s.stream_id, s.version));
                }
            }
        }
        failed
    }

    /// Place one waiting action on a runner. Returns the runner's hostname.
    ///
    /// The runner is recorded in the action's history before the RPC is sent.
    /// The action only becomes running once the runner accepted it; on error
    /// its status is left unchanged.
    pub async fn assign_action(&self, action_id: &Uuid) -> Result<String> {
        let (action, previous_runner) = {
            let jobs = self.state.jobs.read().await;
            let action = jobs
                .get_action(action_id)
                .cloned()
                .ok_or(FleetError::ActionNotFound(*action_id))?;
            let previous_runner = jobs.get_job(&action.job_id).and_then(|job| {
                let pos = job.position(action_id)?;
                pos.checked_sub(1)
                    .and_then(|p| job.actions[p].current_runner())
                    .map(str::to_string)
            });
            (action, previous_runner)
        };

        if !matches!(
            action.status,
            ActionStatus::Awaiting | ActionStatus::Restarted
        ) {
            return Err(FleetError::InvalidTransition {
                action_id: *action_id,
                from: action.status,
                to: ActionStatus::Running,
            });
        }

        let runner = self.pick_runner(&action, previous_runner.as_deref()).await?;

        let lease = match &action.kind {
            ActionKind::Stream(s) => Some(
                self.state
                    .slots
                    .lock()
                    .await
                    .reserve_and_bind(SlotBinding::new(s.stream_id, s.version))?,
            ),
            _ => None,
        };

        self.state
            .jobs
            .write()
            .await
            .record_assignment(action_id, &runner.hostname)?;

        let dispatched = self.dispatch(&runner, &action, lease.as_ref()).await;
        if let Err(e) = dispatched {
            if let ActionKind::Stream(s) = &action.kind {
                self.state
                    .slots
                    .lock()
                    .await
                    .release_binding(SlotBinding::new(s.stream_id, s.version));
            }
            return Err(e);
        }

        // A completion callback may have landed while the RPC was in flight.
        if let Err(e) = self.state.jobs.write().await.mark_running(action_id) {
            if let ActionKind::Stream(s) = &action.kind {
                self.state
                    .slots
                    .lock()
                    .await
                    .release_binding(SlotBinding::new(s.stream_id, s.version));
            }
            return Err(e);
        }
        self.state
            .runners
            .write()
            .await
            .add_workload(&runner.hostname, action.action_type());

        tracing::info!(
            action_id = %action_id,
            action_type = %action.action_type(),
            runner = %runner.hostname,
            attempt = action.attempts() + 1,
            "Action dispatched"
        );
        Ok(runner.hostname)
    }

    /// Least loaded alive runner. Uploads prefer the runner that holds the
    /// transcoded file while it is alive.
    async fn pick_runner(&self, action: &Action, previous_runner: Option<&str>) -> Result<Runner> {
        let runners = self.state.runners.read().await;
        if let (ActionKind::Upload(_), Some(host)) = (&action.kind, previous_runner) {
            if runners.is_alive(host) {
                if let Some(runner) = runners.get(host) {
                    return Ok(runner.clone());
                }
            }
            tracing::info!(action_id = %action.id, runner = %host, "Transcode runner gone, placing upload elsewhere");
        }
        let alive = runners.list_alive();
        runners
            .pick_least_loaded(&alive, action.action_type())
            .cloned()
    }

    async fn dispatch(
        &self,
        runner: &Runner,
        action: &Action,
        lease: Option<&SlotLease>,
    ) -> Result<()> {
        match &action.kind {
            ActionKind::Stream(s) => {
                let request = StreamRequest {
                    action_id: action.id.to_string(),
                    stream_id: s.stream_id,
                    course_id: s.course_id,
                    version: proto::StreamVersion::from(s.version) as i32,
                    source_address: s.source_address.clone(),
                    end_time_ms: s.end.timestamp_millis(),
                    ingest_url: lease.map(|l| l.ingest_url.clone()).unwrap_or_default(),
                    course_slug: s.course_slug.clone(),
                };
                let job = self.control.request_stream(runner, request).await?;
                tracing::debug!(action_id = %action.id, runner_job = %job, "Stream accepted");
            }
            ActionKind::Transcode(t) => {
                let request = TranscodingRequest {
                    action_id: action.id.to_string(),
                    stream_name: t.stream_name.clone(),
                    course_name: t.course_name.clone(),
                    source_type: proto::StreamVersion::from(t.version) as i32,
                    stream_id: t.stream_id,
                    course_id: t.course_id,
                };
                let job = self.control.request_transcoding(runner, request).await?;
                tracing::debug!(action_id = %action.id, runner_job = %job, "Transcoding accepted");
            }
            // The runner uploads on its own once transcoding is done.
            ActionKind::Upload(_) => {}
        }
        Ok(())
    }
}
