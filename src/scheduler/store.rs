use std::collections::HashMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{FleetError, Result};
use crate::scheduler::job::{Action, ActionKind, ActionStatus, Job, StreamVersion};

/// Jobs and their actions, keyed for lookup by either id.
#[derive(Debug, Default)]
pub struct JobStore {
    jobs: HashMap<Uuid, Job>,
    /// action id -> owning job id
    action_index: HashMap<Uuid, Uuid>,
    next_seq: u64,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from persisted jobs.
    pub fn from_jobs(jobs: Vec<Job>) -> Self {
        let mut store = Self::new();
        for job in jobs {
            store.next_seq = store.next_seq.max(job.seq + 1);
            for action in &job.actions {
                store.action_index.insert(action.id, job.id);
            }
            store.jobs.insert(job.id, job);
        }
        store
    }

    /// Persist a new job for one (stream, version) pipeline, all actions awaiting.
    pub fn create_job(
        &mut self,
        stream_id: u64,
        version: StreamVersion,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        kinds: Vec<ActionKind>,
    ) -> &Job {
        let job = Job::new(self.next_seq, stream_id, version, start, end, kinds);
        self.next_seq += 1;
        for action in &job.actions {
            self.action_index.insert(action.id, job.id);
        }
        let id = job.id;
        tracing::debug!(job_id = %id, stream_id, version = %version, "Job created");
        self.jobs.entry(id).or_insert(job)
    }

    pub fn get_job(&self, id: &Uuid) -> Option<&Job> {
        self.jobs.get(id)
    }

    pub fn get_action(&self, id: &Uuid) -> Option<&Action> {
        let job_id = self.action_index.get(id)?;
        self.jobs
            .get(job_id)
            .and_then(|job| job.actions.iter().find(|a| a.id == *id))
    }

    fn action_mut(&mut self, id: &Uuid) -> Result<&mut Action> {
        let job_id = self
            .action_index
            .get(id)
            .ok_or(FleetError::ActionNotFound(*id))?;
        self.jobs
            .get_mut(job_id)
            .and_then(|job| job.actions.iter_mut().find(|a| a.id == *id))
            .ok_or(FleetError::ActionNotFound(*id))
    }

    /// Whether discovery already produced a job for this stream and version.
    pub fn has_job(&self, stream_id: u64, version: StreamVersion) -> bool {
        self.jobs
            .values()
            .any(|j| j.stream_id == stream_id && j.version == version)
    }

    /// Stream action of the job for this stream and version.
    pub fn stream_action(&self, stream_id: u64, version: StreamVersion) -> Option<&Action> {
        self.jobs
            .values()
            .find(|j| j.stream_id == stream_id && j.version == version)
            .and_then(|j| {
                j.actions
                    .iter()
                    .find(|a| matches!(a.kind, ActionKind::Stream(_)))
            })
    }

    /// All jobs in creation order.
    pub fn all_jobs(&self) -> Vec<&Job> {
        let mut jobs: Vec<&Job> = self.jobs.values().collect();
        jobs.sort_by_key(|j| j.seq);
        jobs
    }

    /// Jobs that still have work left, in creation order.
    pub fn open_jobs(&self) -> Vec<&Job> {
        let mut jobs: Vec<&Job> = self.jobs.values().filter(|j| !j.completed).collect();
        jobs.sort_by_key(|j| j.seq);
        jobs
    }

    /// Head of the job's remaining actions.
    pub fn next_action(&self, job_id: &Uuid) -> Result<&Action> {
        let job = self
            .jobs
            .get(job_id)
            .ok_or(FleetError::JobNotFound(*job_id))?;
        job.next_action().ok_or(FleetError::Exhausted(*job_id))
    }

    pub fn running_actions(&self) -> Vec<&Action> {
        self.actions_with_status(ActionStatus::Running)
    }

    pub fn failed_actions(&self) -> Vec<&Action> {
        self.actions_with_status(ActionStatus::Failed)
    }

    fn actions_with_status(&self, status: ActionStatus) -> Vec<&Action> {
        self.all_jobs()
            .into_iter()
            .flat_map(|j| j.actions.iter())
            .filter(|a| a.status == status)
            .collect()
    }

    /// Append a runner to the action's assignment history.
    pub fn record_assignment(&mut self, action_id: &Uuid, hostname: &str) -> Result<()> {
        let action = self.action_mut(action_id)?;
        action.runners.push(hostname.to_string());
        action.updated_at = Utc::now();
        Ok(())
    }

    pub fn mark_running(&mut self, action_id: &Uuid) -> Result<()> {
        let action = self.action_mut(action_id)?;
        if action.runners.is_empty() {
            return Err(FleetError::Internal(format!(
                "action {action_id} has no assigned runner"
            )));
        }
        action.transition(ActionStatus::Running)
    }

    /// Complete an action. Returns `false` when it was already completed.
    ///
    /// Completing the last action of a job completes the job.
    pub fn mark_completed(&mut self, action_id: &Uuid) -> Result<bool> {
        let action = self.action_mut(action_id)?;
        if action.is_completed() {
            return Ok(false);
        }
        action.transition(ActionStatus::Completed)?;
        let job_id = action.job_id;

        if let Some(job) = self.jobs.get_mut(&job_id) {
            if job.all_completed() {
                job.completed = true;
                job.completed_at = Some(Utc::now());
                tracing::info!(job_id = %job_id, stream_id = job.stream_id, version = %job.version, "Job completed");
            }
        }
        Ok(true)
    }

    pub fn mark_failed(&mut self, action_id: &Uuid) -> Result<()> {
        self.action_mut(action_id)?.transition(ActionStatus::Failed)
    }

    pub fn mark_restarted(&mut self, action_id: &Uuid) -> Result<()> {
        self.action_mut(action_id)?.transition(ActionStatus::Restarted)
    }

    /// Drop completed jobs finished before `older_than`. Returns how many were removed.
    pub fn cleanup_completed(&mut self, older_than: DateTime<Utc>) -> usize {
        let stale: Vec<Uuid> = self
            .jobs
            .values()
            .filter(|j| j.completed && j.completed_at.is_some_and(|t| t < older_than))
            .map(|j| j.id)
            .collect();
        for id in &stale {
            if let Some(job) = self.jobs.remove(id) {
                for action in &job.actions {
                    self.action_index.remove(&action.id);
                }
            }
        }
        stale.len()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::job::UploadAction;

    fn uploads(n: usize) -> Vec<ActionKind> {
        (0..n)
            .map(|_| {
                ActionKind::Upload(UploadAction {
                    stream_id: 1,
                    course_id: 1,
                    version: StreamVersion::Cam,
                })
            })
            .collect()
    }

    fn store_with_job(n: usize) -> (JobStore, Uuid, Vec<Uuid>) {
        let mut store = JobStore::new();
        let now = Utc::now();
        let job = store.create_job(1, StreamVersion::Cam, now, now, uploads(n));
        let job_id = job.id;
        let ids = job.actions.iter().map(|a| a.id).collect();
        (store, job_id, ids)
    }

    #[test]
    fn create_job_starts_awaiting() {
        let (store, job_id, ids) = store_with_job(3);
        let job = store.get_job(&job_id).unwrap();
        assert!(!job.completed);
        assert_eq!(ids.len(), 3);
        assert!(job
            .actions
            .iter()
            .all(|a| a.status == ActionStatus::Awaiting && a.runners.is_empty()));
        assert!(store.has_job(1, StreamVersion::Cam));
        assert!(!store.has_job(1, StreamVersion::Pres));
    }

    #[test]
    fn stream_action_lookup() {
        let (mut store, _, _) = store_with_job(2);
        assert!(store.stream_action(1, StreamVersion::Cam).is_none());

        let now = Utc::now();
        let job = store.create_job(
            2,
            StreamVersion::Pres,
            now,
            now,
            vec![ActionKind::Stream(crate::scheduler::job::StreamAction {
                stream_id: 2,
                course_id: 1,
                course_slug: "algo".into(),
                version: StreamVersion::Pres,
                source_address: "10.0.0.5".into(),
                end: now,
            })],
        );
        let id = job.actions[0].id;
        assert_eq!(store.stream_action(2, StreamVersion::Pres).map(|a| a.id), Some(id));
        assert!(store.stream_action(2, StreamVersion::Cam).is_none());
    }

    #[test]
    fn open_jobs_in_creation_order() {
        let mut store = JobStore::new();
        let now = Utc::now();
        let a = store.create_job(1, StreamVersion::Pres, now, now, uploads(1)).id;
        let b = store.create_job(2, StreamVersion::Pres, now, now, uploads(1)).id;
        let c = store.create_job(3, StreamVersion::Pres, now, now, uploads(1)).id;
        let ids: Vec<Uuid> = store.open_jobs().iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![a, b, c]);
    }

    #[test]
    fn next_action_exhausted_when_all_completed() {
        let (mut store, job_id, ids) = store_with_job(1);
        store.record_assignment(&ids[0], "cap-01").unwrap();
        store.mark_running(&ids[0]).unwrap();
        assert!(store.mark_completed(&ids[0]).unwrap());

        assert!(matches!(
            store.next_action(&job_id),
            Err(FleetError::Exhausted(id)) if id == job_id
        ));
        assert!(store.get_job(&job_id).unwrap().completed);
        assert!(store.open_jobs().is_empty());
    }

    #[test]
    fn next_action_on_empty_job_is_exhausted() {
        let (store, job_id, _) = store_with_job(0);
        assert!(matches!(
            store.next_action(&job_id),
            Err(FleetError::Exhausted(_))
        ));
    }

    #[test]
    fn mark_running_requires_assignment() {
        let (mut store, _, ids) = store_with_job(1);
        assert!(store.mark_running(&ids[0]).is_err());
        store.record_assignment(&ids[0], "cap-01").unwrap();
        store.mark_running(&ids[0]).unwrap();
        assert_eq!(store.running_actions().len(), 1);
        assert_eq!(
            store.get_action(&ids[0]).unwrap().current_runner(),
            Some("cap-01")
        );
    }

    #[test]
    fn mark_completed_twice_is_noop() {
        let (mut store, _, ids) = store_with_job(2);
        store.record_assignment(&ids[0], "cap-01").unwrap();
        store.mark_running(&ids[0]).unwrap();
        assert!(store.mark_completed(&ids[0]).unwrap());
        assert!(!store.mark_completed(&ids[0]).unwrap());
    }

    #[test]
    fn failed_then_restarted() {
        let (mut store, _, ids) = store_with_job(1);
        store.record_assignment(&ids[0], "cap-01").unwrap();
        store.mark_running(&ids[0]).unwrap();
        store.mark_failed(&ids[0]).unwrap();
        assert_eq!(store.failed_actions().len(), 1);

        store.mark_restarted(&ids[0]).unwrap();
        assert!(store.failed_actions().is_empty());
        assert_eq!(
            store.get_action(&ids[0]).unwrap().status,
            ActionStatus::Restarted
        );
    }

    #[test]
    fn unknown_action_is_not_found() {
        let mut store = JobStore::new();
        let id = Uuid::new_v4();
        assert!(matches!(
            store.mark_failed(&id),
            Err(FleetError::ActionNotFound(missing)) if missing == id
        ));
    }

    #[test]
    fn cleanup_removes_only_old_completed_jobs() {
        let (mut store, job_id, ids) = store_with_job(1);
        let now = Utc::now();
        store.create_job(2, StreamVersion::Pres, now, now, uploads(1));

        store.record_assignment(&ids[0], "cap-01").unwrap();
        store.mark_running(&ids[0]).unwrap();
        store.mark_completed(&ids[0]).unwrap();

        assert_eq!(store.cleanup_completed(now - chrono::Duration::hours(1)), 0);
        assert_eq!(
            store.cleanup_completed(Utc::now() + chrono::Duration::seconds(1)),
            1
        );
        assert!(store.get_job(&job_id).is_none());
        assert!(store.get_action(&ids[0]).is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn from_jobs_keeps_sequence_ahead() {
        let (store, _, ids) = store_with_job(2);
        let jobs: Vec<Job> = store.all_jobs().into_iter().cloned().collect();
        let mut restored = JobStore::from_jobs(jobs);
        assert!(restored.get_action(&ids[1]).is_some());

        let now = Utc::now();
        let seq = restored
            .create_job(9, StreamVersion::Comb, now, now, uploads(1))
            .seq;
        assert_eq!(seq, 1);
    }
}
