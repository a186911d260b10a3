use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{FleetError, Result};

/// Camera/source combination an action's output corresponds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StreamVersion {
    /// Presentation and camera composed into one picture.
    Comb,
    /// Presentation (slides) only.
    Pres,
    /// Camera only.
    Cam,
}

impl StreamVersion {
    /// COMB output is composed on the ingest side, so it needs a slot that
    /// supports transcoding.
    pub fn needs_transcode(self) -> bool {
        matches!(self, StreamVersion::Comb)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StreamVersion::Comb => "COMB",
            StreamVersion::Pres => "PRES",
            StreamVersion::Cam => "CAM",
        }
    }
}

impl std::fmt::Display for StreamVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Awaiting,
    Running,
    Completed,
    Failed,
    Restarted,
}

impl ActionStatus {
    /// Legal edges of the action state machine.
    ///
    /// A late success report may complete an action that was already failed or
    /// restarted: the work did happen, and redoing it buys nothing.
    pub fn can_transition_to(self, next: ActionStatus) -> bool {
        use ActionStatus::*;
        matches!(
            (self, next),
            (Awaiting, Running)
                | (Restarted, Running)
                | (Running, Completed)
                | (Failed, Completed)
                | (Restarted, Completed)
                | (Running, Failed)
                | (Failed, Restarted)
        )
    }
}

impl std::fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionStatus::Awaiting => write!(f, "awaiting"),
            ActionStatus::Running => write!(f, "running"),
            ActionStatus::Completed => write!(f, "completed"),
            ActionStatus::Failed => write!(f, "failed"),
            ActionStatus::Restarted => write!(f, "restarted"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    Stream,
    Transcode,
    Upload,
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionType::Stream => write!(f, "stream"),
            ActionType::Transcode => write!(f, "transcode"),
            ActionType::Upload => write!(f, "upload"),
        }
    }
}

/// Capture a live source until the lecture ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamAction {
    pub stream_id: u64,
    pub course_id: u64,
    pub course_slug: String,
    pub version: StreamVersion,
    pub source_address: String,
    pub end: DateTime<Utc>,
}

/// Transcode the recording produced by the preceding stream action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscodeAction {
    pub stream_id: u64,
    pub course_id: u64,
    pub stream_name: String,
    pub course_name: String,
    pub version: StreamVersion,
}

/// Upload the transcoded file. Runs where the transcode ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadAction {
    pub stream_id: u64,
    pub course_id: u64,
    pub version: StreamVersion,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ActionKind {
    Stream(StreamAction),
    Transcode(TranscodeAction),
    Upload(UploadAction),
}

impl ActionKind {
    pub fn action_type(&self) -> ActionType {
        match self {
            ActionKind::Stream(_) => ActionType::Stream,
            ActionKind::Transcode(_) => ActionType::Transcode,
            ActionKind::Upload(_) => ActionType::Upload,
        }
    }

    pub fn stream_id(&self) -> u64 {
        match self {
            ActionKind::Stream(a) => a.stream_id,
            ActionKind::Transcode(a) => a.stream_id,
            ActionKind::Upload(a) => a.stream_id,
        }
    }

    pub fn version(&self) -> StreamVersion {
        match self {
            ActionKind::Stream(a) => a.version,
            ActionKind::Transcode(a) => a.version,
            ActionKind::Upload(a) => a.version,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub id: Uuid,
    pub job_id: Uuid,
    pub kind: ActionKind,
    pub status: ActionStatus,
    /// Hostnames of every runner this action was handed to, oldest first.
    pub runners: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Action {
    pub fn new(job_id: Uuid, kind: ActionKind) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            job_id,
            kind,
            status: ActionStatus::Awaiting,
            runners: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn action_type(&self) -> ActionType {
        self.kind.action_type()
    }

    pub fn current_runner(&self) -> Option<&str> {
        self.runners.last().map(String::as_str)
    }

    /// Number of assignments so far, including the current one.
    pub fn attempts(&self) -> usize {
        self.runners.len()
    }

    pub fn is_completed(&self) -> bool {
        self.status == ActionStatus::Completed
    }

    /// Move along one edge of the state machine.
    pub fn transition(&mut self, to: ActionStatus) -> Result<()> {
        if !self.status.can_transition_to(to) {
            return Err(FleetError::InvalidTransition {
                action_id: self.id,
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// One (stream, version) pipeline: stream, then transcode, then upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    /// Creation order; open jobs are swept in this order.
    pub seq: u64,
    pub stream_id: u64,
    pub version: StreamVersion,
    pub actions: Vec<Action>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(
        seq: u64,
        stream_id: u64,
        version: StreamVersion,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        kinds: Vec<ActionKind>,
    ) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            seq,
            stream_id,
            version,
            actions: kinds.into_iter().map(|k| Action::new(id, k)).collect(),
            start,
            end,
            completed: false,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Head of the remaining list: the first action that is not completed.
    pub fn next_action(&self) -> Option<&Action> {
        self.actions.iter().find(|a| !a.is_completed())
    }

    /// Position of an action in this job's list.
    pub fn position(&self, action_id: &Uuid) -> Option<usize> {
        self.actions.iter().position(|a| a.id == *action_id)
    }

    pub fn all_completed(&self) -> bool {
        self.actions.iter().all(Action::is_completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload(stream_id: u64) -> ActionKind {
        ActionKind::Upload(UploadAction {
            stream_id,
            course_id: 7,
            version: StreamVersion::Pres,
        })
    }

    #[test]
    fn state_machine_edges() {
        use ActionStatus::*;
        assert!(Awaiting.can_transition_to(Running));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Restarted));
        assert!(Restarted.can_transition_to(Running));

        assert!(!Awaiting.can_transition_to(Completed));
        assert!(!Awaiting.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Running));
        assert!(!Completed.can_transition_to(Running));
        assert!(!Completed.can_transition_to(Failed));
    }

    #[test]
    fn transition_rejects_illegal_edge() {
        let mut action = Action::new(Uuid::new_v4(), upload(1));
        let err = action.transition(ActionStatus::Failed).unwrap_err();
        assert!(matches!(
            err,
            FleetError::InvalidTransition {
                from: ActionStatus::Awaiting,
                to: ActionStatus::Failed,
                ..
            }
        ));
        assert_eq!(action.status, ActionStatus::Awaiting);
    }

    #[test]
    fn next_action_skips_completed_prefix() {
        let now = Utc::now();
        let mut job = Job::new(0, 1, StreamVersion::Pres, now, now, vec![upload(1), upload(1)]);
        let first = job.actions[0].id;
        let second = job.actions[1].id;
        assert_eq!(job.next_action().map(|a| a.id), Some(first));

        job.actions[0].status = ActionStatus::Completed;
        assert_eq!(job.next_action().map(|a| a.id), Some(second));

        job.actions[1].status = ActionStatus::Completed;
        assert!(job.next_action().is_none());
        assert!(job.all_completed());
    }

    #[test]
    fn action_kind_serializes_with_type_tag() {
        let json = serde_json::to_value(upload(3)).unwrap();
        assert_eq!(json["type"], "upload");
        assert_eq!(json["stream_id"], 3);
        assert_eq!(json["version"], "PRES");
    }

    #[test]
    fn only_comb_needs_transcode() {
        assert!(StreamVersion::Comb.needs_transcode());
        assert!(!StreamVersion::Pres.needs_transcode());
        assert!(!StreamVersion::Cam.needs_transcode());
        assert_eq!(StreamVersion::Cam.to_string(), "CAM");
    }
}
