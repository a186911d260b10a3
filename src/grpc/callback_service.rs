use tonic::{Request, Response, Status};
use uuid::Uuid;

use crate::catalog::Collaborators;
use crate::error::FleetError;
use crate::grpc::{action_type_from_proto, version_from_proto};
use crate::ingest::SlotBinding;
use crate::proto::runner_callback_server::RunnerCallback;
use crate::proto::{
    ActionFinishedRequest, Ack, HeartbeatRequest, HeartbeatResponse, RegisterRequest,
    RegisterResponse, StreamEndRequest, StreamStartedRequest,
};
use crate::registry::Telemetry;
use crate::scheduler::job::{ActionKind, ActionStatus};
use crate::state::FleetState;

/// gRPC service runners call back into
pub struct RunnerCallbackService {
    state: FleetState,
    catalog: Collaborators,
}

impl RunnerCallbackService {
    pub fn new(state: FleetState, catalog: Collaborators) -> Self {
        Self { state, catalog }
    }
}

fn parse_action_id(raw: &str) -> Result<Uuid, Status> {
    Uuid::parse_str(raw).map_err(|_| Status::invalid_argument(format!("Invalid action id: {raw}")))
}

fn ack() -> Response<Ack> {
    Response::new(Ack { ok: true })
}

impl From<crate::proto::Telemetry> for Telemetry {
    fn from(t: crate::proto::Telemetry) -> Self {
        Self {
            cpu_percent: t.cpu_percent,
            memory_used_bytes: t.memory_used_bytes,
            disk_free_bytes: t.disk_free_bytes,
            uptime_secs: t.uptime_secs,
            version: t.version,
        }
    }
}

#[tonic::async_trait]
impl RunnerCallback for RunnerCallbackService {
    async fn register(
        &self,
        request: Request<RegisterRequest>,
    ) -> Result<Response<RegisterResponse>, Status> {
        let req = request.into_inner();
        let runner_id = self
            .state
            .runners
            .write()
            .await
            .register(&req.hostname, req.port)?;

        Ok(Response::new(RegisterResponse {
            runner_id: runner_id.to_string(),
        }))
    }

    async fn heartbeat(
        &self,
        request: Request<HeartbeatRequest>,
    ) -> Result<Response<HeartbeatResponse>, Status> {
        let req = request.into_inner();
        let telemetry = req.telemetry.map(Telemetry::from).unwrap_or_default();
        self.state
            .runners
            .write()
            .await
            .heartbeat(&req.hostname, telemetry, req.workload)?;

        Ok(Response::new(HeartbeatResponse { ok: true }))
    }

    async fn notify_stream_started(
        &self,
        request: Request<StreamStartedRequest>,
    ) -> Result<Response<Ack>, Status> {
        let req = request.into_inner();
        let version = version_from_proto(req.version)
            .ok_or_else(|| Status::invalid_argument("Stream version is required"))?;
        let stream = self.catalog.streams.get_by_id(req.stream_id).await?;

        // The slot is normally bound at dispatch; this covers streams started
        // before a scheduler restart lost the binding. Starts for streams
        // whose capture already finished must not claim a slot again.
        let lease = {
            let jobs = self.state.jobs.read().await;
            let active = jobs
                .stream_action(stream.id, version)
                .is_some_and(|a| !a.is_completed());
            if !active || stream.ended {
                tracing::info!(stream_id = stream.id, version = %version, runner = %req.hostname, ended = stream.ended, "Ignoring start of stream with no active capture");
                return Ok(ack());
            }
            self.state
                .slots
                .lock()
                .await
                .reserve_and_bind(SlotBinding::new(stream.id, version))
        };
        let lease = match lease {
            Ok(lease) => Some(lease),
            Err(e) => {
                tracing::warn!(stream_id = stream.id, version = %version, error = %e, "No ingest slot for started stream");
                None
            }
        };

        let playlist_url = if req.hls_url.is_empty() {
            lease.map(|l| l.playlist_url)
        } else {
            Some(req.hls_url)
        };
        self.catalog
            .streams
            .save_live_state(stream.id, version, playlist_url, true)
            .await?;

        tracing::info!(stream_id = stream.id, version = %version, runner = %req.hostname, "Stream is live");

        let catalog = self.catalog.clone();
        tokio::spawn(async move {
            match catalog.halls.get_by_id(stream.lecture_hall_id).await {
                Ok(hall) => {
                    if let Err(e) = catalog.hall_control.stream_started(&hall, &stream).await {
                        tracing::warn!(stream_id = stream.id, error = %e, "Lecture hall switching failed");
                    }
                }
                Err(e) => {
                    tracing::warn!(stream_id = stream.id, error = %e, "Lecture hall lookup failed")
                }
            }
            if let Err(e) = catalog.silences.clear_stale_silences(stream.id).await {
                tracing::warn!(stream_id = stream.id, error = %e, "Silence cleanup failed");
            }
        });

        Ok(ack())
    }

    async fn notify_stream_end(
        &self,
        request: Request<StreamEndRequest>,
    ) -> Result<Response<Ack>, Status> {
        let action_id = parse_action_id(&request.into_inner().action_id)?;
        let action = self
            .state
            .jobs
            .read()
            .await
            .get_action(&action_id)
            .cloned()
            .ok_or(FleetError::ActionNotFound(action_id))?;

        let ActionKind::Stream(stream) = &action.kind else {
            return Err(Status::invalid_argument(format!(
                "Action {action_id} is a {} action, not a stream",
                action.action_type()
            )));
        };

        self.state
            .slots
            .lock()
            .await
            .release_binding(SlotBinding::new(stream.stream_id, stream.version));
        self.catalog
            .streams
            .save_live_state(stream.stream_id, stream.version, None, false)
            .await?;
        self.catalog.streams.set_ended(stream.stream_id, true).await?;

        tracing::info!(action_id = %action_id, stream_id = stream.stream_id, version = %stream.version, "Stream ended");
        Ok(ack())
    }

    async fn notify_action_finished(
        &self,
        request: Request<ActionFinishedRequest>,
    ) -> Result<Response<Ack>, Status> {
        let req = request.into_inner();
        let action_id = parse_action_id(&req.action_id)?;

        let mut jobs = self.state.jobs.write().await;
        let action = jobs
            .get_action(&action_id)
            .cloned()
            .ok_or(FleetError::ActionNotFound(action_id))?;

        if action.is_completed() {
            tracing::debug!(action_id = %action_id, runner = %req.hostname, "Duplicate completion ignored");
            return Ok(ack());
        }
        if let Some(reported) = action_type_from_proto(req.action_type) {
            if reported != action.action_type() {
                return Err(Status::invalid_argument(format!(
                    "Action {action_id} is a {} action, runner reported {reported}",
                    action.action_type()
                )));
            }
        }

        let current = action.current_runner().map(str::to_string);
        let was_running = action.status == ActionStatus::Running;

        if req.success {
            if action.status == ActionStatus::Awaiting {
                // The dispatch RPC failed on our side but the runner may
                // still have done the work.
                if current.as_deref() != Some(req.hostname.as_str()) {
                    tracing::info!(action_id = %action_id, runner = %req.hostname, "Ignoring success for action never sent to this runner");
                    return Ok(ack());
                }
                jobs.mark_running(&action_id)?;
            }
            jobs.mark_completed(&action_id)?;
            drop(jobs);
            tracing::info!(action_id = %action_id, action_type = %action.action_type(), runner = %req.hostname, "Action completed");
        } else {
            if !was_running || current.as_deref() != Some(req.hostname.as_str()) {
                tracing::info!(action_id = %action_id, runner = %req.hostname, status = %action.status, "Ignoring failure from runner that no longer owns the action");
                return Ok(ack());
            }
            jobs.mark_failed(&action_id)?;
            drop(jobs);
            tracing::warn!(action_id = %action_id, runner = %req.hostname, error = %req.error, "Action failed on runner");
        }

        // Failed and restarted actions already gave their weight back.
        if was_running {
            if let Some(host) = &current {
                self.state
                    .runners
                    .write()
                    .await
                    .release_workload(host, action.action_type());
            }
        }
        if let ActionKind::Stream(stream) = &action.kind {
            self.state
                .slots
                .lock()
                .await
                .release_binding(SlotBinding::new(stream.stream_id, stream.version));
        }

        Ok(ack())
    }
}
