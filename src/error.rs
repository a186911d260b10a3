use thiserror::Error;
use tonic::Status;
use uuid::Uuid;

use crate::scheduler::job::ActionStatus;

#[derive(Error, Debug)]
pub enum FleetError {
    #[error("Invalid runner address: {0}")]
    InvalidAddress(String),

    #[error("Runner not found: {0}")]
    RunnerNotFound(String),

    #[error("No alive runner available")]
    NoCapacity,

    #[error("No ingest endpoint configured")]
    NoEndpoint,

    #[error("Ingest endpoint not found: {0}")]
    EndpointNotFound(String),

    #[error("No free slot on endpoint {endpoint} (transcode: {needs_transcode})")]
    NoFreeSlot {
        endpoint: String,
        needs_transcode: bool,
    },

    #[error("Slot {slot} on endpoint {endpoint} is already bound")]
    SlotAlreadyBound { endpoint: String, slot: String },

    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    #[error("Action not found: {0}")]
    ActionNotFound(Uuid),

    #[error("Job {0} has no pending action")]
    Exhausted(Uuid),

    #[error("Action {action_id} cannot move from {from} to {to}")]
    InvalidTransition {
        action_id: Uuid,
        from: ActionStatus,
        to: ActionStatus,
    },

    #[error("Runner {runner} rejected action {action_id}: {reason}")]
    Rejected {
        runner: String,
        action_id: Uuid,
        reason: String,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Collaborator error: {0}")]
    Collaborator(String),

    #[error("gRPC error: {0}")]
    GrpcError(#[from] tonic::Status),

    #[error("Transport error: {0}")]
    TransportError(#[from] tonic::transport::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, FleetError>;

impl From<FleetError> for Status {
    fn from(err: FleetError) -> Self {
        let message = err.to_string();
        match err {
            FleetError::InvalidAddress(_) | FleetError::InvalidTransition { .. } => {
                Status::invalid_argument(message)
            }
            FleetError::RunnerNotFound(_)
            | FleetError::EndpointNotFound(_)
            | FleetError::JobNotFound(_)
            | FleetError::ActionNotFound(_) => Status::not_found(message),
            FleetError::NoFreeSlot { .. } | FleetError::NoCapacity | FleetError::NoEndpoint => {
                Status::resource_exhausted(message)
            }
            FleetError::SlotAlreadyBound { .. } | FleetError::Exhausted(_) => {
                Status::failed_precondition(message)
            }
            FleetError::GrpcError(status) => status,
            FleetError::TransportError(_) | FleetError::Rejected { .. } => {
                Status::unavailable(message)
            }
            FleetError::Collaborator(_)
            | FleetError::InvalidConfig(_)
            | FleetError::Io(_)
            | FleetError::Serde(_)
            | FleetError::Internal(_) => Status::internal(message),
        }
    }
}
