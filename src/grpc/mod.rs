pub mod callback_service;
pub mod runner_client;
pub mod server;

pub use callback_service::RunnerCallbackService;
pub use runner_client::{GrpcRunnerControl, RunnerControl};
pub use server::GrpcServer;

use crate::proto;
use crate::scheduler::job::{ActionType, StreamVersion};

impl From<StreamVersion> for proto::StreamVersion {
    fn from(version: StreamVersion) -> Self {
        match version {
            StreamVersion::Comb => proto::StreamVersion::Comb,
            StreamVersion::Pres => proto::StreamVersion::Pres,
            StreamVersion::Cam => proto::StreamVersion::Cam,
        }
    }
}

impl From<ActionType> for proto::ActionType {
    fn from(action_type: ActionType) -> Self {
        match action_type {
            ActionType::Stream => proto::ActionType::Stream,
            ActionType::Transcode => proto::ActionType::Transcode,
            ActionType::Upload => proto::ActionType::Upload,
        }
    }
}

/// Decode a wire version. `None` for unspecified or unknown values.
pub fn version_from_proto(value: i32) -> Option<StreamVersion> {
    match proto::StreamVersion::try_from(value).ok()? {
        proto::StreamVersion::Comb => Some(StreamVersion::Comb),
        proto::StreamVersion::Pres => Some(StreamVersion::Pres),
        proto::StreamVersion::Cam => Some(StreamVersion::Cam),
        proto::StreamVersion::Unspecified => None,
    }
}

/// Decode a wire action type. `None` for unspecified or unknown values.
pub fn action_type_from_proto(value: i32) -> Option<ActionType> {
    match proto::ActionType::try_from(value).ok()? {
        proto::ActionType::Stream => Some(ActionType::Stream),
        proto::ActionType::Transcode => Some(ActionType::Transcode),
        proto::ActionType::Upload => Some(ActionType::Upload),
        proto::ActionType::Unspecified => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_round_trips_through_wire_value() {
        for version in [StreamVersion::Comb, StreamVersion::Pres, StreamVersion::Cam] {
            let wire = proto::StreamVersion::from(version) as i32;
            assert_eq!(version_from_proto(wire), Some(version));
        }
    }

    #[test]
    fn unspecified_and_unknown_values_decode_to_none() {
        assert_eq!(version_from_proto(0), None);
        assert_eq!(version_from_proto(42), None);
        assert_eq!(action_type_from_proto(0), None);
        assert_eq!(action_type_from_proto(-1), None);
        assert_eq!(
            action_type_from_proto(proto::ActionType::Upload as i32),
            Some(ActionType::Upload)
        );
    }
}
