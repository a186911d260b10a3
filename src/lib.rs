pub mod catalog;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod grpc;
pub mod ingest;
pub mod node;
pub mod persist;
pub mod registry;
pub mod scheduler;
pub mod seed;
pub mod shutdown;
pub mod state;

// Re-export generated protobuf types
pub mod proto {
    tonic::include_proto!("fleet");
}
