use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;

use crate::catalog::Collaborators;
use crate::grpc::callback_service::RunnerCallbackService;
use crate::proto::runner_callback_server::RunnerCallbackServer;
use crate::state::FleetState;

/// Hosts the runner callback service.
pub struct GrpcServer {
    addr: SocketAddr,
    state: FleetState,
    catalog: Collaborators,
}

impl GrpcServer {
    pub fn new(addr: SocketAddr, state: FleetState, catalog: Collaborators) -> Self {
        Self {
            addr,
            state,
            catalog,
        }
    }

    fn service(&self) -> RunnerCallbackServer<RunnerCallbackService> {
        RunnerCallbackServer::new(RunnerCallbackService::new(
            self.state.clone(),
            self.catalog.clone(),
        ))
    }

    /// Serve on the configured address until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), tonic::transport::Error> {
        tracing::info!(addr = %self.addr, "Starting gRPC server");

        Server::builder()
            .add_service(self.service())
            .serve_with_shutdown(self.addr, shutdown.cancelled_owned())
            .await
    }

    /// Serve on an already bound listener. Used when the port is picked by
    /// the OS, as in tests.
    pub async fn run_with_listener(
        self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<(), tonic::transport::Error> {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(addr = %addr, "Starting gRPC server");
        }

        Server::builder()
            .add_service(self.service())
            .serve_with_incoming_shutdown(
                TcpListenerStream::new(listener),
                shutdown.cancelled_owned(),
            )
            .await
    }
}
