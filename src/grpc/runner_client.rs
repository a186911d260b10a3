use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tonic::transport::{Channel, Endpoint};

use crate::error::{FleetError, Result};
use crate::proto::runner_control_client::RunnerControlClient;
use crate::proto::{DispatchResponse, StreamRequest, TranscodingRequest};
use crate::registry::Runner;

/// Outbound commands to a runner. Returns the runner's id for the accepted work.
#[async_trait]
pub trait RunnerControl: Send + Sync {
    async fn request_stream(&self, runner: &Runner, request: StreamRequest) -> Result<String>;

    async fn request_transcoding(
        &self,
        runner: &Runner,
        request: TranscodingRequest,
    ) -> Result<String>;
}

/// [`RunnerControl`] over gRPC, with one cached connection per runner address.
pub struct GrpcRunnerControl {
    timeout: Duration,
    pool: Mutex<HashMap<String, RunnerControlClient<Channel>>>,
}

impl GrpcRunnerControl {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            pool: Mutex::new(HashMap::new()),
        }
    }

    async fn create_channel(&self, addr: &str) -> Result<Channel> {
        let endpoint = Endpoint::from_shared(format!("http://{}", addr))?
            .connect_timeout(self.timeout)
            .timeout(self.timeout);
        Ok(endpoint.connect().await?)
    }

    /// Get or create a cached client for the runner
    async fn get_client(&self, runner: &Runner) -> Result<RunnerControlClient<Channel>> {
        let addr = runner.address();
        let mut pool = self.pool.lock().await;

        if let Some(client) = pool.get(&addr) {
            return Ok(client.clone());
        }

        let channel = self.create_channel(&addr).await?;
        let client = RunnerControlClient::new(channel);
        pool.insert(addr, client.clone());
        Ok(client)
    }

    /// Forget the cached connection so the next call reconnects.
    async fn evict(&self, runner: &Runner) {
        self.pool.lock().await.remove(&runner.address());
    }

    async fn finish(
        &self,
        runner: &Runner,
        action_id: &str,
        result: std::result::Result<tonic::Response<DispatchResponse>, tonic::Status>,
    ) -> Result<String> {
        let response = match result {
            Ok(response) => response.into_inner(),
            Err(status) => {
                self.evict(runner).await;
                return Err(status.into());
            }
        };
        if !response.accepted {
            return Err(FleetError::Rejected {
                runner: runner.hostname.clone(),
                action_id: action_id.parse().unwrap_or_default(),
                reason: response.reason,
            });
        }
        Ok(response.job_id)
    }
}

#[async_trait]
impl RunnerControl for GrpcRunnerControl {
    async fn request_stream(&self, runner: &Runner, request: StreamRequest) -> Result<String> {
        let mut client = self.get_client(runner).await?;
        let action_id = request.action_id.clone();
        tracing::debug!(runner = %runner.hostname, action_id = %action_id, "RequestStream");
        let result = client.request_stream(request).await;
        self.finish(runner, &action_id, result).await
    }

    async fn request_transcoding(
        &self,
        runner: &Runner,
        request: TranscodingRequest,
    ) -> Result<String> {
        let mut client = self.get_client(runner).await?;
        let action_id = request.action_id.clone();
        tracing::debug!(runner = %runner.hostname, action_id = %action_id, "RequestTranscoding");
        let result = client.request_transcoding(request).await;
        self.finish(runner, &action_id, result).await
    }
}
