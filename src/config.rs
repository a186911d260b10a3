use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::scheduler::job::ActionType;

/// Workload added to a runner per assigned action, by action type.
///
/// The counter is an advisory load hint used to pick the least loaded runner,
/// not a capacity limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkloadWeights {
    pub stream: u32,
    pub transcode: u32,
    pub upload: u32,
}

impl Default for WorkloadWeights {
    fn default() -> Self {
        Self {
            stream: 2,
            transcode: 1,
            upload: 1,
        }
    }
}

impl WorkloadWeights {
    pub fn weight(&self, action_type: ActionType) -> u32 {
        match action_type {
            ActionType::Stream => self.stream,
            ActionType::Transcode => self.transcode,
            ActionType::Upload => self.upload,
        }
    }
}

/// What happens to an action after its runner died.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryPolicy {
    /// Maximum number of runner assignments per action. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    pub fn unbounded() -> Self {
        Self { max_attempts: None }
    }

    /// Whether an action that has already been assigned `attempts` times may
    /// be assigned once more.
    pub fn allows(&self, attempts: usize) -> bool {
        match self.max_attempts {
            Some(max) => attempts < max as usize,
            None => true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Address of the runner callback gRPC service.
    pub listen_addr: SocketAddr,
    /// Address of the read-only status API. Disabled when `None`.
    pub dashboard_addr: Option<SocketAddr>,
    /// Period of the stream discovery pass.
    pub discovery_interval: Duration,
    /// Period of the assignment and reconciliation pass.
    pub assignment_interval: Duration,
    /// A runner whose last heartbeat is older than this is dead.
    pub liveness_window: Duration,
    /// Connect and request timeout for calls to runners.
    pub rpc_timeout: Duration,
    pub weights: WorkloadWeights,
    pub retry: RetryPolicy,
    /// JSON file with ingest endpoints and the catalog to serve from.
    pub seed_path: Option<PathBuf>,
    /// Snapshot file for runners, endpoints and jobs. Persistence is off when `None`.
    pub state_path: Option<PathBuf>,
    pub snapshot_interval: Duration,
    /// Completed jobs older than this are dropped from the store.
    pub job_retention: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            // SAFETY: This is a hardcoded valid address that will always parse
            listen_addr: "127.0.0.1:50051"
                .parse()
                .expect("default listen address is valid"),
            dashboard_addr: None,
            discovery_interval: Duration::from_secs(120),
            assignment_interval: Duration::from_secs(15),
            liveness_window: Duration::from_secs(6 * 60),
            rpc_timeout: Duration::from_secs(10),
            weights: WorkloadWeights::default(),
            retry: RetryPolicy::unbounded(),
            seed_path: None,
            state_path: None,
            snapshot_interval: Duration::from_secs(30),
            job_retention: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl SchedulerConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Default::default()
        }
    }

    pub fn with_dashboard(mut self, addr: SocketAddr) -> Self {
        self.dashboard_addr = Some(addr);
        self
    }

    pub fn with_intervals(mut self, discovery: Duration, assignment: Duration) -> Self {
        self.discovery_interval = discovery;
        self.assignment_interval = assignment;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.retry.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_seed(mut self, path: PathBuf) -> Self {
        self.seed_path = Some(path);
        self
    }

    pub fn with_state_file(mut self, path: PathBuf) -> Self {
        self.state_path = Some(path);
        self
    }
}
