use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use crate::ingest::IngestSlotAllocator;
use crate::registry::RunnerRegistry;
use crate::scheduler::JobStore;

/// The scheduler's mutable state, created once at startup and shared by the
/// control loop, the runner callback service and the status API.
///
/// Each part has its own lock. Code that needs more than one takes them in
/// field order (jobs, runners, slots) and never holds one across a runner RPC.
#[derive(Clone)]
pub struct FleetState {
    pub jobs: Arc<RwLock<JobStore>>,
    pub runners: Arc<RwLock<RunnerRegistry>>,
    pub slots: Arc<Mutex<IngestSlotAllocator>>,
}

impl FleetState {
    pub fn new(jobs: JobStore, runners: RunnerRegistry, slots: IngestSlotAllocator) -> Self {
        Self {
            jobs: Arc::new(RwLock::new(jobs)),
            runners: Arc::new(RwLock::new(runners)),
            slots: Arc::new(Mutex::new(slots)),
        }
    }
}
