//! JSON snapshots of scheduler state.
//!
//! A snapshot holds every runner, ingest endpoint (with slot bindings) and
//! job. It is written on a timer and once more on shutdown, and read back at
//! startup so jobs in flight survive a restart.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::SchedulerConfig;
use crate::error::Result;
use crate::ingest::{IngestEndpoint, IngestSlotAllocator};
use crate::registry::{Runner, RunnerRegistry};
use crate::scheduler::job::Job;
use crate::scheduler::JobStore;
use crate::state::FleetState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub saved_at: DateTime<Utc>,
    pub runners: Vec<Runner>,
    pub endpoints: Vec<IngestEndpoint>,
    pub jobs: Vec<Job>,
}

impl Snapshot {
    /// Copy the current state. Locks are taken one after another in the
    /// usual order, so the parts may be a few milliseconds apart.
    pub async fn capture(state: &FleetState) -> Self {
        let jobs = state
            .jobs
            .read()
            .await
            .all_jobs()
            .into_iter()
            .cloned()
            .collect();
        let runners = state
            .runners
            .read()
            .await
            .all()
            .into_iter()
            .cloned()
            .collect();
        let endpoints = state.slots.lock().await.endpoints().to_vec();

        Self {
            saved_at: Utc::now(),
            runners,
            endpoints,
            jobs,
        }
    }

    /// Write to `path` through a temporary file so a crash never leaves a
    /// truncated snapshot behind.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let tmp_path = path.with_extension("tmp");
        let bytes = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(&tmp_path, bytes).await?;
        tokio::fs::rename(&tmp_path, path).await?;
        tracing::debug!(path = %path.display(), jobs = self.jobs.len(), "Snapshot written");
        Ok(())
    }

    /// Read a snapshot. `Ok(None)` when the file does not exist yet.
    pub async fn load(path: &Path) -> Result<Option<Self>> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// Rebuild live state from this snapshot.
    ///
    /// Endpoints from `seed_endpoints` that the snapshot does not know are
    /// added; known ones keep their persisted bindings.
    pub fn restore(
        self,
        config: &SchedulerConfig,
        seed_endpoints: Vec<IngestEndpoint>,
    ) -> Result<FleetState> {
        let mut slots = IngestSlotAllocator::with_endpoints(self.endpoints)?;
        for endpoint in seed_endpoints {
            if slots.endpoint(&endpoint.id).is_err() {
                slots.add_endpoint(endpoint)?;
            }
        }
        let runners = RunnerRegistry::from_runners(
            self.runners,
            config.liveness_window,
            config.weights,
        );
        let jobs = JobStore::from_jobs(self.jobs);

        tracing::info!(
            saved_at = %self.saved_at,
            jobs = jobs.len(),
            runners = runners.len(),
            "Restored state from snapshot"
        );
        Ok(FleetState::new(jobs, runners, slots))
    }
}
