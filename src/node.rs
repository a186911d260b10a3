use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::catalog::Collaborators;
use crate::config::SchedulerConfig;
use crate::dashboard::run_dashboard;
use crate::error::Result;
use crate::grpc::{GrpcRunnerControl, GrpcServer, RunnerControl};
use crate::ingest::IngestSlotAllocator;
use crate::persist::Snapshot;
use crate::registry::RunnerRegistry;
use crate::scheduler::{JobStore, Scheduler};
use crate::seed::Seed;
use crate::state::FleetState;

/// The scheduler process: shared state, the two control loops, the runner
/// callback server and the optional status API.
pub struct SchedulerNode {
    pub config: SchedulerConfig,
    pub state: FleetState,
    pub catalog: Collaborators,
    pub scheduler: Scheduler,
}

impl SchedulerNode {
    pub fn new(
        config: SchedulerConfig,
        state: FleetState,
        catalog: Collaborators,
        control: Arc<dyn RunnerControl>,
    ) -> Self {
        let scheduler = Scheduler::new(state.clone(), catalog.clone(), control, config.retry);
        Self {
            config,
            state,
            catalog,
            scheduler,
        }
    }

    /// Build a node from the seed file and, when present, the state snapshot.
    ///
    /// Runners are reached over gRPC and the catalog is served from memory.
    pub async fn bootstrap(config: SchedulerConfig) -> Result<Self> {
        let seed = match &config.seed_path {
            Some(path) => {
                let seed = Seed::load(path).await?;
                seed.validate()?;
                seed
            }
            None => Seed::default(),
        };
        let (catalog, endpoints) = seed.into_parts();

        let snapshot = match &config.state_path {
            Some(path) => Snapshot::load(path).await?,
            None => None,
        };
        let state = match snapshot {
            Some(snapshot) => snapshot.restore(&config, endpoints)?,
            None => FleetState::new(
                JobStore::new(),
                RunnerRegistry::new(config.liveness_window, config.weights),
                IngestSlotAllocator::with_endpoints(endpoints)?,
            ),
        };

        let catalog = Collaborators::in_memory(Arc::new(catalog));
        let control = Arc::new(GrpcRunnerControl::new(config.rpc_timeout));
        Ok(Self::new(config, state, catalog, control))
    }

    /// Run every component until `shutdown` is cancelled.
    ///
    /// 1. Spawns the stream discovery loop
    /// 2. Spawns the assignment and reconciliation loop
    /// 3. Spawns the snapshot loop if a state file is configured
    /// 4. Spawns the status API if configured
    /// 5. Runs the gRPC callback server until shutdown
    ///
    /// Once the server has stopped the loops are awaited and a last snapshot
    /// is written.
    ///
    /// # Errors
    ///
    /// Returns an error if the gRPC server fails or the final snapshot cannot
    /// be written. The loops log their own errors.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let mut tasks: Vec<JoinHandle<()>> = Vec::new();

        tasks.push(tokio::spawn(Self::discovery_loop(
            self.scheduler.clone(),
            self.config.discovery_interval,
            self.config.job_retention,
            shutdown.clone(),
        )));
        tasks.push(tokio::spawn(Self::assignment_loop(
            self.scheduler.clone(),
            self.config.assignment_interval,
            shutdown.clone(),
        )));

        if let Some(path) = self.config.state_path.clone() {
            tasks.push(tokio::spawn(Self::snapshot_loop(
                self.state.clone(),
                path,
                self.config.snapshot_interval,
                shutdown.clone(),
            )));
        }

        if let Some(addr) = self.config.dashboard_addr {
            tasks.push(tokio::spawn(run_dashboard(
                addr,
                self.state.clone(),
                shutdown.clone(),
            )));
        }

        let server = GrpcServer::new(
            self.config.listen_addr,
            self.state.clone(),
            self.catalog.clone(),
        );
        let served = server.run(shutdown.clone()).await;
        // A server error stops everything else too.
        shutdown.cancel();

        for task in tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Background task panicked");
            }
        }

        if let Some(path) = &self.config.state_path {
            Snapshot::capture(&self.state).await.save(path).await?;
            tracing::info!(path = %path.display(), "Final snapshot written");
        }

        served?;
        tracing::info!("Scheduler stopped");
        Ok(())
    }

    /// Discover due streams on every tick and prune old completed jobs.
    async fn discovery_loop(
        scheduler: Scheduler,
        period: Duration,
        retention: Duration,
        shutdown: CancellationToken,
    ) {
        let mut interval = tokio::time::interval(period);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    match scheduler.notify_for_streams().await {
                        Ok(report) if report.jobs_created > 0 || report.skipped > 0 => {
                            tracing::info!(created = report.jobs_created, skipped = report.skipped, "Stream discovery finished");
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!(error = %e, "Stream discovery failed"),
                    }

                    let Ok(retention) = chrono::Duration::from_std(retention) else {
                        continue;
                    };
                    let removed = scheduler
                        .state()
                        .jobs
                        .write()
                        .await
                        .cleanup_completed(Utc::now() - retention);
                    if removed > 0 {
                        tracing::debug!(removed, "Pruned completed jobs");
                    }
                }
            }
        }
    }

    async fn assignment_loop(scheduler: Scheduler, period: Duration, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(period);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    scheduler.notify_runner_assignments().await;
                }
            }
        }
    }

    async fn snapshot_loop(
        state: FleetState,
        path: PathBuf,
        period: Duration,
        shutdown: CancellationToken,
    ) {
        let mut interval = tokio::time::interval(period);
        // The first tick fires immediately; there is nothing new to save yet.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = Snapshot::capture(&state).await.save(&path).await {
                        tracing::error!(path = %path.display(), error = %e, "Snapshot failed");
                    }
                }
            }
        }
    }
}
