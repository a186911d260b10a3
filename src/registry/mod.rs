//! Known runners, their liveness and their load.
//!
//! Runners register once and then send a heartbeat periodically. A runner
//! whose last heartbeat is older than the liveness window is dead; it is kept
//! in the registry and comes back to life with its next heartbeat.

pub mod runner;

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::WorkloadWeights;
use crate::error::{FleetError, Result};
use crate::scheduler::job::ActionType;

pub use runner::{Runner, RunnerStatus, Telemetry};

#[derive(Debug)]
pub struct RunnerRegistry {
    runners: HashMap<String, Runner>,
    liveness_window: Duration,
    weights: WorkloadWeights,
    next_seq: u64,
}

impl RunnerRegistry {
    pub fn new(liveness_window: Duration, weights: WorkloadWeights) -> Self {
        Self {
            runners: HashMap::new(),
            liveness_window,
            weights,
            next_seq: 0,
        }
    }

    /// Rebuild a registry from persisted runners.
    pub fn from_runners(
        runners: Vec<Runner>,
        liveness_window: Duration,
        weights: WorkloadWeights,
    ) -> Self {
        let mut registry = Self::new(liveness_window, weights);
        for runner in runners {
            registry.next_seq = registry.next_seq.max(runner.seq + 1);
            registry.runners.insert(runner.hostname.clone(), runner);
        }
        registry
    }

    pub fn liveness_window(&self) -> Duration {
        self.liveness_window
    }

    /// Register a runner or refresh an existing one. Keyed by hostname, so
    /// registering twice keeps a single record and its id.
    pub fn register(&mut self, hostname: &str, port: u32) -> Result<Uuid> {
        let port = validate_address(hostname, port)?;

        if let Some(runner) = self.runners.get_mut(hostname) {
            runner.port = port;
            runner.touch();
            tracing::debug!(hostname, port, "Runner re-registered");
            return Ok(runner.id);
        }

        let runner = Runner::new(self.next_seq, hostname.to_string(), port);
        self.next_seq += 1;
        let id = runner.id;
        self.runners.insert(hostname.to_string(), runner);
        tracing::info!(hostname, port, runner_id = %id, "Runner registered");
        Ok(id)
    }

    /// Record a heartbeat with the runner's own view of its load.
    pub fn heartbeat(&mut self, hostname: &str, telemetry: Telemetry, workload: u32) -> Result<()> {
        let runner = self
            .runners
            .get_mut(hostname)
            .ok_or_else(|| FleetError::RunnerNotFound(hostname.to_string()))?;
        runner.touch();
        runner.telemetry = telemetry;
        runner.workload = workload;
        tracing::trace!(hostname, workload, "Runner heartbeat");
        Ok(())
    }

    pub fn get(&self, hostname: &str) -> Option<&Runner> {
        self.runners.get(hostname)
    }

    pub fn get_mut(&mut self, hostname: &str) -> Option<&mut Runner> {
        self.runners.get_mut(hostname)
    }

    /// Administrative removal. The scheduler itself never deletes runners.
    pub fn remove(&mut self, hostname: &str) -> Option<Runner> {
        let removed = self.runners.remove(hostname);
        if removed.is_some() {
            tracing::info!(hostname, "Runner removed");
        }
        removed
    }

    /// Every runner, in registration order.
    pub fn all(&self) -> Vec<&Runner> {
        let mut runners: Vec<&Runner> = self.runners.values().collect();
        runners.sort_by_key(|r| r.seq);
        runners
    }

    pub fn is_alive(&self, hostname: &str) -> bool {
        self.is_alive_at(hostname, Utc::now())
    }

    pub fn is_alive_at(&self, hostname: &str, now: DateTime<Utc>) -> bool {
        self.runners
            .get(hostname)
            .is_some_and(|r| r.is_alive_at(now, self.liveness_window))
    }

    /// Runners that sent a heartbeat within the liveness window, in
    /// registration order. Work is only ever dispatched to this set.
    pub fn list_alive(&self) -> Vec<&Runner> {
        self.list_alive_at(Utc::now())
    }

    pub fn list_alive_at(&self, now: DateTime<Utc>) -> Vec<&Runner> {
        self.all()
            .into_iter()
            .filter(|r| r.is_alive_at(now, self.liveness_window))
            .collect()
    }

    /// Runner whose workload after taking the action would be lowest. Ties go
    /// to the earliest candidate.
    pub fn pick_least_loaded<'a>(
        &self,
        candidates: &[&'a Runner],
        action_type: ActionType,
    ) -> Result<&'a Runner> {
        let weight = self.weights.weight(action_type);
        let projected = |r: &Runner| r.workload.saturating_add(weight);
        candidates
            .iter()
            .copied()
            .reduce(|best, r| {
                if projected(r) < projected(best) {
                    r
                } else {
                    best
                }
            })
            .ok_or(FleetError::NoCapacity)
    }

    /// Charge a runner for a newly assigned action.
    pub fn add_workload(&mut self, hostname: &str, action_type: ActionType) {
        let weight = self.weights.weight(action_type);
        if let Some(runner) = self.runners.get_mut(hostname) {
            runner.workload = runner.workload.saturating_add(weight);
        }
    }

    /// Undo [`add_workload`](Self::add_workload) once the action finished.
    pub fn release_workload(&mut self, hostname: &str, action_type: ActionType) {
        let weight = self.weights.weight(action_type);
        if let Some(runner) = self.runners.get_mut(hostname) {
            runner.workload = runner.workload.saturating_sub(weight);
        }
    }

    pub fn len(&self) -> usize {
        self.runners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runners.is_empty()
    }
}

fn validate_address(hostname: &str, port: u32) -> Result<u16> {
    if hostname.is_empty()
        || hostname
            .chars()
            .any(|c| c.is_whitespace() || c == ':' || c == '/')
    {
        return Err(FleetError::InvalidAddress(format!("{hostname:?}:{port}")));
    }
    match u16::try_from(port) {
        Ok(p) if p != 0 => Ok(p),
        _ => Err(FleetError::InvalidAddress(format!("{hostname}:{port}"))),
    }
}
