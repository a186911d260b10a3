use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Resource metrics a runner reports with each heartbeat. Advisory only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    pub cpu_percent: f64,
    pub memory_used_bytes: u64,
    pub disk_free_bytes: u64,
    pub uptime_secs: u64,
    pub version: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnerStatus {
    Alive,
    Dead,
}

impl std::fmt::Display for RunnerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunnerStatus::Alive => write!(f, "alive"),
            RunnerStatus::Dead => write!(f, "dead"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Runner {
    pub id: Uuid,
    pub hostname: String,
    pub port: u16,
    /// Registration order, used to keep listings stable.
    pub seq: u64,
    pub last_seen: DateTime<Utc>,
    pub workload: u32,
    pub telemetry: Telemetry,
}

impl Runner {
    pub fn new(seq: u64, hostname: String, port: u16) -> Self {
        Self {
            id: Uuid::new_v4(),
            hostname,
            port,
            seq,
            last_seen: Utc::now(),
            workload: 0,
            telemetry: Telemetry::default(),
        }
    }

    /// `host:port` of the runner's control service.
    pub fn address(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }

    pub fn touch(&mut self) {
        self.last_seen = Utc::now();
    }

    pub fn is_alive_at(&self, now: DateTime<Utc>, window: Duration) -> bool {
        match (now - self.last_seen).to_std() {
            Ok(age) => age < window,
            // last_seen in the future counts as just seen
            Err(_) => true,
        }
    }

    pub fn status_at(&self, now: DateTime<Utc>, window: Duration) -> RunnerStatus {
        if self.is_alive_at(now, window) {
            RunnerStatus::Alive
        } else {
            RunnerStatus::Dead
        }
    }
}
