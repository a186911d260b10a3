//! Seed file: ingest endpoints plus the catalog the in-memory collaborators
//! serve.
//!
//! ```json
//! {
//!   "ingest_endpoints": [{ "id": "ingest-1", "base_url": "rtmp://ingest-1/live",
//!                          "output_url_template": "https://cdn/{slot}/{version}.m3u8",
//!                          "slots": [{ "name": "s1", "transcoding": true }] }],
//!   "courses": [{ "id": 1, "slug": "algo", "name": "Algorithms" }],
//!   "lecture_halls": [{ "id": 1, "name": "HS1", "source_mode": "combined",
//!                       "pres_address": "10.0.0.1", "cam_address": "10.0.0.2",
//!                       "comb_address": "10.0.0.3" }],
//!   "streams": [{ "id": 1, "course_id": 1, "lecture_hall_id": 1,
//!                 "start": "2024-01-01T10:00:00Z", "end": "2024-01-01T11:30:00Z" }]
//! }
//! ```

use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::{Course, InMemoryCatalog, LectureHall, Stream};
use crate::error::{FleetError, Result};
use crate::ingest::{IngestEndpoint, IngestSlotAllocator};
use crate::scheduler::job::StreamVersion;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Seed {
    #[serde(default)]
    pub ingest_endpoints: Vec<IngestEndpoint>,
    #[serde(default)]
    pub courses: Vec<Course>,
    #[serde(default)]
    pub lecture_halls: Vec<LectureHall>,
    #[serde(default)]
    pub streams: Vec<Stream>,
}

/// A due stream and the versions discovery would create jobs for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedStream {
    pub stream_id: u64,
    pub course: String,
    pub lecture_hall: String,
    pub versions: Vec<StreamVersion>,
}

impl Seed {
    pub async fn load(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let seed: Seed = serde_json::from_slice(&bytes)?;
        tracing::info!(
            path = %path.display(),
            endpoints = seed.ingest_endpoints.len(),
            streams = seed.streams.len(),
            "Seed loaded"
        );
        Ok(seed)
    }

    /// Check references between records and the endpoint layout.
    pub fn validate(&self) -> Result<()> {
        IngestSlotAllocator::with_endpoints(self.ingest_endpoints.clone())?;

        let courses: HashSet<u64> = self.courses.iter().map(|c| c.id).collect();
        let halls: HashSet<u64> = self.lecture_halls.iter().map(|h| h.id).collect();
        let mut streams = HashSet::new();

        for stream in &self.streams {
            if !streams.insert(stream.id) {
                return Err(FleetError::InvalidConfig(format!(
                    "duplicate stream id {}",
                    stream.id
                )));
            }
            if !courses.contains(&stream.course_id) {
                return Err(FleetError::InvalidConfig(format!(
                    "stream {} references unknown course {}",
                    stream.id, stream.course_id
                )));
            }
            if !halls.contains(&stream.lecture_hall_id) {
                return Err(FleetError::InvalidConfig(format!(
                    "stream {} references unknown lecture hall {}",
                    stream.id, stream.lecture_hall_id
                )));
            }
            if stream.end <= stream.start {
                return Err(FleetError::InvalidConfig(format!(
                    "stream {} ends before it starts",
                    stream.id
                )));
            }
        }
        Ok(())
    }

    /// Streams due at `now` with the versions their hall fans out to.
    pub fn plan_at(&self, now: DateTime<Utc>) -> Vec<PlannedStream> {
        self.streams
            .iter()
            .filter(|s| s.is_due_at(now))
            .filter_map(|s| {
                let course = self.courses.iter().find(|c| c.id == s.course_id)?;
                let hall = self.lecture_halls.iter().find(|h| h.id == s.lecture_hall_id)?;
                Some(PlannedStream {
                    stream_id: s.id,
                    course: course.slug.clone(),
                    lecture_hall: hall.name.clone(),
                    versions: hall.source_mode.versions().to_vec(),
                })
            })
            .collect()
    }

    /// Split into the in-memory catalog and the ingest endpoints.
    pub fn into_parts(self) -> (InMemoryCatalog, Vec<IngestEndpoint>) {
        let catalog = InMemoryCatalog::with_data(self.courses, self.lecture_halls, self.streams);
        (catalog, self.ingest_endpoints)
    }
}
