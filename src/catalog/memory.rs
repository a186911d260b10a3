//! In-memory catalog implementation.
//!
//! Serves courses, lecture halls and streams from maps filled at startup
//! (usually from a seed file). Hall switching and silence cleanup are only
//! logged and counted.
//!
//! ## Limitations
//!
//! - **No persistence**: stream projections are lost when the process exits
//! - **Single-process only**: nothing is shared with the web application

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{
    Course, CourseRepository, HallControl, LectureHall, LectureHallRepository, SilenceCleanup,
    Stream, StreamRepository,
};
use crate::error::{FleetError, Result};
use crate::scheduler::job::StreamVersion;

#[derive(Debug, Default)]
struct Tables {
    courses: HashMap<u64, Course>,
    halls: HashMap<u64, LectureHall>,
    streams: BTreeMap<u64, Stream>,
    hall_switches: Vec<u64>,
    silence_cleanups: Vec<u64>,
}

#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    tables: RwLock<Tables>,
}

fn poisoned<T>(_: PoisonError<T>) -> FleetError {
    FleetError::Collaborator("catalog lock poisoned".to_string())
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data(courses: Vec<Course>, halls: Vec<LectureHall>, streams: Vec<Stream>) -> Self {
        let catalog = Self::new();
        {
            let mut tables = catalog.tables.write().unwrap_or_else(PoisonError::into_inner);
            tables.courses = courses.into_iter().map(|c| (c.id, c)).collect();
            tables.halls = halls.into_iter().map(|h| (h.id, h)).collect();
            tables.streams = streams.into_iter().map(|s| (s.id, s)).collect();
        }
        catalog
    }

    pub fn insert_course(&self, course: Course) -> Result<()> {
        self.tables
            .write()
            .map_err(poisoned)?
            .courses
            .insert(course.id, course);
        Ok(())
    }

    pub fn insert_hall(&self, hall: LectureHall) -> Result<()> {
        self.tables
            .write()
            .map_err(poisoned)?
            .halls
            .insert(hall.id, hall);
        Ok(())
    }

    pub fn insert_stream(&self, stream: Stream) -> Result<()> {
        self.tables
            .write()
            .map_err(poisoned)?
            .streams
            .insert(stream.id, stream);
        Ok(())
    }

    /// Stream ids that triggered hall switching, in call order.
    pub fn hall_switches(&self) -> Vec<u64> {
        self.tables
            .read()
            .map(|t| t.hall_switches.clone())
            .unwrap_or_default()
    }

    /// Stream ids whose stale silences were cleared, in call order.
    pub fn silence_cleanups(&self) -> Vec<u64> {
        self.tables
            .read()
            .map(|t| t.silence_cleanups.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CourseRepository for InMemoryCatalog {
    async fn get_by_id(&self, id: u64) -> Result<Course> {
        self.tables
            .read()
            .map_err(poisoned)?
            .courses
            .get(&id)
            .cloned()
            .ok_or_else(|| FleetError::Collaborator(format!("course {id} not found")))
    }
}

#[async_trait]
impl LectureHallRepository for InMemoryCatalog {
    async fn get_by_id(&self, id: u64) -> Result<LectureHall> {
        self.tables
            .read()
            .map_err(poisoned)?
            .halls
            .get(&id)
            .cloned()
            .ok_or_else(|| FleetError::Collaborator(format!("lecture hall {id} not found")))
    }
}

#[async_trait]
impl StreamRepository for InMemoryCatalog {
    async fn get_by_id(&self, id: u64) -> Result<Stream> {
        self.tables
            .read()
            .map_err(poisoned)?
            .streams
            .get(&id)
            .cloned()
            .ok_or_else(|| FleetError::Collaborator(format!("stream {id} not found")))
    }

    async fn get_due_streams(&self, now: DateTime<Utc>) -> Result<Vec<Stream>> {
        Ok(self
            .tables
            .read()
            .map_err(poisoned)?
            .streams
            .values()
            .filter(|s| s.is_due_at(now))
            .cloned()
            .collect())
    }

    async fn save_live_state(
        &self,
        id: u64,
        version: StreamVersion,
        playlist_url: Option<String>,
        live: bool,
    ) -> Result<()> {
        let mut tables = self.tables.write().map_err(poisoned)?;
        let stream = tables
            .streams
            .get_mut(&id)
            .ok_or_else(|| FleetError::Collaborator(format!("stream {id} not found")))?;
        stream.live = live;
        if let Some(url) = playlist_url {
            stream.playlist_urls.insert(version, url);
        }
        Ok(())
    }

    async fn set_ended(&self, id: u64, ended: bool) -> Result<()> {
        let mut tables = self.tables.write().map_err(poisoned)?;
        let stream = tables
            .streams
            .get_mut(&id)
            .ok_or_else(|| FleetError::Collaborator(format!("stream {id} not found")))?;
        stream.ended = ended;
        Ok(())
    }
}

#[async_trait]
impl HallControl for InMemoryCatalog {
    async fn stream_started(&self, hall: &LectureHall, stream: &Stream) -> Result<()> {
        tracing::info!(hall = %hall.name, stream_id = stream.id, "Switching lecture hall to live");
        self.tables
            .write()
            .map_err(poisoned)?
            .hall_switches
            .push(stream.id);
        Ok(())
    }
}

#[async_trait]
impl SilenceCleanup for InMemoryCatalog {
    async fn clear_stale_silences(&self, stream_id: u64) -> Result<()> {
        tracing::debug!(stream_id, "Clearing stale silences");
        self.tables
            .write()
            .map_err(poisoned)?
            .silence_cleanups
            .push(stream_id);
        Ok(())
    }
}
