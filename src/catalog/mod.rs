//! Interfaces to the lecture catalog and side-effect services owned by the
//! surrounding web application.
//!
//! The scheduler reads courses, lecture halls and due streams through these
//! traits and writes back a small projection onto the stream: whether it is
//! live, its playlist URL per version, and whether it has ended.
//!
//! [`memory::InMemoryCatalog`] implements every trait and backs the
//! standalone server and the tests.

pub mod memory;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::scheduler::job::StreamVersion;

pub use memory::InMemoryCatalog;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    pub id: u64,
    pub slug: String,
    pub name: String,
}

/// Which sources a lecture hall records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceMode {
    PresentationOnly,
    CameraOnly,
    /// Presentation, camera, and the two composed into one picture.
    Combined,
}

impl SourceMode {
    /// Versions a lecture in a hall with this mode fans out to.
    pub fn versions(self) -> &'static [StreamVersion] {
        match self {
            SourceMode::PresentationOnly => &[StreamVersion::Pres],
            SourceMode::CameraOnly => &[StreamVersion::Cam],
            SourceMode::Combined => &[StreamVersion::Pres, StreamVersion::Cam, StreamVersion::Comb],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LectureHall {
    pub id: u64,
    pub name: String,
    pub source_mode: SourceMode,
    #[serde(default)]
    pub pres_address: String,
    #[serde(default)]
    pub cam_address: String,
    #[serde(default)]
    pub comb_address: String,
}

impl LectureHall {
    pub fn source_for(&self, version: StreamVersion) -> &str {
        match version {
            StreamVersion::Pres => &self.pres_address,
            StreamVersion::Cam => &self.cam_address,
            StreamVersion::Comb => &self.comb_address,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stream {
    pub id: u64,
    pub course_id: u64,
    pub lecture_hall_id: u64,
    #[serde(default)]
    pub name: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub live: bool,
    #[serde(default)]
    pub ended: bool,
    #[serde(default)]
    pub playlist_urls: BTreeMap<StreamVersion, String>,
}

impl Stream {
    /// The scheduled window has arrived and the stream has not ended.
    pub fn is_due_at(&self, now: DateTime<Utc>) -> bool {
        !self.ended && self.start <= now && now < self.end
    }
}

#[async_trait]
pub trait CourseRepository: Send + Sync {
    async fn get_by_id(&self, id: u64) -> Result<Course>;
}

#[async_trait]
pub trait LectureHallRepository: Send + Sync {
    async fn get_by_id(&self, id: u64) -> Result<LectureHall>;
}

#[async_trait]
pub trait StreamRepository: Send + Sync {
    async fn get_by_id(&self, id: u64) -> Result<Stream>;

    /// Streams whose scheduled window has arrived and that have not ended.
    async fn get_due_streams(&self, now: DateTime<Utc>) -> Result<Vec<Stream>>;

    /// Store the live flag, and the playlist URL for `version` when given.
    async fn save_live_state(
        &self,
        id: u64,
        version: StreamVersion,
        playlist_url: Option<String>,
        live: bool,
    ) -> Result<()>;

    async fn set_ended(&self, id: u64, ended: bool) -> Result<()>;
}

/// Lecture hall light and camera switching when a stream goes live.
#[async_trait]
pub trait HallControl: Send + Sync {
    async fn stream_started(&self, hall: &LectureHall, stream: &Stream) -> Result<()>;
}

/// Removes silence markers left over from an earlier run of a stream.
#[async_trait]
pub trait SilenceCleanup: Send + Sync {
    async fn clear_stale_silences(&self, stream_id: u64) -> Result<()>;
}

/// Every collaborator the scheduler talks to, shared behind `Arc`s.
#[derive(Clone)]
pub struct Collaborators {
    pub courses: Arc<dyn CourseRepository>,
    pub halls: Arc<dyn LectureHallRepository>,
    pub streams: Arc<dyn StreamRepository>,
    pub hall_control: Arc<dyn HallControl>,
    pub silences: Arc<dyn SilenceCleanup>,
}

impl Collaborators {
    /// Wire every collaborator to the same in-memory catalog.
    pub fn in_memory(catalog: Arc<InMemoryCatalog>) -> Self {
        Self {
            courses: catalog.clone(),
            halls: catalog.clone(),
            streams: catalog.clone(),
            hall_control: catalog.clone(),
            silences: catalog,
        }
    }
}
