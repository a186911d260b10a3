use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scheduler::job::StreamVersion;

/// The stream a slot is currently carrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotBinding {
    pub stream_id: u64,
    pub version: StreamVersion,
}

impl SlotBinding {
    pub fn new(stream_id: u64, version: StreamVersion) -> Self {
        Self { stream_id, version }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub name: String,
    /// Whether the slot can produce transcoded (COMB) output.
    #[serde(default)]
    pub transcoding: bool,
    #[serde(default)]
    pub bound: Option<SlotBinding>,
    #[serde(default)]
    pub freed_at: Option<DateTime<Utc>>,
}

impl Slot {
    pub fn new(name: impl Into<String>, transcoding: bool) -> Self {
        Self {
            name: name.into(),
            transcoding,
            bound: None,
            freed_at: None,
        }
    }

    pub fn is_free(&self) -> bool {
        self.bound.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestEndpoint {
    pub id: String,
    /// Where runners push their stream, e.g. `rtmp://ingest-1.example.org/live`.
    pub base_url: String,
    /// Playlist URL with `{slot}`, `{stream}` and `{version}` placeholders.
    pub output_url_template: String,
    pub slots: Vec<Slot>,
}

impl IngestEndpoint {
    pub fn bound_count(&self) -> usize {
        self.slots.iter().filter(|s| !s.is_free()).count()
    }

    pub fn slot(&self, name: &str) -> Option<&Slot> {
        self.slots.iter().find(|s| s.name == name)
    }

    pub fn ingest_url(&self, slot: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), slot)
    }

    pub fn playlist_url(&self, slot: &str, binding: SlotBinding) -> String {
        self.output_url_template
            .replace("{slot}", slot)
            .replace("{stream}", &binding.stream_id.to_string())
            .replace("{version}", binding.version.as_str())
    }
}
