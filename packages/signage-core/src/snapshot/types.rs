//! Data types shared by the snapshot parser (C6) and snapshot manager (C7).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::protocol_constants::DEFAULT_DISPLAY_MS;

/// How a [`TimelineItem`] should be fitted into the display frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Fit {
    Contain,
    Cover,
    Stretch,
}

impl Default for Fit {
    fn default() -> Self {
        Fit::Contain
    }
}

impl Fit {
    pub fn parse(value: Option<&str>) -> Fit {
        match value.map(str::to_lowercase).as_deref() {
            Some("cover") => Fit::Cover,
            Some("stretch") => Fit::Stretch,
            _ => Fit::Contain,
        }
    }
}

/// Media type of a timeline item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Video,
    Pdf,
    Url,
}

/// A single piece of content on the playback timeline. Immutable once
/// produced by the parser.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineItem {
    pub id: String,
    pub media_id: Option<String>,
    #[serde(rename = "type")]
    pub media_type: MediaType,
    pub remote_url: Option<String>,
    pub local_path: Option<String>,
    pub local_url: Option<String>,
    pub display_ms: u64,
    pub fit: Fit,
    pub muted: bool,
    pub sha256: Option<String>,
    pub transition_duration_ms: u64,
    #[serde(default)]
    pub meta: serde_json::Value,
}

impl TimelineItem {
    /// Clamps a parsed `displayMs` to the spec default when absent or zero.
    pub fn normalize_display_ms(raw: Option<u64>) -> u64 {
        match raw {
            Some(0) | None => DEFAULT_DISPLAY_MS,
            Some(ms) => ms,
        }
    }
}

/// Normalized view of a backend snapshot response, produced by the parser (§4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedSnapshot {
    pub snapshot_id: Option<String>,
    pub schedule_id: Option<String>,
    pub items: Vec<TimelineItem>,
    pub emergency_item: Option<TimelineItem>,
    pub default_item: Option<TimelineItem>,
    pub media_url_map: HashMap<String, String>,
    pub fetched_at: u64,
    pub raw: serde_json::Value,
}

/// The mode a playlist was derived in, in strict precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaylistMode {
    Emergency,
    Normal,
    Default,
    Offline,
    Empty,
}

/// The locally playable schedule built by the snapshot manager (§4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackPlaylist {
    pub mode: PlaylistMode,
    pub items: Vec<TimelineItem>,
    pub schedule_id: Option<String>,
    pub snapshot_id: Option<String>,
    pub last_snapshot_at: Option<u64>,
}

impl PlaybackPlaylist {
    pub fn empty() -> Self {
        Self {
            mode: PlaylistMode::Empty,
            items: Vec::new(),
            schedule_id: None,
            snapshot_id: None,
            last_snapshot_at: None,
        }
    }
}
