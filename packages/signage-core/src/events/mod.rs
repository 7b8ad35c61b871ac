//! Event system for renderer and diagnostics communication.
//!
//! This module provides:
//! - [`EventEmitter`] trait for domain services to emit events
//! - Event types for the renderer channel (playback, player status, default media)
//!
//! The actual transport implementation (IPC bridge, WebSocket, etc.) lives
//! outside this crate and is reached through [`BroadcastEventBridge`].

mod emitter;
pub mod bridge;

pub use bridge::BroadcastEventBridge;
pub use emitter::{EventEmitter, LoggingEventEmitter, NoopEventEmitter};

use serde::Serialize;

use crate::player_flow::PlayerState;
use crate::snapshot::types::PlaylistMode;

/// Events broadcast to the renderer and any attached diagnostics clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "category", rename_all = "camelCase")]
pub enum BroadcastEvent {
    /// A new playlist has been built and is ready to play.
    Playlist(PlaylistEvent),
    /// Events from the timeline scheduler / playback engine.
    Playback(PlaybackEvent),
    /// Composite player status changed.
    Player(PlayerStatusEvent),
    /// Default (fallback) media changed.
    DefaultMedia(DefaultMediaEvent),
    /// A remote command was acknowledged.
    Command(CommandEvent),
}

/// Events related to playlist construction.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PlaylistEvent {
    /// The snapshot manager produced a new playlist.
    Updated {
        mode: PlaylistMode,
        #[serde(rename = "itemCount")]
        item_count: usize,
        #[serde(rename = "scheduleId", skip_serializing_if = "Option::is_none")]
        schedule_id: Option<String>,
        timestamp: u64,
    },
}

/// Events emitted while the timeline scheduler drives playback.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PlaybackEvent {
    /// A new timeline item started playing.
    MediaChange {
        #[serde(rename = "itemId")]
        item_id: String,
        #[serde(rename = "mediaId", skip_serializing_if = "Option::is_none")]
        media_id: Option<String>,
        timestamp: u64,
    },
    /// A transition to the next item has begun.
    TransitionStart {
        #[serde(rename = "durationMs")]
        duration_ms: u64,
        timestamp: u64,
    },
    /// Playback could not continue and a fallback slide is shown.
    ShowFallback {
        reason: String,
        timestamp: u64,
    },
}

/// Composite player status, mirrored to the renderer on every transition.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerStatusEvent {
    pub state: PlayerState,
    pub mode: PlaylistMode,
    pub online: bool,
    pub device_id: Option<String>,
    pub schedule_id: Option<String>,
    pub last_snapshot_at: Option<u64>,
    pub current_media_id: Option<String>,
    pub error: Option<String>,
}

/// Events related to the default-media fallback document.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DefaultMediaEvent {
    Changed {
        #[serde(rename = "mediaId", skip_serializing_if = "Option::is_none")]
        media_id: Option<String>,
        timestamp: u64,
    },
}

/// Events related to remote command processing.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CommandEvent {
    Acknowledged {
        #[serde(rename = "commandId")]
        command_id: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        timestamp: u64,
    },
}

impl From<PlaylistEvent> for BroadcastEvent {
    fn from(event: PlaylistEvent) -> Self {
        BroadcastEvent::Playlist(event)
    }
}

impl From<PlaybackEvent> for BroadcastEvent {
    fn from(event: PlaybackEvent) -> Self {
        BroadcastEvent::Playback(event)
    }
}

impl From<PlayerStatusEvent> for BroadcastEvent {
    fn from(event: PlayerStatusEvent) -> Self {
        BroadcastEvent::Player(event)
    }
}

impl From<DefaultMediaEvent> for BroadcastEvent {
    fn from(event: DefaultMediaEvent) -> Self {
        BroadcastEvent::DefaultMedia(event)
    }
}

impl From<CommandEvent> for BroadcastEvent {
    fn from(event: CommandEvent) -> Self {
        BroadcastEvent::Command(event)
    }
}
