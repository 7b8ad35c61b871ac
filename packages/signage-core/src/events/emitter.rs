//! Event emitter abstraction for decoupling services from transport.
//!
//! Services depend on the [`EventEmitter`] trait rather than a concrete
//! channel, which keeps the renderer bridge swappable and the domain code
//! testable without a real transport.

use super::{CommandEvent, DefaultMediaEvent, PlaybackEvent, PlayerStatusEvent, PlaylistEvent};

/// Trait for emitting renderer-facing events without knowledge of transport.
///
/// # Example
///
/// ```ignore
/// struct SnapshotManager {
///     emitter: Arc<dyn EventEmitter>,
/// }
///
/// impl SnapshotManager {
///     fn on_playlist_built(&self) {
///         self.emitter.emit_playlist(PlaylistEvent::Updated { .. });
///     }
/// }
/// ```
pub trait EventEmitter: Send + Sync {
    /// Emits a playlist construction event.
    fn emit_playlist(&self, event: PlaylistEvent);

    /// Emits a timeline/playback event.
    fn emit_playback(&self, event: PlaybackEvent);

    /// Emits a composite player status change.
    fn emit_player_status(&self, event: PlayerStatusEvent);

    /// Emits a default-media change event.
    fn emit_default_media(&self, event: DefaultMediaEvent);

    /// Emits a remote command acknowledgement.
    fn emit_command(&self, event: CommandEvent);
}

/// No-op emitter for headless agent runs or testing.
///
/// Events are silently discarded. In a standalone agent, events are
/// typically delivered only to whichever renderer bridge is attached, so
/// this no-op emitter is used when no bridge is configured.
pub struct NoopEventEmitter;

impl EventEmitter for NoopEventEmitter {
    fn emit_playlist(&self, _event: PlaylistEvent) {}
    fn emit_playback(&self, _event: PlaybackEvent) {}
    fn emit_player_status(&self, _event: PlayerStatusEvent) {}
    fn emit_default_media(&self, _event: DefaultMediaEvent) {}
    fn emit_command(&self, _event: CommandEvent) {}
}

/// Logging emitter for debugging and development.
///
/// Logs all events at debug level.
pub struct LoggingEventEmitter;

impl EventEmitter for LoggingEventEmitter {
    fn emit_playlist(&self, event: PlaylistEvent) {
        log::debug!("[playlist_event] {:?}", event);
    }

    fn emit_playback(&self, event: PlaybackEvent) {
        log::debug!("[playback_event] {:?}", event);
    }

    fn emit_player_status(&self, event: PlayerStatusEvent) {
        log::debug!("[player_status] {:?}", event);
    }

    fn emit_default_media(&self, event: DefaultMediaEvent) {
        log::debug!("[default_media_event] {:?}", event);
    }

    fn emit_command(&self, event: CommandEvent) {
        log::debug!("[command_event] {:?}", event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Test emitter that counts events.
    struct CountingEventEmitter {
        playlist_count: AtomicUsize,
        playback_count: AtomicUsize,
    }

    impl CountingEventEmitter {
        fn new() -> Self {
            Self {
                playlist_count: AtomicUsize::new(0),
                playback_count: AtomicUsize::new(0),
            }
        }
    }

    impl EventEmitter for CountingEventEmitter {
        fn emit_playlist(&self, _event: PlaylistEvent) {
            self.playlist_count.fetch_add(1, Ordering::SeqCst);
        }

        fn emit_playback(&self, _event: PlaybackEvent) {
            self.playback_count.fetch_add(1, Ordering::SeqCst);
        }

        fn emit_player_status(&self, _event: PlayerStatusEvent) {}
        fn emit_default_media(&self, _event: DefaultMediaEvent) {}
        fn emit_command(&self, _event: CommandEvent) {}
    }

    #[test]
    fn counting_emitter_tracks_events() {
        let emitter = Arc::new(CountingEventEmitter::new());

        emitter.emit_playlist(PlaylistEvent::Updated {
            mode: crate::snapshot::types::PlaylistMode::Normal,
            item_count: 3,
            schedule_id: Some("sched-1".to_string()),
            timestamp: 0,
        });
        emitter.emit_playback(PlaybackEvent::MediaChange {
            item_id: "item-1".to_string(),
            media_id: None,
            timestamp: 0,
        });

        assert_eq!(emitter.playlist_count.load(Ordering::SeqCst), 1);
        assert_eq!(emitter.playback_count.load(Ordering::SeqCst), 1);
    }
}
