//! Playback engine (§4.9): binds the timeline scheduler to the renderer,
//! proof-of-play, and telemetry collaborators, and enforces the error
//! budget.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::cache::CacheManager;
use crate::collaborators::{ProofOfPlaySink, RendererSink, TelemetrySink};
use crate::error::{SignageError, SignageResult};
use crate::events::{EventEmitter, PlaybackEvent};
use crate::protocol_constants::MAX_CONSECUTIVE_PLAYBACK_ERRORS;
use crate::scheduler::{SchedulerEvent, TimelineScheduler};
use crate::snapshot::types::{PlaybackPlaylist, PlaylistMode, TimelineItem};

/// Playback engine state, mirrored into [`crate::events::PlayerStatusEvent::mode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineMode {
    Normal,
    Emergency,
    Stopped,
}

pub struct PlaybackEngine {
    cache: Arc<CacheManager>,
    renderer: Arc<dyn RendererSink>,
    proof_of_play: Arc<dyn ProofOfPlaySink>,
    telemetry: Arc<dyn TelemetrySink>,
    emitter: Arc<dyn EventEmitter>,
    scheduler: RwLock<Option<Arc<TimelineScheduler>>>,
    schedule_id: RwLock<Option<String>>,
    current_media_id: RwLock<Option<String>>,
    consecutive_errors: AtomicU32,
    mode: RwLock<EngineMode>,
}

impl PlaybackEngine {
    pub fn new(
        cache: Arc<CacheManager>,
        renderer: Arc<dyn RendererSink>,
        proof_of_play: Arc<dyn ProofOfPlaySink>,
        telemetry: Arc<dyn TelemetrySink>,
        emitter: Arc<dyn EventEmitter>,
    ) -> Arc<Self> {
        Arc::new(Self {
            cache,
            renderer,
            proof_of_play,
            telemetry,
            emitter,
            scheduler: RwLock::new(None),
            schedule_id: RwLock::new(None),
            current_media_id: RwLock::new(None),
            consecutive_errors: AtomicU32::new(0),
            mode: RwLock::new(EngineMode::Stopped),
        })
    }

    pub fn current_media_id(&self) -> Option<String> {
        self.current_media_id.read().clone()
    }

    pub fn mode(&self) -> EngineMode {
        *self.mode.read()
    }

    /// Stops any current timeline and starts a new one from `playlist`.
    pub fn apply_playlist(self: &Arc<Self>, playlist: PlaybackPlaylist) {
        self.stop();
        if playlist.items.is_empty() {
            return;
        }

        *self.schedule_id.write() = playlist.schedule_id.clone();
        *self.mode.write() = match playlist.mode {
            PlaylistMode::Emergency => EngineMode::Emergency,
            _ => EngineMode::Normal,
        };

        let scheduler = TimelineScheduler::new(playlist.items);
        *self.scheduler.write() = Some(scheduler.clone());

        let (tx, rx) = tokio::sync::mpsc::channel(32);
        tokio::spawn(scheduler.run(tx));
        let this = self.clone();
        tokio::spawn(async move { this.drive(rx).await });
    }

    pub fn stop(&self) {
        if let Some(scheduler) = self.scheduler.write().take() {
            scheduler.stop();
        }
        *self.mode.write() = EngineMode::Stopped;
    }

    async fn drive(self: Arc<Self>, mut rx: tokio::sync::mpsc::Receiver<SchedulerEvent>) {
        while let Some(event) = rx.recv().await {
            match event {
                SchedulerEvent::PlayItem { item } => self.on_play_item(&item),
                SchedulerEvent::TransitionStart { current, .. } => {
                    self.on_transition_start(current.transition_duration_ms)
                }
                SchedulerEvent::ItemComplete { item } => self.on_item_complete(&item),
                SchedulerEvent::TimelineComplete => {
                    log::debug!("[playback] timeline wrapped");
                }
            }
        }
    }

    fn on_play_item(&self, item: &TimelineItem) {
        if let Some(ref media_id) = item.media_id {
            self.cache.mark_now_playing(media_id);
            self.proof_of_play
                .record_start(self.schedule_id.read().as_deref(), media_id);
            self.telemetry.set_current_media(Some(media_id));
            *self.current_media_id.write() = Some(media_id.clone());
        }
        self.renderer.show_media(&item.id, item.local_path.as_deref());
        self.emitter.emit_playback(PlaybackEvent::MediaChange {
            item_id: item.id.clone(),
            media_id: item.media_id.clone(),
            timestamp: crate::utils::now_millis(),
        });
        self.consecutive_errors.store(0, Ordering::SeqCst);
    }

    fn on_transition_start(&self, duration_ms: u64) {
        self.emitter.emit_playback(PlaybackEvent::TransitionStart {
            duration_ms,
            timestamp: crate::utils::now_millis(),
        });
    }

    fn on_item_complete(&self, item: &TimelineItem) {
        if let Some(ref media_id) = item.media_id {
            self.cache.unmark_now_playing(media_id);
            self.proof_of_play
                .record_end(self.schedule_id.read().as_deref(), media_id, true);
        }
    }

    /// Called on a playback error. Returns `Err(PlaybackError)` once the
    /// consecutive-error budget is exhausted; otherwise shows a fallback
    /// slide and continues.
    pub fn on_playback_error(&self, reason: &str) -> SignageResult<()> {
        let count = self.consecutive_errors.fetch_add(1, Ordering::SeqCst) + 1;
        if count > MAX_CONSECUTIVE_PLAYBACK_ERRORS {
            self.stop();
            return Err(SignageError::Playback("Max errors reached".to_string()));
        }
        self.renderer.show_fallback(reason);
        self.emitter.emit_playback(PlaybackEvent::ShowFallback {
            reason: reason.to_string(),
            timestamp: crate::utils::now_millis(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{NoopProofOfPlaySink, NoopRendererSink, NoopTelemetrySink};
    use crate::events::NoopEventEmitter;
    use crate::http_client::HttpClient;

    fn engine() -> Arc<PlaybackEngine> {
        let dir = tempfile::tempdir().unwrap();
        let http = HttpClient::new("https://example.invalid").unwrap();
        let cache = CacheManager::new(dir.path().to_path_buf(), 1024 * 1024, http);
        PlaybackEngine::new(
            cache,
            Arc::new(NoopRendererSink),
            Arc::new(NoopProofOfPlaySink),
            Arc::new(NoopTelemetrySink),
            Arc::new(NoopEventEmitter),
        )
    }

    #[test]
    fn error_budget_resets_are_tracked_and_exhausts_after_five() {
        let engine = engine();
        for _ in 0..5 {
            assert!(engine.on_playback_error("transient").is_ok());
        }
        assert!(engine.on_playback_error("transient").is_err());
    }

    #[test]
    fn empty_playlist_leaves_engine_stopped() {
        let engine = engine();
        engine.apply_playlist(PlaybackPlaylist::empty());
        assert_eq!(engine.mode(), EngineMode::Stopped);
    }
}
