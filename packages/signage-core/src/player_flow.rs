//! Player flow state machine (§4.11): the top-level orchestrator that
//! carries a device from first boot through pairing into steady-state
//! playback, and starts/stops every poll loop in the right order.
//!
//! Mirrors the shape of the teacher's `BootstrappedServices` start/stop
//! sequencing: each background loop gets its own `CancellationToken`,
//! started in dependency order and stopped in reverse, with a log line
//! per step so a supervisor reading stdout can tell which stage hung.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::cache::CacheManager;
use crate::collaborators::ScreenshotCapture;
use crate::commands::CommandProcessor;
use crate::config::Config;
use crate::default_media::DefaultMediaService;
use crate::error::{SignageError, SignageResult};
use crate::events::{EventEmitter, PlayerStatusEvent};
use crate::pairing::{DeviceDescriptor, PairingService};
use crate::playback::PlaybackEngine;
use crate::request_queue::RequestQueue;
use crate::snapshot::types::PlaylistMode;
use crate::snapshot::SnapshotManager;

/// Top-level player state, mirrored into every [`PlayerStatusEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PlayerState {
    Boot,
    NeedPairing,
    PairingRequested,
    WaitingConfirmation,
    CertIssued,
    PlaybackRunning,
    OfflineFallback,
}

struct Loops {
    snapshot: CancellationToken,
    commands: CancellationToken,
    default_media: CancellationToken,
    screenshot: CancellationToken,
    request_queue: CancellationToken,
}

/// Orchestrates pairing, snapshot polling, playback, commands, and
/// default-media in one coherent device lifecycle.
pub struct PlayerFlow {
    config: Config,
    pairing: Arc<PairingService>,
    snapshot: Arc<SnapshotManager>,
    cache: Arc<CacheManager>,
    playback: Arc<PlaybackEngine>,
    commands: Arc<CommandProcessor>,
    default_media: Arc<DefaultMediaService>,
    request_queue: Arc<RequestQueue>,
    screenshots: Arc<dyn ScreenshotCapture>,
    emitter: Arc<dyn EventEmitter>,
    state: RwLock<PlayerState>,
    loops: RwLock<Option<Loops>>,
    consecutive_poll_failures: AtomicU32,
}

impl PlayerFlow {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        pairing: Arc<PairingService>,
        snapshot: Arc<SnapshotManager>,
        cache: Arc<CacheManager>,
        playback: Arc<PlaybackEngine>,
        commands: Arc<CommandProcessor>,
        default_media: Arc<DefaultMediaService>,
        request_queue: Arc<RequestQueue>,
        screenshots: Arc<dyn ScreenshotCapture>,
        emitter: Arc<dyn EventEmitter>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            pairing,
            snapshot,
            cache,
            playback,
            commands,
            default_media,
            request_queue,
            screenshots,
            emitter,
            state: RwLock::new(PlayerState::Boot),
            loops: RwLock::new(None),
            consecutive_poll_failures: AtomicU32::new(0),
        })
    }

    pub fn state(&self) -> PlayerState {
        *self.state.read()
    }

    fn set_state(&self, state: PlayerState) {
        log::info!("[player_flow] {:?} -> {state:?}", *self.state.read());
        *self.state.write() = state;
        self.publish_status(None);
    }

    fn publish_status(&self, error: Option<String>) {
        let playlist = self.snapshot.current_playlist();
        self.emitter.emit_player_status(PlayerStatusEvent {
            state: self.state(),
            mode: playlist.mode,
            online: self.state() != PlayerState::OfflineFallback,
            device_id: self.config.device_id.clone(),
            schedule_id: playlist.schedule_id,
            last_snapshot_at: playlist.last_snapshot_at,
            current_media_id: self.playback.current_media_id(),
            error,
        });
    }

    /// Drives the device from boot to steady-state playback. Returns once
    /// pairing completes and background loops are started; does not block
    /// for the lifetime of the process.
    pub async fn start(self: &Arc<Self>, descriptor: &DeviceDescriptor) -> SignageResult<()> {
        self.set_state(PlayerState::Boot);

        if self.config.device_id.is_none() || self.pairing.state() == crate::pairing::PairingState::Unpaired {
            self.run_pairing(descriptor).await?;
        } else {
            self.pairing_from_existing_credentials();
        }

        self.begin_steady_state();
        Ok(())
    }

    fn pairing_from_existing_credentials(&self) {
        if let Some(ref device_id) = self.config.device_id {
            self.snapshot.set_device_id(device_id.clone());
        }
        self.set_state(PlayerState::CertIssued);
    }

    async fn run_pairing(self: &Arc<Self>, descriptor: &DeviceDescriptor) -> SignageResult<()> {
        self.set_state(PlayerState::NeedPairing);

        loop {
            let code = self.pairing.request_pairing_code(descriptor).await?;
            self.set_state(PlayerState::PairingRequested);
            log::info!("[player_flow] pairing code {} issued, awaiting confirmation", code.code);
            self.set_state(PlayerState::WaitingConfirmation);

            loop {
                tokio::time::sleep(Duration::from_secs(5)).await;
                if crate::utils::now_millis() > code.expires_at_ms {
                    log::warn!("[player_flow] pairing code expired before confirmation, requesting a new one");
                    break;
                }
                match self.pairing.fetch_pairing_status().await {
                    Ok(true) => break,
                    Ok(false) => continue,
                    Err(e) if e.is_transient() => continue,
                    Err(e) => return Err(e),
                }
            }

            if self.pairing.state() != crate::pairing::PairingState::Confirmed {
                continue;
            }

            match self.pairing.submit_pairing(&code.code, &code.device_id).await {
                Ok(()) => {
                    self.snapshot.set_device_id(code.device_id.clone());
                    self.set_state(PlayerState::CertIssued);
                    return Ok(());
                }
                Err(SignageError::NotFound(_)) => {
                    log::warn!("[player_flow] pairing code rejected on completion, requesting a new one");
                    self.set_state(PlayerState::NeedPairing);
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn begin_steady_state(self: &Arc<Self>) {
        let weak_self: Weak<Self> = Arc::downgrade(self);
        self.snapshot.set_on_update(Arc::new(move || {
            if let Some(this) = weak_self.upgrade() {
                this.on_playlist_updated();
            }
        }));

        let snapshot_cancel = CancellationToken::new();
        let commands_cancel = CancellationToken::new();
        let default_media_cancel = CancellationToken::new();
        let screenshot_cancel = CancellationToken::new();
        let request_queue_cancel = CancellationToken::new();

        log::info!("[player_flow] starting snapshot poll loop");
        tokio::spawn(
            self.snapshot
                .clone()
                .run(Duration::from_millis(self.config.intervals.schedule_poll_ms), snapshot_cancel.clone()),
        );

        log::info!("[player_flow] starting command poll loop");
        tokio::spawn(
            self.commands
                .clone()
                .run(Duration::from_millis(self.config.intervals.command_poll_ms), commands_cancel.clone()),
        );

        log::info!("[player_flow] starting default-media poll loop");
        tokio::spawn(
            self.default_media
                .clone()
                .run(Duration::from_millis(self.config.intervals.default_media_poll_ms), default_media_cancel.clone()),
        );

        log::info!("[player_flow] starting screenshot loop");
        let this = self.clone();
        let screenshot_interval = Duration::from_millis(self.config.intervals.screenshot_ms);
        let cancel_for_screenshot = screenshot_cancel.clone();
        tokio::spawn(async move { this.run_screenshot_loop(screenshot_interval, cancel_for_screenshot).await });

        log::info!("[player_flow] starting request queue drain loop");
        tokio::spawn(
            self.request_queue
                .clone()
                .run(Duration::from_millis(self.config.intervals.command_poll_ms), request_queue_cancel.clone()),
        );

        *self.loops.write() = Some(Loops {
            snapshot: snapshot_cancel,
            commands: commands_cancel,
            default_media: default_media_cancel,
            screenshot: screenshot_cancel,
            request_queue: request_queue_cancel,
        });

        self.playback.apply_playlist(self.snapshot.current_playlist());
        self.reflect_playlist_mode();
    }

    fn reflect_playlist_mode(&self) {
        let mode = self.snapshot.current_playlist().mode;
        match mode {
            PlaylistMode::Offline | PlaylistMode::Empty => self.set_state(PlayerState::OfflineFallback),
            PlaylistMode::Normal | PlaylistMode::Emergency | PlaylistMode::Default => {
                self.set_state(PlayerState::PlaybackRunning)
            }
        }
    }

    /// Called whenever the snapshot manager produces a fresh playlist.
    pub fn on_playlist_updated(self: &Arc<Self>) {
        self.playback.apply_playlist(self.snapshot.current_playlist());
        self.reflect_playlist_mode();
        self.consecutive_poll_failures.store(0, Ordering::SeqCst);
    }

    async fn run_screenshot_loop(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    log::info!("[player_flow] stopping screenshot loop");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.screenshots.capture_and_upload().await {
                        log::warn!("[player_flow] screenshot capture failed: {e}");
                    }
                }
            }
        }
    }

    /// Stops every background loop in reverse start order and clears playback.
    pub fn stop(&self) {
        if let Some(loops) = self.loops.write().take() {
            log::info!("[player_flow] stopping request queue drain loop");
            loops.request_queue.cancel();
            log::info!("[player_flow] stopping screenshot loop");
            loops.screenshot.cancel();
            log::info!("[player_flow] stopping default-media poll loop");
            loops.default_media.cancel();
            log::info!("[player_flow] stopping command poll loop");
            loops.commands.cancel();
            log::info!("[player_flow] stopping snapshot poll loop");
            loops.snapshot.cancel();
        }
        self.playback.stop();
        self.cache.clear(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheManager;
    use crate::cert::{CertPaths, CertificateManager};
    use crate::collaborators::{
        NoopProofOfPlaySink, NoopRendererSink, NoopScreenshotCapture, NoopTelemetrySink,
    };
    use crate::commands::CommandProcessor;
    use crate::default_media::DefaultMediaService;
    use crate::events::NoopEventEmitter;
    use crate::http_client::HttpClient;
    use crate::lifecycle::NoopLifecycle;

    fn flow() -> (tempfile::TempDir, Arc<PlayerFlow>) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.api_base = "https://example.invalid".to_string();
        let http = HttpClient::new(config.api_base.clone()).unwrap();
        let cert_manager = Arc::new(CertificateManager::new(CertPaths::under(dir.path())));
        let pairing = PairingService::new(http.clone(), cert_manager);
        let cache = CacheManager::new(dir.path().join("cache"), config.cache.max_bytes, http.clone());
        let emitter: Arc<dyn EventEmitter> = Arc::new(NoopEventEmitter);
        let snapshot = SnapshotManager::new(
            http.clone(),
            cache.clone(),
            emitter.clone(),
            dir.path().join("snapshot.json"),
            config.cache.prefetch_concurrency,
        );
        let playback = PlaybackEngine::new(
            cache.clone(),
            Arc::new(NoopRendererSink),
            Arc::new(NoopProofOfPlaySink),
            Arc::new(NoopTelemetrySink),
            emitter.clone(),
        );
        let request_queue = RequestQueue::new(http.clone(), dir.path().join("ack-queue.json"));
        let commands = CommandProcessor::new(
            http.clone(),
            snapshot.clone(),
            cache.clone(),
            Arc::new(NoopScreenshotCapture),
            Arc::new(NoopLifecycle),
            emitter.clone(),
            request_queue.clone(),
        );
        let default_media = DefaultMediaService::new(
            http.clone(),
            cache.clone(),
            emitter.clone(),
            dir.path().join("default-media.json"),
        );
        let flow = PlayerFlow::new(
            config,
            pairing,
            snapshot,
            cache,
            playback,
            commands,
            default_media,
            request_queue,
            Arc::new(NoopScreenshotCapture),
            emitter,
        );
        (dir, flow)
    }

    #[test]
    fn starts_in_boot_state() {
        let (_dir, flow) = flow();
        assert_eq!(flow.state(), PlayerState::Boot);
    }

    #[test]
    fn stop_is_idempotent_before_start() {
        let (_dir, flow) = flow();
        flow.stop();
        flow.stop();
    }
}
