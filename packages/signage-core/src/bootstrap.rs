//! Application bootstrap and dependency wiring.
//!
//! This module contains the composition root - the single place where all
//! services are instantiated and wired together. This pattern provides:
//!
//! - **Clarity**: All dependency relationships are visible in one place
//! - **Testability**: Easy to swap implementations for testing
//! - **Maintainability**: Service creation logic is isolated from usage

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::cache::CacheManager;
use crate::cert::{CertPaths, CertificateManager};
use crate::collaborators::{
    NoopProofOfPlaySink, NoopRendererSink, NoopScreenshotCapture, NoopTelemetrySink,
    ProofOfPlaySink, RendererSink, ScreenshotCapture, TelemetrySink,
};
use crate::commands::CommandProcessor;
use crate::config::Config;
use crate::default_media::DefaultMediaService;
use crate::error::{SignageError, SignageResult};
use crate::events::{BroadcastEvent, BroadcastEventBridge, EventEmitter};
use crate::http_client::HttpClient;
use crate::lifecycle::{Lifecycle, ServerLifecycle};
use crate::pairing::PairingService;
use crate::player_flow::PlayerFlow;
use crate::playback::PlaybackEngine;
use crate::protocol_constants::EVENT_CHANNEL_CAPACITY;
use crate::request_queue::RequestQueue;
use crate::runtime::TokioSpawner;
use crate::snapshot::SnapshotManager;

/// On-disk layout for everything this crate persists under a single data directory.
pub struct DataPaths {
    pub root: PathBuf,
}

impl DataPaths {
    pub fn under(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn cert_dir(&self) -> PathBuf {
        self.root.join("certs")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.root.join("cache")
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.root.join("snapshot.json")
    }

    pub fn default_media_path(&self) -> PathBuf {
        self.root.join("default-media.json")
    }

    pub fn command_queue_path(&self) -> PathBuf {
        self.root.join("command-ack-queue.json")
    }
}

/// Container for all bootstrapped services.
///
/// This struct holds all the wired services created during bootstrap.
/// It's consumed by the binary to drive the device lifecycle.
#[derive(Clone)]
pub struct BootstrappedServices {
    pub http: Arc<HttpClient>,
    pub cert_manager: Arc<CertificateManager>,
    pub pairing: Arc<PairingService>,
    pub cache: Arc<CacheManager>,
    pub snapshot: Arc<SnapshotManager>,
    pub playback: Arc<PlaybackEngine>,
    pub commands: Arc<CommandProcessor>,
    pub default_media: Arc<DefaultMediaService>,
    pub request_queue: Arc<RequestQueue>,
    pub player_flow: Arc<PlayerFlow>,
    pub broadcast_tx: broadcast::Sender<BroadcastEvent>,
    pub event_bridge: Arc<BroadcastEventBridge>,
    pub lifecycle: Arc<dyn Lifecycle>,
    pub spawner: TokioSpawner,
}

impl BootstrappedServices {
    /// Stops every background loop and clears in-flight playback state.
    pub async fn shutdown(&self) {
        log::info!("[bootstrap] beginning graceful shutdown");
        self.player_flow.stop();
        log::info!("[bootstrap] shutdown complete");
    }
}

/// Collaborator implementations supplied by the embedding host (renderer,
/// proof-of-play pipeline, telemetry shipper, screenshot capture). A
/// headless agent without a host binds `Noop` implementations for all
/// four.
pub struct Collaborators {
    pub renderer: Arc<dyn RendererSink>,
    pub proof_of_play: Arc<dyn ProofOfPlaySink>,
    pub telemetry: Arc<dyn TelemetrySink>,
    pub screenshots: Arc<dyn ScreenshotCapture>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            renderer: Arc::new(NoopRendererSink),
            proof_of_play: Arc::new(NoopProofOfPlaySink),
            telemetry: Arc::new(NoopTelemetrySink),
            screenshots: Arc::new(NoopScreenshotCapture),
        }
    }
}

/// Bootstraps all application services with their dependencies.
///
/// This is the composition root where all services are instantiated and
/// wired together. The wiring order matters - services are created in
/// dependency order:
///
/// 1. Data paths and the shared broadcast channel / event bridge
/// 2. HTTP client (no mTLS identity yet) and certificate manager
/// 3. Pairing service (depends on HTTP client + certificate manager)
/// 4. Cache manager (depends on HTTP client for downloads)
/// 5. Snapshot manager (depends on HTTP client, cache, event bridge)
/// 6. Playback engine (depends on cache, collaborators, event bridge)
/// 7. Durable request queue (depends on HTTP client)
/// 8. Command processor (depends on HTTP client, snapshot, cache, collaborators, lifecycle, request queue)
/// 9. Default-media service (depends on HTTP client, cache, event bridge)
/// 10. Player flow (depends on everything above)
///
/// If existing mTLS credentials are on disk and valid, the HTTP client's
/// identity is installed before returning so the pairing step can be
/// skipped.
///
/// # Errors
///
/// Returns an error if `config.validate()` fails or the HTTP client
/// cannot be constructed.
pub fn bootstrap_services(
    config: &Config,
    data_root: PathBuf,
    collaborators: Collaborators,
) -> SignageResult<BootstrappedServices> {
    config.validate()?;

    let paths = DataPaths::under(data_root);
    std::fs::create_dir_all(&paths.root)
        .map_err(|e| SignageError::Internal(format!("creating data directory: {e}")))?;

    let (broadcast_tx, _) = broadcast::channel::<BroadcastEvent>(EVENT_CHANNEL_CAPACITY);
    let event_bridge = Arc::new(BroadcastEventBridge::with_sender(broadcast_tx.clone()));
    let emitter: Arc<dyn EventEmitter> = event_bridge.clone();

    let http = HttpClient::new(config.api_base.clone())?;

    let cert_manager = Arc::new(CertificateManager::new(CertPaths::under(&paths.cert_dir())));
    if cert_manager.verify_certificate() {
        if let Ok((cert_pem, key_pem, ca_pem)) = cert_manager.read_pem_bundle() {
            http.set_identity(crate::http_client::MtlsIdentity {
                cert_pem,
                key_pem,
                ca_pem,
            })?;
            log::info!("[bootstrap] restored mTLS identity from existing certificate");
        }
    }

    let pairing = PairingService::new(http.clone(), cert_manager.clone());

    let cache = CacheManager::new(paths.cache_dir(), config.cache.max_bytes, http.clone());

    let snapshot = SnapshotManager::new(
        http.clone(),
        cache.clone(),
        emitter.clone(),
        paths.snapshot_path(),
        config.cache.prefetch_concurrency,
    );
    if let Some(ref device_id) = config.device_id {
        snapshot.set_device_id(device_id.clone());
    }

    let playback = PlaybackEngine::new(
        cache.clone(),
        collaborators.renderer,
        collaborators.proof_of_play,
        collaborators.telemetry,
        emitter.clone(),
    );

    let lifecycle: Arc<dyn Lifecycle> = Arc::new(ServerLifecycle);

    let request_queue = RequestQueue::new(http.clone(), paths.command_queue_path());

    let commands = CommandProcessor::new(
        http.clone(),
        snapshot.clone(),
        cache.clone(),
        collaborators.screenshots.clone(),
        lifecycle.clone(),
        emitter.clone(),
        request_queue.clone(),
    );

    let default_media = DefaultMediaService::new(
        http.clone(),
        cache.clone(),
        emitter.clone(),
        paths.default_media_path(),
    );

    let player_flow = PlayerFlow::new(
        config.clone(),
        pairing.clone(),
        snapshot.clone(),
        cache.clone(),
        playback.clone(),
        commands.clone(),
        default_media.clone(),
        request_queue.clone(),
        collaborators.screenshots,
        emitter,
    );

    let spawner = TokioSpawner::current();

    Ok(BootstrappedServices {
        http,
        cert_manager,
        pairing,
        cache,
        snapshot,
        playback,
        commands,
        default_media,
        request_queue,
        player_flow,
        broadcast_tx,
        event_bridge,
        lifecycle,
        spawner,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bootstrap_fails_without_valid_api_base() {
        let config = Config::default();
        let dir = tempfile::tempdir().unwrap();
        let result = bootstrap_services(&config, dir.path().to_path_buf(), Collaborators::default());
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn bootstrap_wires_all_services_with_valid_config() {
        let mut config = Config::default();
        config.api_base = "https://cms.example.invalid".to_string();
        let dir = tempfile::tempdir().unwrap();
        let services =
            bootstrap_services(&config, dir.path().to_path_buf(), Collaborators::default()).unwrap();
        assert_eq!(services.pairing.state(), crate::pairing::PairingState::Unpaired);
        assert_eq!(services.commands.history().len(), 0);
    }
}
