//! Snapshot manager (§4.7): the periodic poll loop that turns a backend
//! snapshot into a locally playable [`PlaybackPlaylist`].
//!
//! The poll loop follows the teacher's `topology_monitor.rs` shape: a
//! `tokio::select!` over an interval tick, a manual-refresh `Notify`, and
//! a `CancellationToken` for shutdown, with `interval.reset()` on manual
//! refresh so a forced refresh is never immediately followed by another
//! automatic one.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::cache::CacheManager;
use crate::error::SignageResult;
use crate::events::{EventEmitter, PlaylistEvent};
use crate::http_client::HttpClient;

use super::parser::parse_snapshot_response;
use super::types::{NormalizedSnapshot, PlaybackPlaylist, PlaylistMode, TimelineItem};

fn derive_mode(
    snapshot: Option<&NormalizedSnapshot>,
    last_good: Option<&PlaybackPlaylist>,
) -> (PlaylistMode, Vec<TimelineItem>) {
    let Some(snapshot) = snapshot else {
        return match last_good {
            Some(playlist) if !playlist.items.is_empty() => {
                (PlaylistMode::Offline, playlist.items.clone())
            }
            _ => (PlaylistMode::Empty, Vec::new()),
        };
    };

    if let Some(ref emergency) = snapshot.emergency_item {
        return (PlaylistMode::Emergency, vec![emergency.clone()]);
    }
    if !snapshot.items.is_empty() {
        return (PlaylistMode::Normal, snapshot.items.clone());
    }
    if let Some(ref default_item) = snapshot.default_item {
        return (PlaylistMode::Default, vec![default_item.clone()]);
    }
    match last_good {
        Some(playlist) if !playlist.items.is_empty() => {
            (PlaylistMode::Offline, playlist.items.clone())
        }
        _ => (PlaylistMode::Empty, Vec::new()),
    }
}

pub struct SnapshotManager {
    http: Arc<HttpClient>,
    cache: Arc<CacheManager>,
    emitter: Arc<dyn EventEmitter>,
    device_id: RwLock<Option<String>>,
    persist_path: PathBuf,
    prefetch_concurrency: usize,
    last_snapshot: RwLock<Option<NormalizedSnapshot>>,
    last_playlist: RwLock<PlaybackPlaylist>,
    refresh_notify: Arc<Notify>,
    paired: AtomicBool,
    on_update: RwLock<Option<Arc<dyn Fn() + Send + Sync>>>,
}

impl SnapshotManager {
    pub fn new(
        http: Arc<HttpClient>,
        cache: Arc<CacheManager>,
        emitter: Arc<dyn EventEmitter>,
        persist_path: PathBuf,
        prefetch_concurrency: usize,
    ) -> Arc<Self> {
        let last_snapshot = load_persisted(&persist_path);
        Arc::new(Self {
            http,
            cache,
            emitter,
            device_id: RwLock::new(None),
            persist_path,
            prefetch_concurrency,
            last_snapshot: RwLock::new(last_snapshot),
            last_playlist: RwLock::new(PlaybackPlaylist::empty()),
            refresh_notify: Arc::new(Notify::new()),
            paired: AtomicBool::new(false),
            on_update: RwLock::new(None),
        })
    }

    pub fn set_device_id(&self, device_id: String) {
        *self.device_id.write() = Some(device_id);
        self.paired.store(true, Ordering::SeqCst);
    }

    /// Registers a callback run after every poll cycle (success or
    /// fallback), so playback picks up schedule changes, emergency
    /// activation, or a drop to offline mode without waiting for someone
    /// to separately subscribe to the broadcast event bridge.
    pub fn set_on_update(&self, callback: Arc<dyn Fn() + Send + Sync>) {
        *self.on_update.write() = Some(callback);
    }

    pub fn current_playlist(&self) -> PlaybackPlaylist {
        self.last_playlist.read().clone()
    }

    /// Requests an out-of-cycle refresh (used by the `REFRESH_SCHEDULE` command).
    pub fn request_refresh(&self) {
        self.refresh_notify.notify_one();
    }

    /// Runs one poll cycle: fetch → parse → persist → prefetch → build playlist → emit.
    pub async fn poll_once(&self) {
        if !self.paired.load(Ordering::SeqCst) {
            return;
        }
        let Some(device_id) = self.device_id.read().clone() else {
            return;
        };

        match self.fetch_and_process(&device_id, false).await {
            Ok(playlist) => {
                *self.last_playlist.write() = playlist;
            }
            Err(e) => {
                log::warn!("[snapshot_manager] poll failed, falling back: {e}");
                let last_snapshot = self.last_snapshot.read().clone();
                let last_playlist = self.last_playlist.read().clone();
                let (mode, items) = derive_mode(last_snapshot.as_ref(), Some(&last_playlist));
                *self.last_playlist.write() = PlaybackPlaylist {
                    mode,
                    items,
                    schedule_id: last_snapshot.as_ref().and_then(|s| s.schedule_id.clone()),
                    snapshot_id: last_snapshot.as_ref().and_then(|s| s.snapshot_id.clone()),
                    last_snapshot_at: last_snapshot.as_ref().map(|s| s.fetched_at),
                };
            }
        }

        let playlist = self.last_playlist.read().clone();
        self.emitter.emit_playlist(PlaylistEvent::Updated {
            mode: playlist.mode,
            item_count: playlist.items.len(),
            schedule_id: playlist.schedule_id.clone(),
            timestamp: crate::utils::now_millis(),
        });

        let callback = self.on_update.read().clone();
        if let Some(callback) = callback {
            callback();
        }
    }

fn fetch_and_process<'a>(
        &'a self,
        device_id: &'a str,
        is_retry: bool,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = SignageResult<PlaybackPlaylist>> + Send + 'a>> {
        Box::pin(self.fetch_and_process_inner(device_id, is_retry))
    }

    async fn fetch_and_process_inner(
        &self,
        device_id: &str,
        is_retry: bool,
    ) -> SignageResult<PlaybackPlaylist> {
        let path = format!("/api/v1/device/{device_id}/snapshot?include_urls=true");
        let raw: serde_json::Value = match self.http.get(&path).await {
            Ok(raw) => raw,
            Err(e) if e.code() == "not_found" => {
                let last_playlist = self.last_playlist.read().clone();
                let (mode, items) = derive_mode(None, Some(&last_playlist));
                return Ok(PlaybackPlaylist {
                    mode,
                    items,
                    schedule_id: last_playlist.schedule_id,
                    snapshot_id: last_playlist.snapshot_id,
                    last_snapshot_at: last_playlist.last_snapshot_at,
                });
            }
            Err(e) => return Err(e),
        };

        let snapshot = parse_snapshot_response(raw.clone())?;
        self.persist_snapshot(&raw);

        let mut items_to_fetch = snapshot.items.clone();
        if let Some(ref e) = snapshot.emergency_item {
            items_to_fetch.push(e.clone());
        }
        if let Some(ref d) = snapshot.default_item {
            items_to_fetch.push(d.clone());
        }

        if let Some(expired_media_id) = self.prefetch_and_detect_expiry(&items_to_fetch).await {
            if !is_retry {
                log::info!(
                    "[snapshot_manager] signed URL expired for {expired_media_id}, refetching snapshot once"
                );
                return self.fetch_and_process(device_id, true).await;
            }
            log::warn!("[snapshot_manager] signed URL for {expired_media_id} expired again after retry");
        }

        let (mode, mut items) = derive_mode(Some(&snapshot), Some(&self.last_playlist.read()));
        self.attach_local_media(&mut items);

        *self.last_snapshot.write() = Some(snapshot.clone());

        Ok(PlaybackPlaylist {
            mode,
            items,
            schedule_id: snapshot.schedule_id,
            snapshot_id: snapshot.snapshot_id,
            last_snapshot_at: Some(snapshot.fetched_at),
        })
    }

    /// Downloads every referenced item into the cache. Individual failures
    /// are logged as warnings and ignored, except a `URL_EXPIRED` signal,
    /// whose media id is returned so the caller can trigger the single
    /// permitted snapshot refetch.
    async fn prefetch_and_detect_expiry(&self, items: &[TimelineItem]) -> Option<String> {
        for item in items {
            let (Some(media_id), Some(url)) = (item.media_id.as_ref(), item.remote_url.as_ref()) else {
                continue;
            };
            match self.cache.add(media_id, url, item.sha256.as_deref()).await {
                Ok(_) => {}
                Err(e) if e.is_url_expired() => return Some(media_id.clone()),
                Err(e) => log::warn!("[snapshot_manager] failed to cache {media_id}: {e}"),
            }
        }
        None
    }

    /// Attaches local cache paths and drops items whose media is not cached.
    fn attach_local_media(&self, items: &mut Vec<TimelineItem>) {
        items.retain_mut(|item| {
            let Some(ref media_id) = item.media_id else {
                return true;
            };
            match self.cache.get(media_id) {
                Some(path) => {
                    item.local_path = Some(path.to_string_lossy().to_string());
                    true
                }
                None => false,
            }
        });
    }

    fn persist_snapshot(&self, raw: &serde_json::Value) {
        if let Err(e) = crate::utils::atomic_write_json(&self.persist_path, raw) {
            log::warn!("[snapshot_manager] failed to persist snapshot: {e}");
        }
    }

    /// Runs the poll loop until `cancel` fires.
    pub async fn run(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let notify = self.refresh_notify.clone();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    log::info!("[snapshot_manager] stopping poll loop");
                    break;
                }
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
                _ = notify.notified() => {
                    self.poll_once().await;
                    ticker.reset();
                }
            }
        }
    }
}

fn load_persisted(path: &std::path::Path) -> Option<NormalizedSnapshot> {
    let bytes = std::fs::read(path).ok()?;
    let raw: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    parse_snapshot_response(raw).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::types::{Fit, MediaType};

    fn item(id: &str) -> TimelineItem {
        TimelineItem {
            id: id.to_string(),
            media_id: Some(id.to_string()),
            media_type: MediaType::Image,
            remote_url: Some(format!("https://x/{id}.jpg")),
            local_path: None,
            local_url: None,
            display_ms: 10_000,
            fit: Fit::Contain,
            muted: false,
            sha256: None,
            transition_duration_ms: 0,
            meta: serde_json::Value::Null,
        }
    }

    #[test]
    fn mode_precedence_emergency_beats_everything() {
        let snapshot = NormalizedSnapshot {
            snapshot_id: None,
            schedule_id: None,
            items: vec![item("a")],
            emergency_item: Some(item("e")),
            default_item: Some(item("d")),
            media_url_map: Default::default(),
            fetched_at: 0,
            raw: serde_json::Value::Null,
        };
        let (mode, items) = derive_mode(Some(&snapshot), None);
        assert_eq!(mode, PlaylistMode::Emergency);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "e");
    }

    #[test]
    fn mode_falls_back_to_default_when_no_items() {
        let snapshot = NormalizedSnapshot {
            snapshot_id: None,
            schedule_id: None,
            items: vec![],
            emergency_item: None,
            default_item: Some(item("d")),
            media_url_map: Default::default(),
            fetched_at: 0,
            raw: serde_json::Value::Null,
        };
        let (mode, _) = derive_mode(Some(&snapshot), None);
        assert_eq!(mode, PlaylistMode::Default);
    }

    #[test]
    fn mode_is_empty_with_no_snapshot_and_no_cache() {
        let (mode, items) = derive_mode(None, None);
        assert_eq!(mode, PlaylistMode::Empty);
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn on_update_callback_fires_after_poll_once() {
        let dir = tempfile::tempdir().unwrap();
        let http = HttpClient::new("https://example.invalid").unwrap();
        let cache = CacheManager::new(dir.path().join("cache"), 0, http.clone());
        let emitter: Arc<dyn EventEmitter> = Arc::new(crate::events::NoopEventEmitter);
        let manager = SnapshotManager::new(http, cache, emitter, dir.path().join("snapshot.json"), 1);
        manager.set_device_id("dev-1".to_string());

        let fired = Arc::new(AtomicBool::new(false));
        let fired_for_callback = fired.clone();
        manager.set_on_update(Arc::new(move || {
            fired_for_callback.store(true, Ordering::SeqCst);
        }));

        manager.poll_once().await;
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn mode_is_offline_with_no_snapshot_but_cached_playlist() {
        let cached = PlaybackPlaylist {
            mode: PlaylistMode::Normal,
            items: vec![item("a")],
            schedule_id: None,
            snapshot_id: None,
            last_snapshot_at: None,
        };
        let (mode, items) = derive_mode(None, Some(&cached));
        assert_eq!(mode, PlaylistMode::Offline);
        assert_eq!(items.len(), 1);
    }
}
