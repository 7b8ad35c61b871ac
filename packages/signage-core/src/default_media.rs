//! Default (fallback) media poller (§4.12): independently polls the
//! backend's default-media setting, downloads and persists it, and
//! notifies on change. Runs on its own schedule, decoupled from the
//! snapshot poll loop, since the default media changes far less often.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::cache::CacheManager;
use crate::events::{DefaultMediaEvent, EventEmitter};
use crate::http_client::HttpClient;
use crate::snapshot::types::{Fit, MediaType};

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DefaultMediaSetting {
    #[serde(rename = "mediaId")]
    pub media_id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub media_type: Option<MediaType>,
    #[serde(default)]
    pub fit: Option<Fit>,
    #[serde(default)]
    pub sha256: Option<String>,
}

/// Polls `/api/v1/settings/default-media`, keeps the local copy in sync,
/// and emits [`DefaultMediaEvent::Changed`] when the effective setting
/// changes across any tracked field.
pub struct DefaultMediaService {
    http: Arc<HttpClient>,
    cache: Arc<CacheManager>,
    emitter: Arc<dyn EventEmitter>,
    persist_path: PathBuf,
    current: RwLock<Option<DefaultMediaSetting>>,
    refresh_notify: Arc<Notify>,
}

impl DefaultMediaService {
    pub fn new(
        http: Arc<HttpClient>,
        cache: Arc<CacheManager>,
        emitter: Arc<dyn EventEmitter>,
        persist_path: PathBuf,
    ) -> Arc<Self> {
        let current = load_persisted(&persist_path);
        Arc::new(Self {
            http,
            cache,
            emitter,
            persist_path,
            current: RwLock::new(current),
            refresh_notify: Arc::new(Notify::new()),
        })
    }

    pub fn current(&self) -> Option<DefaultMediaSetting> {
        self.current.read().clone()
    }

    pub fn local_path(&self) -> Option<PathBuf> {
        let media_id = self.current.read().as_ref()?.media_id.clone()?;
        self.cache.get(&media_id)
    }

    pub fn request_refresh(&self) {
        self.refresh_notify.notify_one();
    }

    pub async fn poll_once(&self) {
        let setting: DefaultMediaSetting = match self.http.get("/api/v1/settings/default-media").await {
            Ok(setting) => setting,
            Err(e) => {
                log::debug!("[default_media] poll failed: {e}");
                return;
            }
        };

        let changed = self.current.read().as_ref() != Some(&setting);
        if !changed {
            return;
        }

        if let (Some(ref media_id), Some(ref url)) = (&setting.media_id, &setting.url) {
            if let Err(e) = self.cache.add(media_id, url, setting.sha256.as_deref()).await {
                log::warn!("[default_media] failed to download {media_id}: {e}");
            }
        }

        if let Err(e) = crate::utils::atomic_write_json(&self.persist_path, &setting) {
            log::warn!("[default_media] failed to persist: {e}");
        }

        *self.current.write() = Some(setting.clone());
        self.emitter.emit_default_media(DefaultMediaEvent::Changed {
            media_id: setting.media_id,
            timestamp: crate::utils::now_millis(),
        });
    }

    /// Runs the poll loop until `cancel` fires.
    pub async fn run(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let notify = self.refresh_notify.clone();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    log::info!("[default_media] stopping poll loop");
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

fn load_persisted(path: &std::path::Path) -> Option<DefaultMediaSetting> {
    let bytes = std::fs::read(path).ok()?;
    serde_json::from_slice(&bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> (tempfile::TempDir, Arc<DefaultMediaService>) {
        let dir = tempfile::tempdir().unwrap();
        let http = HttpClient::new("https://example.invalid").unwrap();
        let cache = CacheManager::new(dir.path().join("cache"), 1024 * 1024 * 1024, http.clone());
        let emitter: Arc<dyn EventEmitter> = Arc::new(crate::events::NoopEventEmitter);
        let service = DefaultMediaService::new(http, cache, emitter, dir.path().join("default-media.json"));
        (dir, service)
    }

    #[test]
    fn starts_with_no_setting() {
        let (_dir, service) = service();
        assert!(service.current().is_none());
    }

    #[test]
    fn persisted_setting_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let setting = DefaultMediaSetting {
            media_id: Some("fallback-1".to_string()),
            url: Some("https://x/fallback.jpg".to_string()),
            media_type: Some(MediaType::Image),
            fit: Some(Fit::Contain),
            sha256: None,
        };
        let path = dir.path().join("default-media.json");
        crate::utils::atomic_write_json(&path, &setting).unwrap();
        let loaded = load_persisted(&path).unwrap();
        assert_eq!(loaded, setting);
    }
}
