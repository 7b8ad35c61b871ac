//! Bounded, integrity-checked content cache (§4.3).
//!
//! The in-memory index (`DashMap<String, CacheEntry>`) is the runtime
//! source of truth, rebuilt by scanning the cache directory at startup.
//! Concurrent `add` calls for the same `mediaId` are coalesced onto one
//! in-flight download via an `Arc<Notify>` keyed by media id, the same
//! single-flight idiom the teacher applies to concurrent subscription
//! requests for one speaker, generalized here to "one in-flight download
//! per mediaId".

use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Notify;

use crate::error::{SignageError, SignageResult};
use crate::http_client::HttpClient;
use crate::snapshot::types::TimelineItem;
use crate::utils::{now_millis, sanitize_media_id};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Ready,
    Quarantined,
}

/// An entry in the cache index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub media_id: String,
    pub sha256: Option<String>,
    pub size: u64,
    pub last_used_at: u64,
    pub local_path: PathBuf,
    pub status: EntryStatus,
}

/// Content cache with LRU eviction, a now-playing exemption set, and
/// single-flight downloads.
pub struct CacheManager {
    dir: PathBuf,
    max_bytes: u64,
    http: Arc<HttpClient>,
    entries: DashMap<String, CacheEntry>,
    now_playing: DashMap<String, ()>,
    in_flight: DashMap<String, Arc<Notify>>,
}

impl CacheManager {
    pub fn new(dir: PathBuf, max_bytes: u64, http: Arc<HttpClient>) -> Arc<Self> {
        std::fs::create_dir_all(&dir).ok();
        let manager = Arc::new(Self {
            dir,
            max_bytes,
            http,
            entries: DashMap::new(),
            now_playing: DashMap::new(),
            in_flight: DashMap::new(),
        });
        manager.rescan();
        manager
    }

    /// Rebuilds the in-memory index from whatever files already exist on
    /// disk. Sizes are trusted from the filesystem; checksums are not
    /// re-verified (they were verified at write time).
    fn rescan(&self) {
        let Ok(read_dir) = std::fs::read_dir(&self.dir) else {
            return;
        };
        for entry in read_dir.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            self.entries.insert(
                stem.to_string(),
                CacheEntry {
                    media_id: stem.to_string(),
                    sha256: None,
                    size: meta.len(),
                    last_used_at: now_millis(),
                    local_path: path,
                    status: EntryStatus::Ready,
                },
            );
        }
    }

    fn total_bytes(&self) -> u64 {
        self.entries.iter().map(|e| e.size).sum()
    }

    /// True only if the media file is actually present. Touches `lastUsedAt` on hit.
    pub fn has(&self, media_id: &str) -> bool {
        if let Some(mut entry) = self.entries.get_mut(media_id) {
            if entry.local_path.exists() {
                entry.last_used_at = now_millis();
                return true;
            }
        }
        false
    }

    pub fn get(&self, media_id: &str) -> Option<PathBuf> {
        self.entries.get(media_id).map(|e| e.local_path.clone())
    }

    pub fn mark_now_playing(&self, media_id: &str) {
        self.now_playing.insert(media_id.to_string(), ());
    }

    pub fn unmark_now_playing(&self, media_id: &str) {
        self.now_playing.remove(media_id);
    }

    /// Downloads and registers `media_id`, verifying integrity if
    /// `sha256` is provided. Concurrent calls for the same `media_id`
    /// share one in-flight download.
    pub async fn add(&self, media_id: &str, url: &str, sha256: Option<&str>) -> SignageResult<PathBuf> {
        if self.has(media_id) {
            return Ok(self.get(media_id).unwrap());
        }

        // Single-flight: the first caller for a given media_id performs the
        // download; later callers wait on the same Notify and then re-check.
        loop {
            if let Some(notify) = self.in_flight.get(media_id).map(|n| n.clone()) {
                notify.notified().await;
                if self.has(media_id) {
                    return Ok(self.get(media_id).unwrap());
                }
                if self.in_flight.get(media_id).is_none() {
                    // The leader failed; fall through and become the new leader.
                    continue;
                }
                continue;
            }

            let notify = Arc::new(Notify::new());
            if self.in_flight.insert(media_id.to_string(), notify.clone()).is_some() {
                continue;
            }

            let result = self.download_and_store(media_id, url, sha256).await;
            self.in_flight.remove(media_id);
            notify.notify_waiters();
            return result;
        }
    }

    async fn download_and_store(
        &self,
        media_id: &str,
        url: &str,
        expected_sha256: Option<&str>,
    ) -> SignageResult<PathBuf> {
        let bytes = self.http.get_bytes(url).await?;

        let bytes = if let Some(expected) = expected_sha256 {
            let expected = expected.to_string();
            let (bytes, actual) = tokio::task::spawn_blocking(move || {
                let mut hasher = Sha256::new();
                hasher.update(&bytes);
                let actual = hex_encode(&hasher.finalize());
                (bytes, actual)
            })
            .await
            .map_err(|e| SignageError::Internal(format!("hashing task panicked: {e}")))?;
            if !actual.eq_ignore_ascii_case(&expected) {
                return Err(SignageError::IntegrityMismatch {
                    media_id: media_id.to_string(),
                    expected,
                    actual,
                });
            }
            bytes
        } else {
            bytes
        };

        let needed = bytes.len() as u64;
        if needed > self.max_bytes {
            log::warn!("[cache] {media_id} ({needed} bytes) exceeds cache budget, skipping");
            return Err(SignageError::CacheFull(format!(
                "item {needed} bytes exceeds cache budget {}",
                self.max_bytes
            )));
        }
        self.evict_to_fit(needed);

        let ext = guess_extension(url);
        let file_name = format!("{}{}", sanitize_media_id(media_id), ext);
        let path = self.dir.join(file_name);
        crate::utils::atomic_write(&path, &bytes)
            .map_err(|e| SignageError::Internal(format!("writing cache file: {e}")))?;

        self.entries.insert(
            media_id.to_string(),
            CacheEntry {
                media_id: media_id.to_string(),
                sha256: expected_sha256.map(str::to_string),
                size: needed,
                last_used_at: now_millis(),
                local_path: path.clone(),
                status: EntryStatus::Ready,
            },
        );
        Ok(path)
    }

    /// Evicts least-recently-used entries (skipping now-playing ones)
    /// until `needed` additional bytes fit under `max_bytes`.
    fn evict_to_fit(&self, needed: u64) {
        if self.total_bytes() + needed <= self.max_bytes {
            return;
        }
        let mut candidates: Vec<(String, u64)> = self
            .entries
            .iter()
            .filter(|e| !self.now_playing.contains_key(e.key()))
            .map(|e| (e.media_id.clone(), e.last_used_at))
            .collect();
        candidates.sort_by_key(|(_, last_used)| *last_used);

        for (media_id, _) in candidates {
            if self.total_bytes() + needed <= self.max_bytes {
                break;
            }
            if let Some((_, entry)) = self.entries.remove(&media_id) {
                let _ = std::fs::remove_file(&entry.local_path);
                log::debug!("[cache] evicted {media_id} to make room");
            }
        }
    }

    /// Bounded fan-out prefetch: at most `concurrency` downloads in
    /// flight at once, individual failures are logged and ignored.
    pub async fn prefetch(self: &Arc<Self>, items: &[TimelineItem], concurrency: usize) {
        use futures::stream::{self, StreamExt};

        let downloads: Vec<_> = items
            .iter()
            .filter_map(|item| {
                let media_id = item.media_id.clone()?;
                let url = item.remote_url.clone()?;
                Some((media_id, url, item.sha256.clone()))
            })
            .collect();

        stream::iter(downloads)
            .for_each_concurrent(concurrency.max(1), |(media_id, url, sha256)| {
                let cache = self.clone();
                async move {
                    if let Err(e) = cache.add(&media_id, &url, sha256.as_deref()).await {
                        log::warn!("[cache] prefetch failed for {media_id}: {e}");
                    }
                }
            })
            .await;
    }

    /// Removes everything (`force`) or everything except now-playing entries.
    pub fn clear(&self, force: bool) {
        let to_remove: Vec<String> = self
            .entries
            .iter()
            .filter(|e| force || !self.now_playing.contains_key(e.key()))
            .map(|e| e.media_id.clone())
            .collect();
        for media_id in to_remove {
            if let Some((_, entry)) = self.entries.remove(&media_id) {
                let _ = std::fs::remove_file(&entry.local_path);
            }
        }
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }
}

fn guess_extension(url: &str) -> String {
    url.rsplit('/')
        .next()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| format!(".{ext}"))
        .unwrap_or_default()
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guess_extension_from_url() {
        assert_eq!(guess_extension("https://x/a/b.mp4"), ".mp4");
        assert_eq!(guess_extension("https://x/a/b"), "");
    }

    #[tokio::test]
    async fn rescan_picks_up_preexisting_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("m1.jpg"), b"hello").unwrap();
        let http = HttpClient::new("https://example.invalid").unwrap();
        let cache = CacheManager::new(dir.path().to_path_buf(), 1024 * 1024, http);
        assert!(cache.has("m1"));
        assert_eq!(cache.entry_count(), 1);
    }

    #[tokio::test]
    async fn clear_without_force_preserves_now_playing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("m1.jpg"), b"hello").unwrap();
        std::fs::write(dir.path().join("m2.jpg"), b"world").unwrap();
        let http = HttpClient::new("https://example.invalid").unwrap();
        let cache = CacheManager::new(dir.path().to_path_buf(), 1024 * 1024, http);
        cache.mark_now_playing("m1");
        cache.clear(false);
        assert!(cache.has("m1"));
        assert!(!cache.has("m2"));
    }

    #[tokio::test]
    async fn clear_with_force_removes_everything() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("m1.jpg"), b"hello").unwrap();
        let http = HttpClient::new("https://example.invalid").unwrap();
        let cache = CacheManager::new(dir.path().to_path_buf(), 1024 * 1024, http);
        cache.mark_now_playing("m1");
        cache.clear(true);
        assert!(!cache.has("m1"));
    }
}
