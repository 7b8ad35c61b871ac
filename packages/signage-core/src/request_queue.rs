//! Persistent retry queue for fire-and-forget backend POSTs (§4.2).
//!
//! Used by the command processor to retry a failed acknowledgement POST
//! without losing it across restarts. Persistence follows the
//! atomic-write idiom in [`crate::utils::atomic_write_json`]; the backoff
//! schedule generalizes the teacher's fixed-delay retry table into a
//! computed exponential sequence capped at a maximum delay.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::http_client::HttpClient;

/// A single queued delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedRequest {
    pub id: String,
    pub path: String,
    pub payload: serde_json::Value,
    pub max_retries: u32,
    pub attempts: u32,
}

const BASE_DELAY_MS: u64 = 500;
const MAX_DELAY_MS: u64 = 30_000;

fn backoff_delay(attempt: u32) -> Duration {
    let ms = BASE_DELAY_MS.saturating_mul(1u64 << attempt.min(10));
    Duration::from_millis(ms.min(MAX_DELAY_MS))
}

/// Background-drained persistent request queue.
pub struct RequestQueue {
    http: Arc<HttpClient>,
    persist_path: PathBuf,
    items: Mutex<Vec<QueuedRequest>>,
}

impl RequestQueue {
    pub fn new(http: Arc<HttpClient>, persist_path: PathBuf) -> Arc<Self> {
        let items = load(&persist_path).unwrap_or_default();
        Arc::new(Self {
            http,
            persist_path,
            items: Mutex::new(items),
        })
    }

    /// Enqueues a request for retried delivery and persists the queue.
    pub fn enqueue(&self, path: impl Into<String>, payload: serde_json::Value, max_retries: u32) {
        let item = QueuedRequest {
            id: uuid::Uuid::new_v4().to_string(),
            path: path.into(),
            payload,
            max_retries,
            attempts: 0,
        };
        let mut items = self.items.lock();
        items.push(item);
        self.persist(&items);
    }

    fn persist(&self, items: &[QueuedRequest]) {
        if let Err(e) = crate::utils::atomic_write_json(&self.persist_path, &items) {
            log::warn!("[request_queue] failed to persist queue: {e}");
        }
    }

    /// Drains the queue once, attempting delivery of every item in order
    /// with the exponential backoff schedule applied between attempts of
    /// the *same* item. Items exceeding `max_retries` are dropped.
    pub async fn drain_once(&self) {
        let pending: Vec<QueuedRequest> = self.items.lock().clone();
        let mut remaining = Vec::new();

        for mut item in pending {
            if item.attempts > 0 {
                tokio::time::sleep(backoff_delay(item.attempts - 1)).await;
            }
            match self.http.post_no_content(&item.path, &item.payload).await {
                Ok(()) => {
                    log::debug!("[request_queue] delivered {}", item.id);
                }
                Err(e) => {
                    item.attempts += 1;
                    if item.attempts >= item.max_retries {
                        log::warn!(
                            "[request_queue] dropping {} after {} attempts: {e}",
                            item.id,
                            item.attempts
                        );
                    } else {
                        remaining.push(item);
                    }
                }
            }
        }

        let mut items = self.items.lock();
        *items = remaining;
        self.persist(&items);
    }

    /// Runs the drain loop until `cancel` fires, checking every `interval`.
    pub async fn run(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    log::info!("[request_queue] stopping drain loop");
                    break;
                }
                _ = ticker.tick() => {
                    self.drain_once().await;
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn load(path: &std::path::Path) -> Option<Vec<QueuedRequest>> {
    let bytes = std::fs::read(path).ok()?;
    serde_json::from_slice(&bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        assert_eq!(backoff_delay(0), Duration::from_millis(500));
        assert_eq!(backoff_delay(1), Duration::from_millis(1000));
        assert!(backoff_delay(20) <= Duration::from_millis(MAX_DELAY_MS));
    }

    #[tokio::test]
    async fn enqueue_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.json");
        let http = HttpClient::new("https://example.invalid").unwrap();
        let queue = RequestQueue::new(http.clone(), path.clone());
        queue.enqueue("/v1/ack", serde_json::json!({"ok": true}), 3);
        assert_eq!(queue.len(), 1);

        let reloaded = RequestQueue::new(http, path);
        assert_eq!(reloaded.len(), 1);
    }
}
