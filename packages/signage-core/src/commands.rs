//! Remote command processor (§4.10): polls for operator-issued commands,
//! dispatches them, rate-limits repeats, and acknowledges outcomes back
//! to the backend (queuing the ack on failure).
//!
//! Poll-loop shape follows the same `tokio::select!` + `CancellationToken`
//! idiom used throughout this crate (see `snapshot::manager`).

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::cache::CacheManager;
use crate::collaborators::ScreenshotCapture;
use crate::error::SignageResult;
use crate::events::{CommandEvent, EventEmitter};
use crate::http_client::HttpClient;
use crate::lifecycle::Lifecycle;
use crate::protocol_constants::{COMMAND_ACK_MAX_RETRIES, COMMAND_HISTORY_SIZE, COMMAND_RATE_LIMIT_MS, REBOOT_DELAY_MS};
use crate::request_queue::RequestQueue;
use crate::snapshot::SnapshotManager;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteCommand {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommandsResponse {
    #[serde(default)]
    commands: Vec<RemoteCommand>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct CommandAck {
    #[serde(rename = "commandId")]
    command_id: String,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<serde_json::Value>,
}

/// Bounded record of a processed command, kept for diagnostics.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub success: bool,
    pub timestamp: u64,
}

/// Polls for remote commands and dispatches them to the appropriate
/// subsystem.
pub struct CommandProcessor {
    http: Arc<HttpClient>,
    snapshot: Arc<SnapshotManager>,
    cache: Arc<CacheManager>,
    screenshots: Arc<dyn ScreenshotCapture>,
    lifecycle: Arc<dyn Lifecycle>,
    emitter: Arc<dyn EventEmitter>,
    request_queue: Arc<RequestQueue>,
    last_run_at: DashMap<String, u64>,
    in_flight: DashMap<String, ()>,
    history: Mutex<VecDeque<CommandRecord>>,
    started_at: u64,
}

impl CommandProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        http: Arc<HttpClient>,
        snapshot: Arc<SnapshotManager>,
        cache: Arc<CacheManager>,
        screenshots: Arc<dyn ScreenshotCapture>,
        lifecycle: Arc<dyn Lifecycle>,
        emitter: Arc<dyn EventEmitter>,
        request_queue: Arc<RequestQueue>,
    ) -> Arc<Self> {
        Arc::new(Self {
            http,
            snapshot,
            cache,
            screenshots,
            lifecycle,
            emitter,
            request_queue,
            last_run_at: DashMap::new(),
            in_flight: DashMap::new(),
            history: Mutex::new(VecDeque::with_capacity(COMMAND_HISTORY_SIZE)),
            started_at: crate::utils::now_millis(),
        })
    }

    pub fn history(&self) -> Vec<CommandRecord> {
        self.history.lock().iter().cloned().collect()
    }

    /// Runs one poll cycle: fetch pending commands, dispatch each, ack.
    pub async fn poll_once(self: &Arc<Self>) {
        let commands: CommandsResponse = match self.http.get("/api/v1/device/commands").await {
            Ok(resp) => resp,
            Err(e) => {
                log::debug!("[commands] poll failed: {e}");
                return;
            }
        };

        for command in commands.commands {
            if self.in_flight.contains_key(&command.id) {
                continue;
            }
            if self.is_rate_limited(&command.kind) {
                log::debug!("[commands] {} rate-limited, acking rejection", command.kind);
                self.in_flight.insert(command.id.clone(), ());
                let this = self.clone();
                tokio::spawn(async move {
                    this.reject_rate_limited(command).await;
                });
                continue;
            }
            self.in_flight.insert(command.id.clone(), ());
            let this = self.clone();
            tokio::spawn(async move {
                this.dispatch_and_ack(command).await;
            });
        }
    }

    fn is_rate_limited(&self, kind: &str) -> bool {
        let now = crate::utils::now_millis();
        if let Some(last) = self.last_run_at.get(kind) {
            if now.saturating_sub(*last) < COMMAND_RATE_LIMIT_MS {
                return true;
            }
        }
        false
    }

    async fn dispatch_and_ack(self: Arc<Self>, command: RemoteCommand) {
        self.last_run_at.insert(command.kind.clone(), crate::utils::now_millis());
        let result = self.dispatch(&command).await;
        let (success, error, payload) = match result {
            Ok(value) => (true, None, value),
            Err(e) => (false, Some(e.to_string()), None),
        };

        self.record_history(&command, success);
        self.emitter.emit_command(CommandEvent::Acknowledged {
            command_id: command.id.clone(),
            success,
            error: error.clone(),
            timestamp: crate::utils::now_millis(),
        });

        let ack = CommandAck {
            command_id: command.id.clone(),
            success,
            error,
            result: payload,
        };
        self.deliver_ack(&ack).await;

        self.in_flight.remove(&command.id);
    }

    /// A command rejected by the rate limiter never runs, but the backend
    /// still needs an ack for it, otherwise a throttled duplicate is
    /// indistinguishable from one the device never received at all.
    async fn reject_rate_limited(self: Arc<Self>, command: RemoteCommand) {
        let error = Some("Rate limited".to_string());
        self.record_history(&command, false);
        self.emitter.emit_command(CommandEvent::Acknowledged {
            command_id: command.id.clone(),
            success: false,
            error: error.clone(),
            timestamp: crate::utils::now_millis(),
        });

        let ack = CommandAck {
            command_id: command.id.clone(),
            success: false,
            error,
            result: None,
        };
        self.deliver_ack(&ack).await;

        self.in_flight.remove(&command.id);
    }

    async fn deliver_ack(&self, ack: &CommandAck) {
        if let Err(e) = self
            .http
            .post_no_content::<CommandAck>("/api/v1/device/commands/ack", ack)
            .await
        {
            log::warn!("[commands] failed to deliver ack for {}: {e}, enqueuing", ack.command_id);
            self.enqueue_ack(ack);
        }
    }

    async fn dispatch(&self, command: &RemoteCommand) -> SignageResult<Option<serde_json::Value>> {
        match command.kind.as_str() {
            "REBOOT" => {
                let lifecycle = self.lifecycle.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(REBOOT_DELAY_MS)).await;
                    lifecycle.request_restart();
                });
                Ok(None)
            }
            "REFRESH_SCHEDULE" => {
                self.snapshot.request_refresh();
                Ok(None)
            }
            "SCREENSHOT" => {
                let key = self.screenshots.capture_and_upload().await?;
                Ok(Some(serde_json::json!({ "objectKey": key })))
            }
            "CLEAR_CACHE" => {
                let force = command
                    .payload
                    .get("force")
                    .and_then(serde_json::Value::as_bool)
                    .unwrap_or(false);
                self.cache.clear(force);
                Ok(None)
            }
            "PING" => {
                let uptime_ms = crate::utils::now_millis().saturating_sub(self.started_at);
                Ok(Some(serde_json::json!({
                    "uptimeMs": uptime_ms,
                    "version": env!("CARGO_PKG_VERSION"),
                })))
            }
            other => Err(crate::error::SignageError::Internal(format!(
                "unknown command type {other}"
            ))),
        }
    }

    fn record_history(&self, command: &RemoteCommand, success: bool) {
        let mut history = self.history.lock();
        if history.len() >= COMMAND_HISTORY_SIZE {
            history.pop_front();
        }
        history.push_back(CommandRecord {
            id: command.id.clone(),
            kind: command.kind.clone(),
            success,
            timestamp: crate::utils::now_millis(),
        });
    }

    fn enqueue_ack(&self, ack: &CommandAck) {
        let payload = serde_json::to_value(ack).unwrap_or(serde_json::Value::Null);
        self.request_queue.enqueue(
            "/api/v1/device/commands/ack",
            payload,
            COMMAND_ACK_MAX_RETRIES,
        );
    }

    /// Runs the poll loop until `cancel` fires.
    pub async fn run(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    log::info!("[commands] stopping poll loop");
                    break;
                }
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheManager;
    use crate::collaborators::NoopScreenshotCapture;
    use crate::events::NoopEventEmitter;
    use crate::lifecycle::NoopLifecycle;

    fn processor() -> Arc<CommandProcessor> {
        let dir = tempfile::tempdir().unwrap();
        let http = HttpClient::new("https://example.invalid").unwrap();
        let cache = CacheManager::new(dir.path().join("cache"), 1024 * 1024 * 1024, http.clone());
        let emitter: Arc<dyn EventEmitter> = Arc::new(NoopEventEmitter);
        let snapshot = SnapshotManager::new(
            http.clone(),
            cache.clone(),
            emitter.clone(),
            dir.path().join("snapshot.json"),
            3,
        );
        let request_queue = RequestQueue::new(http.clone(), dir.path().join("ack-queue.json"));
        CommandProcessor::new(
            http,
            snapshot,
            cache,
            Arc::new(NoopScreenshotCapture),
            Arc::new(NoopLifecycle),
            emitter,
            request_queue,
        )
    }

    #[tokio::test]
    async fn ping_returns_uptime_and_version() {
        let processor = processor();
        let command = RemoteCommand {
            id: "c1".to_string(),
            kind: "PING".to_string(),
            payload: serde_json::Value::Null,
        };
        let result = processor.dispatch(&command).await.unwrap();
        assert!(result.unwrap().get("version").is_some());
    }

    #[tokio::test]
    async fn unknown_command_type_is_an_error() {
        let processor = processor();
        let command = RemoteCommand {
            id: "c2".to_string(),
            kind: "DANCE".to_string(),
            payload: serde_json::Value::Null,
        };
        assert!(processor.dispatch(&command).await.is_err());
    }

    #[tokio::test]
    async fn rate_limit_blocks_immediate_repeat() {
        let processor = processor();
        processor.last_run_at.insert("PING".to_string(), crate::utils::now_millis());
        assert!(processor.is_rate_limited("PING"));
        assert!(!processor.is_rate_limited("REBOOT"));
    }

    #[tokio::test]
    async fn rate_limited_command_still_records_a_failed_ack() {
        let processor = processor();
        let command = RemoteCommand {
            id: "c3".to_string(),
            kind: "PING".to_string(),
            payload: serde_json::Value::Null,
        };
        processor.clone().reject_rate_limited(command).await;

        let history = processor.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, "c3");
        assert!(!history[0].success);
        assert!(!processor.in_flight.contains_key("c3"));
    }
}
