//! External collaborator traits (§1 Scope, §4.9, §4.10).
//!
//! The renderer, proof-of-play pipeline, telemetry shipping, and
//! screenshot capture are explicitly out of scope for this crate; only
//! their interfaces are specified here as traits, each with a `Noop` or
//! `Logging` reference implementation, following the same
//! `EventEmitter`/`NoopEventEmitter`/`LoggingEventEmitter` triad the
//! teacher uses for every platform-specific seam.

use async_trait::async_trait;

use crate::error::SignageResult;

/// Receives renderer-facing playback instructions.
///
/// The production binding is the on-screen renderer (HTML/image/video
/// widgets); out of scope here per §1.
pub trait RendererSink: Send + Sync {
    fn show_media(&self, item_id: &str, local_path: Option<&str>);
    fn show_fallback(&self, reason: &str);
}

pub struct NoopRendererSink;

impl RendererSink for NoopRendererSink {
    fn show_media(&self, _item_id: &str, _local_path: Option<&str>) {}
    fn show_fallback(&self, _reason: &str) {}
}

pub struct LoggingRendererSink;

impl RendererSink for LoggingRendererSink {
    fn show_media(&self, item_id: &str, local_path: Option<&str>) {
        log::debug!("[renderer] show_media {item_id} -> {local_path:?}");
    }
    fn show_fallback(&self, reason: &str) {
        log::debug!("[renderer] show_fallback: {reason}");
    }
}

/// Records proof-of-play occurrences for audit and billing.
pub trait ProofOfPlaySink: Send + Sync {
    fn record_start(&self, schedule_id: Option<&str>, media_id: &str);
    fn record_end(&self, schedule_id: Option<&str>, media_id: &str, completed: bool);
}

pub struct NoopProofOfPlaySink;

impl ProofOfPlaySink for NoopProofOfPlaySink {
    fn record_start(&self, _schedule_id: Option<&str>, _media_id: &str) {}
    fn record_end(&self, _schedule_id: Option<&str>, _media_id: &str, _completed: bool) {}
}

pub struct LoggingProofOfPlaySink;

impl ProofOfPlaySink for LoggingProofOfPlaySink {
    fn record_start(&self, schedule_id: Option<&str>, media_id: &str) {
        log::debug!("[proof_of_play] start schedule={schedule_id:?} media={media_id}");
    }
    fn record_end(&self, schedule_id: Option<&str>, media_id: &str, completed: bool) {
        log::debug!(
            "[proof_of_play] end schedule={schedule_id:?} media={media_id} completed={completed}"
        );
    }
}

/// Reports current playback state for telemetry shipping.
pub trait TelemetrySink: Send + Sync {
    fn set_current_media(&self, media_id: Option<&str>);
}

pub struct NoopTelemetrySink;

impl TelemetrySink for NoopTelemetrySink {
    fn set_current_media(&self, _media_id: Option<&str>) {}
}

pub struct LoggingTelemetrySink;

impl TelemetrySink for LoggingTelemetrySink {
    fn set_current_media(&self, media_id: Option<&str>) {
        log::debug!("[telemetry] current_media = {media_id:?}");
    }
}

/// Captures a screenshot of the rendered output for the `SCREENSHOT` command.
#[async_trait]
pub trait ScreenshotCapture: Send + Sync {
    /// Captures the current frame and uploads it, returning the resulting object key.
    async fn capture_and_upload(&self) -> SignageResult<String>;
}

pub struct NoopScreenshotCapture;

#[async_trait]
impl ScreenshotCapture for NoopScreenshotCapture {
    async fn capture_and_upload(&self) -> SignageResult<String> {
        Ok("noop-screenshot".to_string())
    }
}
