//! Fixed defaults and protocol constants that should NOT casually be changed.
//!
//! Interval defaults here mirror §6's configuration-key table in
//! `SPEC_FULL.md`; runtime values come from [`crate::config::Config`], these
//! are only the defaults used when a config key is absent.

// ─────────────────────────────────────────────────────────────────────────────
// Application identity
// ─────────────────────────────────────────────────────────────────────────────

/// Certificate subject organization for CSRs generated by the certificate manager.
pub const CERT_SUBJECT_ORG: &str = "HexmonSignage";

/// User-Agent sent on outbound backend requests.
pub const APP_NAME: &str = "signage-agent";

// ─────────────────────────────────────────────────────────────────────────────
// HTTP client (C1)
// ─────────────────────────────────────────────────────────────────────────────

/// Default request timeout for all backend calls (seconds).
pub const HTTP_REQUEST_TIMEOUT_SECS: u64 = 30;

// ─────────────────────────────────────────────────────────────────────────────
// Intervals (seeded defaults for `config.intervals.*`)
// ─────────────────────────────────────────────────────────────────────────────

/// Default snapshot poll interval (ms).
pub const DEFAULT_SCHEDULE_POLL_MS: u64 = 5 * 60 * 1000;

/// Default remote command poll interval (ms).
pub const DEFAULT_COMMAND_POLL_MS: u64 = 30 * 1000;

/// Default default-media poll interval (ms).
pub const DEFAULT_DEFAULT_MEDIA_POLL_MS: u64 = 5 * 60 * 1000;

/// Default heartbeat interval (ms).
pub const DEFAULT_HEARTBEAT_MS: u64 = 60 * 1000;

/// Default screenshot capture interval (ms).
pub const DEFAULT_SCREENSHOT_MS: u64 = 5 * 60 * 1000;

/// Default health-check interval (ms).
pub const DEFAULT_HEALTH_CHECK_MS: u64 = 60 * 1000;

// ─────────────────────────────────────────────────────────────────────────────
// Cache (C3)
// ─────────────────────────────────────────────────────────────────────────────

/// Minimum allowed cache byte budget.
pub const MIN_CACHE_BYTES: u64 = 100 * 1024 * 1024;

/// Default cache byte budget (2 GiB).
pub const DEFAULT_CACHE_BYTES: u64 = 2 * 1024 * 1024 * 1024;

/// Default number of concurrent prefetch downloads.
pub const DEFAULT_PREFETCH_CONCURRENCY: usize = 3;

/// Allowed range for `cache.prefetchConcurrency`.
pub const PREFETCH_CONCURRENCY_RANGE: std::ops::RangeInclusive<usize> = 1..=10;

// ─────────────────────────────────────────────────────────────────────────────
// Timeline defaults (C6/C8)
// ─────────────────────────────────────────────────────────────────────────────

/// Fallback display duration applied when a snapshot item omits or zeroes `displayMs`.
pub const DEFAULT_DISPLAY_MS: u64 = 10_000;

// ─────────────────────────────────────────────────────────────────────────────
// Command processor (C10)
// ─────────────────────────────────────────────────────────────────────────────

/// Rate-limit window: the same command type cannot execute twice within this window.
pub const COMMAND_RATE_LIMIT_MS: u64 = 60_000;

/// Size of the bounded command result history.
pub const COMMAND_HISTORY_SIZE: usize = 100;

/// Delay before a `REBOOT` command triggers a process relaunch.
pub const REBOOT_DELAY_MS: u64 = 2_000;

/// Retry budget for an acknowledgement that failed to deliver, queued onto
/// the durable [`crate::request_queue::RequestQueue`].
pub const COMMAND_ACK_MAX_RETRIES: u32 = 10;

// ─────────────────────────────────────────────────────────────────────────────
// Playback engine (C9)
// ─────────────────────────────────────────────────────────────────────────────

/// Consecutive playback errors tolerated before the engine stops and surfaces `PlaybackError`.
pub const MAX_CONSECUTIVE_PLAYBACK_ERRORS: u32 = 5;

// ─────────────────────────────────────────────────────────────────────────────
// Certificate manager (C4)
// ─────────────────────────────────────────────────────────────────────────────

/// Default renewal lead time before certificate expiry (days).
pub const DEFAULT_RENEW_BEFORE_DAYS: i64 = 30;

// ─────────────────────────────────────────────────────────────────────────────
// Broadcast channel
// ─────────────────────────────────────────────────────────────────────────────

/// Capacity of the renderer-facing event broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 100;
