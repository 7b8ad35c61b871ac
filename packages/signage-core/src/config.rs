//! Core application configuration.
//!
//! Mirrors the configuration keys enumerated in §6: `apiBase`, `wsUrl`,
//! `deviceId`, `mtls.*`, `cache.*`, `intervals.*`, `log.*`, `power.*`, and
//! `security.*`. Validation runs once at startup; failures are fatal
//! (`SignageError::Config`), following the teacher's
//! `StreamingConfig::validate` pattern of returning a descriptive error
//! rather than silently clamping.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{SignageError, SignageResult};
use crate::protocol_constants::{
    DEFAULT_CACHE_BYTES, DEFAULT_COMMAND_POLL_MS, DEFAULT_DEFAULT_MEDIA_POLL_MS,
    DEFAULT_HEALTH_CHECK_MS, DEFAULT_HEARTBEAT_MS, DEFAULT_PREFETCH_CONCURRENCY,
    DEFAULT_RENEW_BEFORE_DAYS, DEFAULT_SCHEDULE_POLL_MS, DEFAULT_SCREENSHOT_MS, MIN_CACHE_BYTES,
    PREFETCH_CONCURRENCY_RANGE,
};

/// Top-level persisted configuration (`config.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Backend base URL. Required; validation fails if empty.
    pub api_base: String,
    /// WebSocket URL. Derived from `api_base` if absent. Accepted and
    /// persisted for forward compatibility; no transport is ever opened
    /// against it by this crate (see `SPEC_FULL.md` §9 Open Question).
    pub ws_url: Option<String>,
    /// Device identifier, populated once pairing completes.
    pub device_id: Option<String>,
    pub mtls: MtlsConfig,
    pub cache: CacheConfig,
    pub intervals: IntervalsConfig,
    pub log: LogConfig,
    pub power: PowerConfig,
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MtlsConfig {
    pub enabled: bool,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    pub ca_path: PathBuf,
    pub auto_renew: bool,
    pub renew_before_days: i64,
}

impl Default for MtlsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cert_path: PathBuf::from("./data/certs/client.crt"),
            key_path: PathBuf::from("./data/certs/client.key"),
            ca_path: PathBuf::from("./data/certs/ca.crt"),
            auto_renew: true,
            renew_before_days: DEFAULT_RENEW_BEFORE_DAYS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheConfig {
    pub path: PathBuf,
    pub max_bytes: u64,
    pub prefetch_concurrency: usize,
    pub bandwidth_budget_mbps: Option<u32>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/cache"),
            max_bytes: DEFAULT_CACHE_BYTES,
            prefetch_concurrency: DEFAULT_PREFETCH_CONCURRENCY,
            bandwidth_budget_mbps: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IntervalsConfig {
    pub heartbeat_ms: u64,
    pub command_poll_ms: u64,
    pub schedule_poll_ms: u64,
    pub default_media_poll_ms: u64,
    pub health_check_ms: u64,
    pub screenshot_ms: u64,
}

impl Default for IntervalsConfig {
    fn default() -> Self {
        Self {
            heartbeat_ms: DEFAULT_HEARTBEAT_MS,
            command_poll_ms: DEFAULT_COMMAND_POLL_MS,
            schedule_poll_ms: DEFAULT_SCHEDULE_POLL_MS,
            default_media_poll_ms: DEFAULT_DEFAULT_MEDIA_POLL_MS,
            health_check_ms: DEFAULT_HEALTH_CHECK_MS,
            screenshot_ms: DEFAULT_SCREENSHOT_MS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LogConfig {
    pub level: String,
    pub ship_policy: ShipPolicy,
    pub rotation_size_mb: u32,
    pub rotation_interval_hours: u32,
    pub compression_enabled: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            ship_policy: ShipPolicy::OnError,
            rotation_size_mb: 50,
            rotation_interval_hours: 24,
            compression_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ShipPolicy {
    Never,
    OnError,
    Always,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PowerConfig {
    pub dpms_enabled: bool,
    pub prevent_blanking: bool,
    pub schedule_enabled: bool,
    pub on_time: Option<String>,
    pub off_time: Option<String>,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            dpms_enabled: false,
            prevent_blanking: true,
            schedule_enabled: false,
            on_time: None,
            off_time: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SecurityConfig {
    pub csp: Option<String>,
    pub allowed_domains: Vec<String>,
    pub context_isolation: bool,
    pub sandbox: bool,
    pub node_integration: bool,
    pub disable_eval: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            csp: None,
            allowed_domains: Vec::new(),
            context_isolation: true,
            sandbox: true,
            node_integration: false,
            disable_eval: true,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base: String::new(),
            ws_url: None,
            device_id: None,
            mtls: MtlsConfig::default(),
            cache: CacheConfig::default(),
            intervals: IntervalsConfig::default(),
            log: LogConfig::default(),
            power: PowerConfig::default(),
            security: SecurityConfig::default(),
        }
    }
}

const TIME_RE_HOURS: std::ops::RangeInclusive<u32> = 0..=23;
const TIME_RE_MINUTES: std::ops::RangeInclusive<u32> = 0..=59;

fn validate_hhmm(value: &str, field: &str) -> SignageResult<()> {
    let (h, m) = value
        .split_once(':')
        .ok_or_else(|| SignageError::Config(format!("{field} must be HH:MM, got {value:?}")))?;
    let h: u32 = h
        .parse()
        .map_err(|_| SignageError::Config(format!("{field} must be HH:MM, got {value:?}")))?;
    let m: u32 = m
        .parse()
        .map_err(|_| SignageError::Config(format!("{field} must be HH:MM, got {value:?}")))?;
    if !TIME_RE_HOURS.contains(&h) || !TIME_RE_MINUTES.contains(&m) {
        return Err(SignageError::Config(format!(
            "{field} out of range: {value:?}"
        )));
    }
    Ok(())
}

impl Config {
    /// Loads configuration from `path`, falling back to defaults if the
    /// file does not exist.
    pub fn load(path: &std::path::Path) -> SignageResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let bytes = std::fs::read(path)
            .map_err(|e| SignageError::Config(format!("reading {}: {e}", path.display())))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| SignageError::Config(format!("parsing {}: {e}", path.display())))
    }

    /// Persists configuration atomically to `path` (mode 0600 on unix).
    pub fn save(&self, path: &std::path::Path) -> SignageResult<()> {
        crate::utils::atomic_write_json(path, self)
            .map_err(|e| SignageError::Config(format!("writing {}: {e}", path.display())))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Ok(meta) = std::fs::metadata(path) {
                let mut perms = meta.permissions();
                perms.set_mode(0o600);
                let _ = std::fs::set_permissions(path, perms);
            }
        }
        Ok(())
    }

    /// Validates the configuration, returning `ConfigError` on the first
    /// problem found. Called once at startup; failure is fatal.
    pub fn validate(&self) -> SignageResult<()> {
        if self.api_base.trim().is_empty() {
            return Err(SignageError::Config("apiBase is required".into()));
        }
        if let Err(e) = url::Url::parse(&self.api_base) {
            return Err(SignageError::Config(format!("apiBase is not a valid URL: {e}")));
        }
        if self.cache.max_bytes < MIN_CACHE_BYTES {
            return Err(SignageError::Config(format!(
                "cache.maxBytes must be >= {MIN_CACHE_BYTES} bytes"
            )));
        }
        if !PREFETCH_CONCURRENCY_RANGE.contains(&self.cache.prefetch_concurrency) {
            return Err(SignageError::Config(
                "cache.prefetchConcurrency must be in [1, 10]".into(),
            ));
        }
        if self.intervals.heartbeat_ms < 10_000 {
            return Err(SignageError::Config(
                "intervals.heartbeatMs must be >= 10000".into(),
            ));
        }
        if self.intervals.command_poll_ms < 5_000 {
            return Err(SignageError::Config(
                "intervals.commandPollMs must be >= 5000".into(),
            ));
        }
        if self.intervals.schedule_poll_ms < 10_000 {
            return Err(SignageError::Config(
                "intervals.schedulePollMs must be >= 10000".into(),
            ));
        }
        if self.intervals.default_media_poll_ms < 10_000 {
            return Err(SignageError::Config(
                "intervals.defaultMediaPollMs must be >= 10000".into(),
            ));
        }
        if self.intervals.screenshot_ms < 10_000 {
            return Err(SignageError::Config(
                "intervals.screenshotMs must be >= 10000".into(),
            ));
        }
        if let Some(ref on) = self.power.on_time {
            validate_hhmm(on, "power.onTime")?;
        }
        if let Some(ref off) = self.power.off_time {
            validate_hhmm(off, "power.offTime")?;
        }
        Ok(())
    }

    /// Returns `ws_url` if set, else derives one from `api_base` by
    /// swapping the scheme (`http`→`ws`, `https`→`wss`). Never used to
    /// open a connection by this crate; see the module doc.
    #[must_use]
    pub fn effective_ws_url(&self) -> Option<String> {
        if let Some(ref ws) = self.ws_url {
            return Some(ws.clone());
        }
        if self.api_base.starts_with("https://") {
            Some(self.api_base.replacen("https://", "wss://", 1))
        } else if self.api_base.starts_with("http://") {
            Some(self.api_base.replacen("http://", "ws://", 1))
        } else {
            None
        }
    }
}

/// Fan-out notification for in-process configuration changes.
///
/// Configuration is loaded once at process start (§5); later in-process
/// updates (e.g. a renderer-initiated settings change) are announced
/// through this trait rather than by re-reading the file, following the
/// same decoupling the teacher applies to [`crate::events::EventEmitter`].
pub trait ConfigChangeEmitter: Send + Sync {
    fn on_config_changed(&self, config: &Config);
}

/// No-op implementation used when nothing subscribes to config changes.
pub struct NoopConfigChangeEmitter;

impl ConfigChangeEmitter for NoopConfigChangeEmitter {
    fn on_config_changed(&self, _config: &Config) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_fails_validation_without_api_base() {
        let config = Config::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn valid_config_passes_validation() {
        let mut config = Config::default();
        config.api_base = "https://cms.example.com".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn cache_max_bytes_below_minimum_is_rejected() {
        let mut config = Config::default();
        config.api_base = "https://cms.example.com".to_string();
        config.cache.max_bytes = 1024;
        let err = config.validate().unwrap_err();
        assert_eq!(err.code(), "config_error");
    }

    #[test]
    fn prefetch_concurrency_out_of_range_is_rejected() {
        let mut config = Config::default();
        config.api_base = "https://cms.example.com".to_string();
        config.cache.prefetch_concurrency = 0;
        assert!(config.validate().is_err());
        config.cache.prefetch_concurrency = 20;
        assert!(config.validate().is_err());
    }

    #[test]
    fn power_time_must_be_hhmm() {
        let mut config = Config::default();
        config.api_base = "https://cms.example.com".to_string();
        config.power.on_time = Some("25:99".to_string());
        assert!(config.validate().is_err());
        config.power.on_time = Some("06:30".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn effective_ws_url_derives_from_https_api_base() {
        let mut config = Config::default();
        config.api_base = "https://cms.example.com".to_string();
        assert_eq!(
            config.effective_ws_url(),
            Some("wss://cms.example.com".to_string())
        );
    }

    #[test]
    fn config_roundtrips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = Config::default();
        config.api_base = "https://cms.example.com".to_string();
        config.device_id = Some("device-1".to_string());
        config.save(&path).unwrap();
        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.device_id.as_deref(), Some("device-1"));
    }
}
