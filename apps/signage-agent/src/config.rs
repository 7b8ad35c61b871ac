//! CLI-level configuration loading.
//!
//! Loads `signage-core`'s JSON [`signage_core::Config`] from disk, then
//! applies environment variable overrides. Mirrors the teacher's
//! `ServerConfig::load` + `apply_env_overrides` shape, adapted to JSON and
//! to the smaller surface this agent needs overridable from the CLI.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use signage_core::Config;

/// Loads configuration from `path`, falling back to
/// [`Config::default`] if the file does not exist, then applies
/// environment variable overrides.
pub fn load(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => Config::load(path)
            .with_context(|| format!("failed to load config file: {}", path.display()))?,
        None => Config::default(),
    };

    apply_env_overrides(&mut config);
    Ok(config)
}

/// Applies `SIGNAGE_*` environment variable overrides to the configuration.
fn apply_env_overrides(config: &mut Config) {
    if let Ok(val) = std::env::var("SIGNAGE_API_BASE") {
        config.api_base = val;
    }
    if let Ok(val) = std::env::var("SIGNAGE_WS_URL") {
        config.ws_url = Some(val);
    }
    if let Ok(val) = std::env::var("SIGNAGE_DEVICE_ID") {
        config.device_id = Some(val);
    }
    if let Ok(val) = std::env::var("SIGNAGE_CACHE_DIR") {
        config.cache.path = PathBuf::from(val);
    }
    if let Ok(val) = std::env::var("SIGNAGE_CACHE_MAX_BYTES") {
        if let Ok(bytes) = val.parse() {
            config.cache.max_bytes = bytes;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_file_falls_back_to_defaults() {
        let config = load(None).unwrap();
        assert_eq!(config.api_base, "");
    }
}
