//! General utilities shared across the application.
//!
//! Notably the atomic-write-to-disk helper used by every persisted JSON
//! document in the core (`config.json`, `last-snapshot.json`,
//! `default-media.json`, `cert-meta.json`): write to a temp file in the
//! same directory, then `rename` over the destination so a crash never
//! leaves a half-written file behind.

use std::io;
use std::path::Path;
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

// ─────────────────────────────────────────────────────────────────────────────
// Time utilities
// ─────────────────────────────────────────────────────────────────────────────

/// Returns the current Unix timestamp in milliseconds.
///
/// Returns 0 if the system clock is before the Unix epoch (shouldn't happen in practice).
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ─────────────────────────────────────────────────────────────────────────────
// Atomic file persistence
// ─────────────────────────────────────────────────────────────────────────────

/// Process-wide lock guarding every atomic write.
///
/// A single lock (rather than one per file) is sufficient: writes are
/// infrequent and never on a hot path, and sharing it avoids one
/// `OnceLock` per persisted document.
static WRITE_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

fn write_lock() -> &'static Mutex<()> {
    WRITE_LOCK.get_or_init(|| Mutex::new(()))
}

/// Writes `bytes` to `path` atomically: write to a sibling temp file, then
/// rename over the destination. Creates parent directories if needed.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let _guard = write_lock().lock();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension(format!(
        "{}.tmp",
        path.extension().and_then(|e| e.to_str()).unwrap_or("")
    ));
    std::fs::write(&tmp_path, bytes)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Serializes `value` as pretty JSON and writes it atomically to `path`.
pub fn atomic_write_json<T: serde::Serialize>(path: &Path, value: &T) -> io::Result<()> {
    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    atomic_write(path, &bytes)
}

/// Restricts a raw media identifier to a filesystem-safe character set
/// (`[A-Za-z0-9_-]`) so it can be used directly as a cache filename stem.
///
/// Any other byte is replaced with `_`. Following the spirit of the
/// filename-sanitizing helpers scattered through URL/path-building code:
/// never trust an externally supplied identifier to be a safe path
/// component.
#[must_use]
pub fn sanitize_media_id(media_id: &str) -> String {
    media_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_media_id_keeps_safe_characters() {
        assert_eq!(sanitize_media_id("media-123_ABC"), "media-123_ABC");
    }

    #[test]
    fn sanitize_media_id_replaces_path_separators() {
        assert_eq!(sanitize_media_id("../../etc/passwd"), "______etc_passwd");
    }

    #[test]
    fn atomic_write_json_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        atomic_write_json(&path, &serde_json::json!({"a": 1})).unwrap();
        let read: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(read["a"], 1);
    }

    #[test]
    fn atomic_write_leaves_no_temp_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        atomic_write(&path, b"{}").unwrap();
        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries.len(), 1);
    }
}
