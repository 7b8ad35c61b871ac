//! Centralized error types for the signage player core library.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error types using `thiserror`
//! - Provides a machine-readable [`ErrorCode`] for every variant
//! - Classifies which errors are worth retrying via [`SignageError::is_transient`]

use serde::Serialize;
use thiserror::Error;

/// Trait for error types that provide machine-readable error codes.
///
/// Implement this trait to provide consistent error codes across different
/// error conversion paths.
pub trait ErrorCode {
    /// Returns a machine-readable error code for logs and acks.
    fn code(&self) -> &'static str;
}

/// Application-wide error type for the signage player core.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum SignageError {
    /// Transport-level failure reaching the backend (timeout, DNS, connection reset).
    #[error("Network error: {0}")]
    Network(String),

    /// Backend rejected the request as unauthorized, or a signed media URL expired.
    #[error("Auth error: {0}")]
    Auth(String),

    /// Backend returned 404 for a resource expected to exist (pairing code, snapshot).
    #[error("Not found: {0}")]
    NotFound(String),

    /// Downloaded media bytes did not match the expected checksum.
    #[error("Integrity mismatch for {media_id}: expected {expected}, got {actual}")]
    IntegrityMismatch {
        media_id: String,
        expected: String,
        actual: String,
    },

    /// A snapshot, command, or default-media payload could not be parsed.
    #[error("Parse error: {0}")]
    Parse(String),

    /// The cache cannot make room for a new entry even after eviction.
    #[error("Cache full: {0}")]
    CacheFull(String),

    /// The playback error budget was exhausted.
    #[error("Playback error: {0}")]
    Playback(String),

    /// Configuration failed validation at startup.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Certificate material is missing, expired, or malformed.
    #[error("Certificate error: {0}")]
    Cert(String),

    /// Pairing protocol failure (unexpected backend response, expired code).
    #[error("Pairing error: {0}")]
    Pairing(String),

    /// Internal invariant violation that should not normally be reachable.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SignageError {
    /// Returns a machine-readable error code for logs, acks, and diagnostics.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Network(_) => "network_error",
            Self::Auth(_) => "auth_error",
            Self::NotFound(_) => "not_found",
            Self::IntegrityMismatch { .. } => "integrity_mismatch",
            Self::Parse(_) => "parse_error",
            Self::CacheFull(_) => "cache_full",
            Self::Playback(_) => "playback_error",
            Self::Config(_) => "config_error",
            Self::Cert(_) => "cert_error",
            Self::Pairing(_) => "pairing_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// True when the same operation is worth retrying later.
    ///
    /// Used by the request queue (§4.2) to decide whether to requeue a
    /// failed delivery, and by the cache manager's `URL_EXPIRED` signal
    /// to trigger exactly one snapshot refetch.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Auth(_))
    }

    /// True when this error specifically represents an expired signed URL.
    ///
    /// The snapshot manager (§4.7) treats this distinctly from other auth
    /// failures: it triggers a single snapshot refetch rather than a bare retry.
    pub fn is_url_expired(&self) -> bool {
        matches!(self, Self::Auth(msg) if msg.contains("URL_EXPIRED"))
    }
}

/// Convenient Result alias for core operations.
pub type SignageResult<T> = Result<T, SignageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integrity_mismatch_returns_correct_code() {
        let err = SignageError::IntegrityMismatch {
            media_id: "m1".into(),
            expected: "aaa".into(),
            actual: "bbb".into(),
        };
        assert_eq!(err.code(), "integrity_mismatch");
        assert!(!err.is_transient());
    }

    #[test]
    fn network_error_is_transient() {
        let err = SignageError::Network("timeout".into());
        assert!(err.is_transient());
    }

    #[test]
    fn url_expired_is_detected_distinctly_from_other_auth_errors() {
        let expired = SignageError::Auth("URL_EXPIRED".into());
        let forbidden = SignageError::Auth("forbidden".into());
        assert!(expired.is_url_expired());
        assert!(!forbidden.is_url_expired());
        assert!(expired.is_transient() && forbidden.is_transient());
    }

    #[test]
    fn config_error_is_not_transient() {
        let err = SignageError::Config("apiBase is required".into());
        assert_eq!(err.code(), "config_error");
        assert!(!err.is_transient());
    }
}
