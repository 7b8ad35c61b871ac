//! mTLS-capable backend HTTP client (§4.1).
//!
//! Wraps a single shared [`reqwest::Client`], rebuilt only when the
//! device's mTLS identity material changes (pairing completion or
//! certificate renewal), following the teacher's `create_http_client`
//! once-per-process client construction pattern from `bootstrap.rs`.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{SignageError, SignageResult};
use crate::protocol_constants::{APP_NAME, HTTP_REQUEST_TIMEOUT_SECS};

/// Classification of a failed HTTP response, used by callers to decide
/// how to react (retry, refetch a snapshot, drop a pairing code).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseClass {
    Unauthorized,
    NotFound,
    Other,
}

fn classify(status: reqwest::StatusCode) -> ResponseClass {
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        ResponseClass::Unauthorized
    } else if status == reqwest::StatusCode::NOT_FOUND {
        ResponseClass::NotFound
    } else {
        ResponseClass::Other
    }
}

fn status_to_error(status: reqwest::StatusCode, body: String) -> SignageError {
    match classify(status) {
        ResponseClass::Unauthorized => SignageError::Auth(body),
        ResponseClass::NotFound => SignageError::NotFound(body),
        ResponseClass::Other => SignageError::Network(format!("{status}: {body}")),
    }
}

/// Like [`status_to_error`], but for signed media download URLs: a 401/403
/// there means the signed URL itself expired, not a bad credential, so it
/// is tagged as the dedicated `URL_EXPIRED` signal the snapshot manager's
/// single-refetch path looks for.
fn media_download_error(status: reqwest::StatusCode, body: String) -> SignageError {
    match classify(status) {
        ResponseClass::Unauthorized => SignageError::Auth("URL_EXPIRED".to_string()),
        ResponseClass::NotFound => SignageError::NotFound(body),
        ResponseClass::Other => SignageError::Network(format!("{status}: {body}")),
    }
}

/// PEM-encoded mTLS identity material.
#[derive(Clone)]
pub struct MtlsIdentity {
    pub cert_pem: Vec<u8>,
    pub key_pem: Vec<u8>,
    pub ca_pem: Vec<u8>,
}

/// Shared backend HTTP client.
///
/// Holds the current `reqwest::Client` behind a `RwLock` so that
/// `set_identity` can rebuild it in place after pairing or renewal
/// without requiring every caller to refetch a new handle.
pub struct HttpClient {
    base_url: String,
    client: RwLock<reqwest::Client>,
}

impl HttpClient {
    /// Builds a client with no mTLS identity attached yet (pre-pairing state).
    pub fn new(base_url: impl Into<String>) -> SignageResult<Arc<Self>> {
        let client = build_client(None)?;
        Ok(Arc::new(Self {
            base_url: base_url.into(),
            client: RwLock::new(client),
        }))
    }

    /// Rebuilds the underlying client with the given mTLS identity. Called
    /// once pairing completes and again on every successful renewal.
    pub fn set_identity(&self, identity: MtlsIdentity) -> SignageResult<()> {
        let client = build_client(Some(identity))?;
        *self.client.write() = client;
        Ok(())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    fn client(&self) -> reqwest::Client {
        self.client.read().clone()
    }

    /// Performs a GET request and deserializes the JSON response body.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> SignageResult<T> {
        let resp = self
            .client()
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| SignageError::Network(e.to_string()))?;
        self.decode(resp).await
    }

    /// Performs a GET request and returns the raw bytes, for media downloads.
    pub async fn get_bytes(&self, url: &str) -> SignageResult<bytes::Bytes> {
        let resp = self
            .client()
            .get(url)
            .send()
            .await
            .map_err(|e| SignageError::Network(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(media_download_error(status, body));
        }
        resp.bytes()
            .await
            .map_err(|e| SignageError::Network(e.to_string()))
    }

    /// Performs a POST request with a JSON body and deserializes the response.
    pub async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> SignageResult<T> {
        let resp = self
            .client()
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| SignageError::Network(e.to_string()))?;
        self.decode(resp).await
    }

    /// Performs a POST request discarding the response body on success.
    pub async fn post_no_content<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> SignageResult<()> {
        let resp = self
            .client()
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| SignageError::Network(e.to_string()))?;
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let text = resp.text().await.unwrap_or_default();
        Err(status_to_error(status, text))
    }

    /// Probes backend reachability without requiring a successful body parse.
    pub async fn check_connectivity_detailed(&self) -> ConnectivityReport {
        let started = std::time::Instant::now();
        match self.client().get(self.url("/health")).send().await {
            Ok(resp) => ConnectivityReport {
                reachable: resp.status().is_success(),
                status: Some(resp.status().as_u16()),
                latency_ms: started.elapsed().as_millis() as u64,
                error: None,
            },
            Err(e) => ConnectivityReport {
                reachable: false,
                status: None,
                latency_ms: started.elapsed().as_millis() as u64,
                error: Some(e.to_string()),
            },
        }
    }

    async fn decode<T: DeserializeOwned>(&self, resp: reqwest::Response) -> SignageResult<T> {
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| SignageError::Network(e.to_string()))?;
        if !status.is_success() {
            return Err(status_to_error(status, text));
        }
        serde_json::from_str(&text).map_err(|e| SignageError::Parse(e.to_string()))
    }
}

/// Outcome of a reachability probe.
#[derive(Debug, Clone)]
pub struct ConnectivityReport {
    pub reachable: bool,
    pub status: Option<u16>,
    pub latency_ms: u64,
    pub error: Option<String>,
}

fn build_client(identity: Option<MtlsIdentity>) -> SignageResult<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .timeout(Duration::from_secs(HTTP_REQUEST_TIMEOUT_SECS))
        .user_agent(APP_NAME);

    if let Some(identity) = identity {
        let mut combined = identity.key_pem.clone();
        combined.extend_from_slice(b"\n");
        combined.extend_from_slice(&identity.cert_pem);
        let reqwest_identity = reqwest::Identity::from_pem(&combined)
            .map_err(|e| SignageError::Cert(format!("building mTLS identity: {e}")))?;
        let ca_cert = reqwest::Certificate::from_pem(&identity.ca_pem)
            .map_err(|e| SignageError::Cert(format!("parsing CA certificate: {e}")))?;
        builder = builder
            .identity(reqwest_identity)
            .add_root_certificate(ca_cert);
    }

    builder
        .build()
        .map_err(|e| SignageError::Internal(format!("building http client: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_maps_status_codes() {
        assert_eq!(
            classify(reqwest::StatusCode::UNAUTHORIZED),
            ResponseClass::Unauthorized
        );
        assert_eq!(
            classify(reqwest::StatusCode::FORBIDDEN),
            ResponseClass::Unauthorized
        );
        assert_eq!(
            classify(reqwest::StatusCode::NOT_FOUND),
            ResponseClass::NotFound
        );
        assert_eq!(
            classify(reqwest::StatusCode::INTERNAL_SERVER_ERROR),
            ResponseClass::Other
        );
    }

    #[tokio::test]
    async fn client_without_identity_can_be_constructed() {
        let client = HttpClient::new("https://example.com").unwrap();
        assert_eq!(client.url("/health"), "https://example.com/health");
    }

    #[test]
    fn media_download_error_tags_unauthorized_as_url_expired() {
        let err = media_download_error(reqwest::StatusCode::FORBIDDEN, "forbidden".to_string());
        assert!(err.is_url_expired());
    }

    #[test]
    fn media_download_error_leaves_other_statuses_alone() {
        let err = media_download_error(reqwest::StatusCode::NOT_FOUND, "gone".to_string());
        assert!(!err.is_url_expired());
        assert_eq!(err.code(), "not_found");
    }
}
