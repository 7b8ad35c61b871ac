//! Pairing service (§4.5): device credential bootstrap via a short
//! human-readable pairing code.
//!
//! Modeled as its own small state machine, the way the teacher models a
//! GENA subscription's lifecycle (subscribe → renew → expire) rather than
//! as a bag of loose async functions.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::cert::CertificateManager;
use crate::error::{SignageError, SignageResult};
use crate::http_client::{HttpClient, MtlsIdentity};

/// Pairing service state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PairingState {
    Unpaired,
    Requested,
    Confirmed,
    CertIssued,
    Expired,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDescriptor {
    pub device_label: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub orientation: Option<String>,
    pub aspect_ratio: Option<String>,
    pub model: Option<String>,
    pub codecs: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PairingCodeResponse {
    pairing_code: String,
    device_id: String,
    #[serde(default)]
    expires_at: Option<u64>,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PairingStatusResponse {
    paired: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PairingCompleteResponse {
    certificate_pem: String,
    ca_pem: String,
}

/// Outcome of requesting a pairing code.
#[derive(Debug, Clone)]
pub struct PairingCode {
    pub code: String,
    pub device_id: String,
    pub expires_at_ms: u64,
}

pub struct PairingService {
    http: Arc<HttpClient>,
    cert_manager: Arc<CertificateManager>,
    state: RwLock<PairingState>,
    current: RwLock<Option<PairingCode>>,
}

impl PairingService {
    pub fn new(http: Arc<HttpClient>, cert_manager: Arc<CertificateManager>) -> Arc<Self> {
        Arc::new(Self {
            http,
            cert_manager,
            state: RwLock::new(PairingState::Unpaired),
            current: RwLock::new(None),
        })
    }

    pub fn state(&self) -> PairingState {
        *self.state.read()
    }

    /// The device id assigned by the most recent pairing code request, if any.
    pub fn device_id(&self) -> Option<String> {
        self.current.read().as_ref().map(|c| c.device_id.clone())
    }

    /// POSTs device descriptor, receives `{pairingCode, deviceId, expiresAt|expiresIn}`.
    pub async fn request_pairing_code(&self, descriptor: &DeviceDescriptor) -> SignageResult<PairingCode> {
        let resp: PairingCodeResponse = self
            .http
            .post("/v1/device/pairing/code", descriptor)
            .await?;

        let expires_at_ms = resp
            .expires_at
            .unwrap_or_else(|| crate::utils::now_millis() + resp.expires_in.unwrap_or(600) * 1000);

        let code = PairingCode {
            code: resp.pairing_code,
            device_id: resp.device_id,
            expires_at_ms,
        };
        *self.current.write() = Some(code.clone());
        *self.state.write() = PairingState::Requested;
        Ok(code)
    }

    /// Polls until the backend reports `paired == true`.
    pub async fn fetch_pairing_status(&self) -> SignageResult<bool> {
        let resp: PairingStatusResponse = self.http.get("/v1/device/pairing/status").await?;
        if resp.paired {
            *self.state.write() = PairingState::Confirmed;
        }
        Ok(resp.paired)
    }

    /// Uploads the CSR, receives the signed client cert + CA, and hands
    /// them to the certificate manager for storage. On a 404 (expired or
    /// unknown code) the caller is expected to discard the code and
    /// request a new one.
    pub async fn submit_pairing(&self, code: &str, device_id: &str) -> SignageResult<()> {
        let csr_pem = self.cert_manager.generate_csr(device_id).await?;

        let body = serde_json::json!({
            "pairingCode": code,
            "csr": csr_pem,
        });

        let resp: PairingCompleteResponse = match self
            .http
            .post("/v1/device/pairing/complete", &body)
            .await
        {
            Ok(resp) => resp,
            Err(SignageError::NotFound(msg)) => {
                *self.state.write() = PairingState::Expired;
                *self.current.write() = None;
                return Err(SignageError::NotFound(msg));
            }
            Err(e) => return Err(e),
        };

        let meta = self
            .cert_manager
            .store_issued(&resp.certificate_pem, &resp.ca_pem)?;

        let (cert_pem, key_pem, ca_pem) = self.cert_manager.read_pem_bundle()?;
        self.http.set_identity(MtlsIdentity {
            cert_pem,
            key_pem,
            ca_pem,
        })?;

        log::info!(
            "[pairing] certificate issued, valid until {} (fingerprint {})",
            meta.valid_to,
            meta.fingerprint
        );
        *self.state.write() = PairingState::CertIssued;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::CertPaths;

    #[tokio::test]
    async fn starts_unpaired() {
        let dir = tempfile::tempdir().unwrap();
        let http = HttpClient::new("https://example.invalid").unwrap();
        let cert_manager = Arc::new(CertificateManager::new(CertPaths::under(dir.path())));
        let pairing = PairingService::new(http, cert_manager);
        assert_eq!(pairing.state(), PairingState::Unpaired);
    }
}
