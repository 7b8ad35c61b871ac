//! Certificate manager (§4.4).
//!
//! Generates an RSA-2048 device keypair, builds a PKCS#10 CSR, stores the
//! cert/key/CA material the backend issues in response, and tracks
//! expiry/renewal. File persistence follows the same atomic-write
//! discipline as the rest of the core (`crate::utils::atomic_write`),
//! with 0600 permissions on every sensitive file.

use std::path::{Path, PathBuf};

use pkcs8::EncodePrivateKey;
use rsa::RsaPrivateKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{SignageError, SignageResult};
use crate::protocol_constants::{CERT_SUBJECT_ORG, DEFAULT_RENEW_BEFORE_DAYS};

const RSA_KEY_BITS: usize = 2048;

/// Persisted metadata about the currently-installed certificate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CertMetadata {
    pub fingerprint: String,
    pub valid_from: i64,
    pub valid_to: i64,
    pub subject: String,
    pub issuer: String,
    pub serial: String,
}

/// File paths the certificate manager owns exclusively.
#[derive(Debug, Clone)]
pub struct CertPaths {
    pub key: PathBuf,
    pub cert: PathBuf,
    pub ca: PathBuf,
    pub csr: PathBuf,
    pub meta: PathBuf,
}

impl CertPaths {
    pub fn under(dir: &Path) -> Self {
        Self {
            key: dir.join("client.key"),
            cert: dir.join("client.crt"),
            ca: dir.join("ca.crt"),
            csr: dir.join("client.csr"),
            meta: dir.join("cert-meta.json"),
        }
    }
}

/// Generates, stores, and verifies device mTLS credentials.
pub struct CertificateManager {
    paths: CertPaths,
}

fn write_secret(path: &Path, bytes: &[u8]) -> SignageResult<()> {
    crate::utils::atomic_write(path, bytes)
        .map_err(|e| SignageError::Cert(format!("writing {}: {e}", path.display())))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .map_err(|e| SignageError::Cert(format!("chmod {}: {e}", path.display())))?;
    }
    Ok(())
}

impl CertificateManager {
    pub fn new(paths: CertPaths) -> Self {
        Self { paths }
    }

    /// Returns true when key/cert/CA files all exist.
    pub fn has_material(&self) -> bool {
        self.paths.key.exists() && self.paths.cert.exists() && self.paths.ca.exists()
    }

    /// Generates a fresh RSA-2048 keypair and a PKCS#10 CSR with subject
    /// CN = `common_name`, O = [`CERT_SUBJECT_ORG`]. Persists the key and
    /// the CSR, returns the CSR PEM for submission to the backend.
    ///
    /// RSA keygen is CPU-bound and runs on the blocking thread pool so it
    /// never stalls the async runtime's worker threads.
    pub async fn generate_csr(&self, common_name: &str) -> SignageResult<String> {
        let common_name = common_name.to_string();
        let (key_pem, csr_pem) = tokio::task::spawn_blocking(move || -> SignageResult<(String, String)> {
            let mut rng = rand::rngs::OsRng;
            let private_key = RsaPrivateKey::new(&mut rng, RSA_KEY_BITS)
                .map_err(|e| SignageError::Cert(format!("generating RSA key: {e}")))?;
            let key_pkcs8_der = private_key
                .to_pkcs8_der()
                .map_err(|e| SignageError::Cert(format!("encoding private key: {e}")))?;
            let key_pem = private_key
                .to_pkcs8_pem(pkcs8::LineEnding::LF)
                .map_err(|e| SignageError::Cert(format!("encoding private key PEM: {e}")))?;

            let rcgen_key = rcgen::KeyPair::from_pkcs8_der_and_sign_algo(
                &key_pkcs8_der.as_bytes().into(),
                &rcgen::PKCS_RSA_SHA256,
            )
            .map_err(|e| SignageError::Cert(format!("wrapping key for CSR: {e}")))?;

            let mut params = rcgen::CertificateParams::new(Vec::new())
                .map_err(|e| SignageError::Cert(format!("building CSR params: {e}")))?;
            let mut dn = rcgen::DistinguishedName::new();
            dn.push(rcgen::DnType::CommonName, &common_name);
            dn.push(rcgen::DnType::OrganizationName, CERT_SUBJECT_ORG);
            params.distinguished_name = dn;

            let csr = params
                .serialize_request(&rcgen_key)
                .map_err(|e| SignageError::Cert(format!("serializing CSR: {e}")))?;
            let csr_pem = csr.pem().map_err(|e| SignageError::Cert(e.to_string()))?;

            Ok((key_pem.to_string(), csr_pem))
        })
        .await
        .map_err(|e| SignageError::Cert(format!("CSR generation task panicked: {e}")))??;

        write_secret(&self.paths.key, key_pem.as_bytes())?;
        write_secret(&self.paths.csr, csr_pem.as_bytes())?;

        Ok(csr_pem)
    }

    /// Stores a backend-issued client certificate and CA bundle, parses
    /// the certificate to derive [`CertMetadata`], and persists it.
    pub fn store_issued(&self, cert_pem: &str, ca_pem: &str) -> SignageResult<CertMetadata> {
        write_secret(&self.paths.cert, cert_pem.as_bytes())?;
        write_secret(&self.paths.ca, ca_pem.as_bytes())?;
        let meta = parse_metadata(cert_pem)?;
        crate::utils::atomic_write_json(&self.paths.meta, &meta)
            .map_err(|e| SignageError::Cert(format!("writing cert metadata: {e}")))?;
        Ok(meta)
    }

    /// Loads persisted metadata, if any.
    pub fn metadata(&self) -> Option<CertMetadata> {
        let bytes = std::fs::read(&self.paths.meta).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    /// True when no cert exists, or the cert expires within `renew_before_days`.
    pub fn needs_renewal(&self, renew_before_days: i64) -> bool {
        let renew_before_days = if renew_before_days <= 0 {
            DEFAULT_RENEW_BEFORE_DAYS
        } else {
            renew_before_days
        };
        match self.metadata() {
            None => true,
            Some(meta) => {
                let now = crate::utils::now_millis() as i64 / 1000;
                let threshold = now + renew_before_days * 86_400;
                meta.valid_to < threshold
            }
        }
    }

    /// True only when all three files are present and the current time
    /// falls within `[validFrom, validTo]`.
    pub fn verify_certificate(&self) -> bool {
        if !self.has_material() {
            return false;
        }
        let Some(meta) = self.metadata() else {
            return false;
        };
        let now = crate::utils::now_millis() as i64 / 1000;
        now >= meta.valid_from && now <= meta.valid_to
    }

    /// Wipes all credential material. Used when re-pairing from scratch.
    pub fn delete_certificates(&self) -> SignageResult<()> {
        for path in [
            &self.paths.key,
            &self.paths.cert,
            &self.paths.ca,
            &self.paths.csr,
            &self.paths.meta,
        ] {
            if path.exists() {
                std::fs::remove_file(path)
                    .map_err(|e| SignageError::Cert(format!("removing {}: {e}", path.display())))?;
            }
        }
        Ok(())
    }

    pub fn read_pem_bundle(&self) -> SignageResult<(Vec<u8>, Vec<u8>, Vec<u8>)> {
        let key = std::fs::read(&self.paths.key)
            .map_err(|e| SignageError::Cert(format!("reading key: {e}")))?;
        let cert = std::fs::read(&self.paths.cert)
            .map_err(|e| SignageError::Cert(format!("reading cert: {e}")))?;
        let ca = std::fs::read(&self.paths.ca)
            .map_err(|e| SignageError::Cert(format!("reading ca: {e}")))?;
        Ok((cert, key, ca))
    }
}

fn parse_metadata(cert_pem: &str) -> SignageResult<CertMetadata> {
    let der = pem_to_der(cert_pem)?;
    let (_, cert) = x509_parser::parse_x509_certificate(&der)
        .map_err(|e| SignageError::Cert(format!("parsing certificate: {e}")))?;

    let mut hasher = Sha256::new();
    hasher.update(&der);
    let fingerprint = hex_encode(&hasher.finalize());

    Ok(CertMetadata {
        fingerprint,
        valid_from: cert.validity().not_before.timestamp(),
        valid_to: cert.validity().not_after.timestamp(),
        subject: cert.subject().to_string(),
        issuer: cert.issuer().to_string(),
        serial: cert.raw_serial_as_string(),
    })
}

fn pem_to_der(pem_str: &str) -> SignageResult<Vec<u8>> {
    let pem = pem::parse(pem_str).map_err(|e| SignageError::Cert(format!("decoding PEM: {e}")))?;
    Ok(pem.contents().to_vec())
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_manager_has_no_material() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = CertificateManager::new(CertPaths::under(dir.path()));
        assert!(!mgr.has_material());
        assert!(mgr.needs_renewal(30));
        assert!(!mgr.verify_certificate());
    }

    #[tokio::test]
    async fn generate_csr_persists_key_and_returns_pem() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = CertificateManager::new(CertPaths::under(dir.path()));
        let csr_pem = mgr.generate_csr("device-123").await.unwrap();
        assert!(csr_pem.contains("CERTIFICATE REQUEST"));
        assert!(dir.path().join("client.key").exists());
        assert!(dir.path().join("client.csr").exists());
    }

    #[tokio::test]
    async fn delete_certificates_removes_all_files() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = CertificateManager::new(CertPaths::under(dir.path()));
        mgr.generate_csr("device-123").await.unwrap();
        mgr.delete_certificates().unwrap();
        assert!(!dir.path().join("client.key").exists());
        assert!(!dir.path().join("client.csr").exists());
    }
}
