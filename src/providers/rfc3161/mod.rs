//! RFC 3161 Time-Stamp Authority provider
//!
//! Stateless per call: build a DER TimeStampReq for the record's imprint,
//! POST it as `application/timestamp-query`, and structurally validate the
//! PKIStatus of the response. A fresh nonce makes every retry a new request
//! rather than a replay, so duplicate tokens for the same content are
//! harmless. On success the raw request and response bytes are persisted
//! verbatim as sidecar files with a JSON manifest, so an offline verifier
//! can replay `openssl ts -verify`.

pub mod imprint;
pub mod request;

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

use crate::config::TsaConfig;
use crate::error::ProviderError;
use crate::providers::{
    ConnectionStatus, Provider, ProviderKey, PushFailure, PushOutcome, PushSuccess,
};
use crate::record::AnchorRecord;

pub use imprint::{derive_imprint, ImprintMethod};

/// RFC 3161 TSA provider
pub struct TsaProvider {
    config: TsaConfig,
    client: reqwest::Client,
}

impl TsaProvider {
    pub fn new(config: TsaConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self { config, client })
    }

    async fn submit(&self, body: Vec<u8>) -> Result<reqwest::Response, reqwest::Error> {
        let mut req = self
            .client
            .post(&self.config.url)
            .header("Content-Type", "application/timestamp-query")
            .body(body);
        if let Some(username) = &self.config.username {
            req = req.basic_auth(username, self.config.password.as_deref());
        }
        req.send().await
    }

    /// Write request/response DER sidecars plus the audit manifest
    async fn persist_artifacts(
        &self,
        dir: &Path,
        record: &AnchorRecord,
        method: ImprintMethod,
        request_der: &[u8],
        response_der: &[u8],
    ) -> Result<(), ProviderError> {
        let stem = &record.hash;
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| ProviderError::Artifact(e.to_string()))?;

        let tsq = dir.join(format!("{stem}.tsq"));
        let tsr = dir.join(format!("{stem}.tsr"));
        tokio::fs::write(&tsq, request_der)
            .await
            .map_err(|e| ProviderError::Artifact(e.to_string()))?;
        tokio::fs::write(&tsr, response_der)
            .await
            .map_err(|e| ProviderError::Artifact(e.to_string()))?;

        let manifest = serde_json::json!({
            "document_id": record.document_id,
            "content_hash": record.hash,
            "hash_algorithm": record.algorithm.as_str(),
            "imprint_method": method,
            "tsa_url": self.config.url,
            "request_file": tsq.file_name().and_then(|n| n.to_str()),
            "response_file": tsr.file_name().and_then(|n| n.to_str()),
            "verify_command": format!(
                "openssl ts -verify -in {stem}.tsr -queryfile {stem}.tsq -CAfile <tsa-ca.pem>"
            ),
            "certificate_source": self.config.cert_url.as_deref()
                .unwrap_or("system trust store"),
        });
        let manifest_bytes = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| ProviderError::Artifact(e.to_string()))?;
        tokio::fs::write(dir.join(format!("{stem}.manifest.json")), manifest_bytes)
            .await
            .map_err(|e| ProviderError::Artifact(e.to_string()))?;
        Ok(())
    }
}

/// Map an HTTP-level TSA failure to the structured outcome
fn outcome_for_http_status(status: u16) -> PushFailure {
    match status {
        429 => PushFailure::rate_limited("TSA rate limited", Some(429)),
        s if s >= 500 => PushFailure::transient(format!("TSA returned status {s}"), Some(s)),
        s => PushFailure::permanent(format!("TSA returned status {s}"), Some(s)),
    }
}

#[async_trait]
impl Provider for TsaProvider {
    fn key(&self) -> ProviderKey {
        ProviderKey::Tsa
    }

    async fn push(&self, record: &AnchorRecord) -> Result<PushOutcome, ProviderError> {
        if self.config.url.is_empty() {
            return Err(ProviderError::NotConfigured(
                "no TSA endpoint configured".to_string(),
            ));
        }

        let (method, imprint) = derive_imprint(&record.hash, record.algorithm);
        let nonce = request::generate_nonce();
        let request_der = request::build_request(&imprint, &nonce);

        tracing::debug!(
            tsa_url = %self.config.url,
            imprint_method = %method,
            "requesting timestamp"
        );

        let response = match self.submit(request_der.clone()).await {
            Ok(r) => r,
            Err(e) => {
                return Ok(PushOutcome::Failed(PushFailure::transient(
                    format!("TSA request failed: {e}"),
                    None,
                )))
            }
        };

        let http_status = response.status().as_u16();
        if !response.status().is_success() {
            return Ok(PushOutcome::Failed(outcome_for_http_status(http_status)));
        }

        let body = match response.bytes().await {
            Ok(b) => b.to_vec(),
            Err(e) => {
                return Ok(PushOutcome::Failed(PushFailure::transient(
                    format!("failed to read TSA response: {e}"),
                    Some(http_status),
                )))
            }
        };

        let parsed = match request::parse_response(&body) {
            Ok(p) => p,
            Err(e) => {
                return Ok(PushOutcome::Failed(PushFailure::transient(
                    format!("malformed TSA response: {e}"),
                    Some(http_status),
                )))
            }
        };

        if !parsed.granted {
            // The TSA explicitly rejected the request; retrying the same
            // imprint will not change its mind
            return Ok(PushOutcome::Failed(PushFailure::permanent(
                format!("TSA rejected request with PKIStatus {}", parsed.status),
                Some(http_status),
            )));
        }

        if let Some(dir) = self.config.artifact_dir.clone() {
            if let Err(e) = self
                .persist_artifacts(&dir, record, method, &request_der, &body)
                .await
            {
                tracing::warn!(error = %e, "timestamp granted but sidecar persistence failed");
                return Ok(PushOutcome::Failed(PushFailure::transient(
                    format!("sidecar persistence failed: {e}"),
                    None,
                )));
            }
        }

        tracing::info!(
            tsa_url = %self.config.url,
            serial = parsed.serial.as_deref().unwrap_or("unknown"),
            "timestamp token received"
        );

        Ok(PushOutcome::Anchored(
            PushSuccess {
                url: None,
                details: serde_json::Value::Null,
            }
            .with_details(serde_json::json!({
                "imprint_method": method,
                "pki_status": parsed.status,
                "serial": parsed.serial,
                "gen_time": parsed.gen_time,
            })),
        ))
    }

    async fn test_connection(&self) -> Result<ConnectionStatus, ProviderError> {
        if self.config.url.is_empty() {
            return Ok(ConnectionStatus::failed("no TSA endpoint configured"));
        }

        // A real timestamp over a throwaway imprint; TSA requests have no
        // dry-run form, and an extra token is not a permanent remote artifact
        let probe = [0x00u8; 32];
        let nonce = request::generate_nonce();
        let der = request::build_request(&probe, &nonce);

        match self.submit(der).await {
            Ok(response) if response.status().is_success() => {
                let body = response.bytes().await.map(|b| b.to_vec()).unwrap_or_default();
                match request::parse_response(&body) {
                    Ok(parsed) if parsed.granted => {
                        Ok(ConnectionStatus::ok("TSA reachable and granting"))
                    }
                    Ok(parsed) => Ok(ConnectionStatus::failed(format!(
                        "TSA reachable but returned PKIStatus {}",
                        parsed.status
                    ))),
                    Err(e) => Ok(ConnectionStatus::failed(format!(
                        "TSA returned unparseable response: {e}"
                    ))),
                }
            }
            Ok(response) => Ok(ConnectionStatus::failed(format!(
                "TSA returned status {}",
                response.status()
            ))),
            Err(e) => Ok(ConnectionStatus::failed(format!("TSA unreachable: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{ContentDigest, HashAlgorithm, IntegrityMode};

    fn record() -> AnchorRecord {
        AnchorRecord::new(
            "doc:3",
            ContentDigest {
                hash: "0a".repeat(32),
                algorithm: HashAlgorithm::Sha256,
                mode: IntegrityMode::Plain,
            },
        )
    }

    #[test]
    fn test_http_status_mapping() {
        let f = outcome_for_http_status(429);
        assert!(f.retryable && f.rate_limited);

        let f = outcome_for_http_status(503);
        assert!(f.retryable && !f.rate_limited);

        let f = outcome_for_http_status(400);
        assert!(!f.retryable);
        assert_eq!(f.http_status, Some(400));
    }

    #[tokio::test]
    async fn test_push_without_endpoint_is_not_configured() {
        let config = TsaConfig {
            enabled: true,
            url: String::new(),
            ..Default::default()
        };
        let provider = TsaProvider::new(config).unwrap();
        let err = provider.push(&record()).await.unwrap_err();
        assert!(matches!(err, ProviderError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn test_sidecar_manifest_records_imprint_method() {
        let dir = tempfile::tempdir().unwrap();
        let config = TsaConfig {
            enabled: true,
            artifact_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let provider = TsaProvider::new(config).unwrap();
        let record = record();
        let (method, imprint) = derive_imprint(&record.hash, record.algorithm);
        let req_der = request::build_request(&imprint, &[1u8; 8]);
        let resp_der = request::tests::stub_response(0);

        provider
            .persist_artifacts(dir.path(), &record, method, &req_der, &resp_der)
            .await
            .unwrap();

        let stem = &record.hash;
        let tsq = std::fs::read(dir.path().join(format!("{stem}.tsq"))).unwrap();
        assert_eq!(tsq, req_der);
        let manifest: serde_json::Value = serde_json::from_slice(
            &std::fs::read(dir.path().join(format!("{stem}.manifest.json"))).unwrap(),
        )
        .unwrap();
        assert_eq!(manifest["imprint_method"], "raw_digest");
        assert_eq!(manifest["certificate_source"], "system trust store");
        assert!(manifest["verify_command"]
            .as_str()
            .unwrap()
            .contains("openssl ts -verify"));
    }
}
