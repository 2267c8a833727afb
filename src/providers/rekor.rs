//! Transparency-log provider (Rekor API)
//!
//! The logged artifact is the SHA-256 of the record's canonical JSON, not
//! the raw content hash. That binds the log entry to the exact payload
//! committed to the other providers, so a verifier holding any copy of the
//! JSON can recompute the artifact hash and check inclusion independently.
//!
//! Signing prefers an operator-supplied long-lived Ed25519 keypair; without
//! one a per-request ephemeral key is generated and the entry's provenance
//! is marked accordingly. A 409 duplicate is the idempotency path: the log
//! already holds this exact artifact, so the existing entry is the success.

use async_trait::async_trait;
use base64::Engine as _;
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::config::RekorConfig;
use crate::error::ProviderError;
use crate::providers::{
    ConnectionStatus, Provider, ProviderKey, PushFailure, PushOutcome, PushSuccess,
};
use crate::record::AnchorRecord;
use crate::signing::SigningKeypair;

/// Assemble the hashedrekord v0.0.1 submission body
///
/// `customProperties` carries human-readable provenance; nothing in it is
/// cryptographically verified by the log.
pub(crate) fn build_entry_body(
    artifact_hash_hex: &str,
    signature: &[u8; 64],
    public_key_pem: &str,
    custom_properties: serde_json::Value,
) -> serde_json::Value {
    let b64 = base64::engine::general_purpose::STANDARD;
    serde_json::json!({
        "apiVersion": "0.0.1",
        "kind": "hashedrekord",
        "spec": {
            "data": {
                "hash": {
                    "algorithm": "sha256",
                    "value": artifact_hash_hex,
                }
            },
            "signature": {
                "content": b64.encode(signature),
                "publicKey": {
                    "content": b64.encode(public_key_pem.as_bytes()),
                }
            }
        },
        "customProperties": custom_properties,
    })
}

/// Extract (uuid, log index) from a 201 creation response
///
/// The body is a single-entry map keyed by the entry UUID.
pub(crate) fn parse_created_entry(body: &serde_json::Value) -> Option<(String, Option<u64>)> {
    let map = body.as_object()?;
    let (uuid, entry) = map.iter().next()?;
    Some((uuid.clone(), entry["logIndex"].as_u64()))
}

/// Public lookup URL for a committed entry
pub(crate) fn lookup_url(base_url: &str, log_index: u64) -> String {
    format!(
        "{}/api/v1/log/entries?logIndex={log_index}",
        base_url.trim_end_matches('/')
    )
}

/// Success for a 409 duplicate: the log already holds this artifact
///
/// The existing entry's URL comes from the Location header when the log
/// provides one.
pub(crate) fn duplicate_success(
    base_url: &str,
    artifact_hash_hex: &str,
    location: Option<&str>,
) -> PushSuccess {
    let url = location.map(|loc| {
        if loc.starts_with("http") {
            loc.to_string()
        } else {
            format!("{}{loc}", base_url.trim_end_matches('/'))
        }
    });
    PushSuccess {
        url,
        details: serde_json::json!({
            "artifact_hash": artifact_hash_hex,
            "existing": true,
        }),
    }
}

/// Failure mapping for non-duplicate transparency-log rejections
pub(crate) fn map_rekor_status(status: u16, body_excerpt: &str) -> PushFailure {
    match status {
        400 | 422 => PushFailure::permanent(
            format!("log rejected entry ({status}): {body_excerpt}"),
            Some(status),
        ),
        429 => PushFailure::rate_limited("log rate limited", Some(429)),
        s if s >= 500 => {
            PushFailure::transient(format!("log server error ({s}): {body_excerpt}"), Some(s))
        }
        s => PushFailure::permanent(format!("unexpected status {s}: {body_excerpt}"), Some(s)),
    }
}

/// Rekor-compatible transparency-log provider
pub struct RekorProvider {
    config: RekorConfig,
    client: reqwest::Client,
}

impl RekorProvider {
    pub fn new(config: RekorConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("anchor-relay/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { config, client })
    }

    fn entries_url(&self) -> String {
        format!(
            "{}/api/v1/log/entries",
            self.config.url.trim_end_matches('/')
        )
    }

    fn resolve_keypair(&self) -> Result<SigningKeypair, crate::signing::SigningError> {
        match &self.config.secret_key_hex {
            Some(secret) => {
                SigningKeypair::from_hex(secret, self.config.public_key_hex.as_deref())
            }
            None => Ok(SigningKeypair::ephemeral()),
        }
    }
}

#[async_trait]
impl Provider for RekorProvider {
    fn key(&self) -> ProviderKey {
        ProviderKey::Rekor
    }

    async fn push(&self, record: &AnchorRecord) -> Result<PushOutcome, ProviderError> {
        if self.config.url.is_empty() {
            return Err(ProviderError::NotConfigured(
                "transparency log endpoint is required".to_string(),
            ));
        }

        let keypair = match self.resolve_keypair() {
            Ok(k) => k,
            Err(e) => {
                // A malformed operator-supplied key never fixes itself
                return Ok(PushOutcome::Failed(PushFailure::permanent(
                    format!("signing key invalid: {e}"),
                    None,
                )));
            }
        };

        let payload = record.canonical_json().map_err(|e| {
            ProviderError::InvalidResponse(format!("record serialization failed: {e}"))
        })?;
        let artifact_hash: [u8; 32] = Sha256::digest(&payload).into();
        let artifact_hash_hex = hex::encode(artifact_hash);
        let signature = keypair.sign(&artifact_hash);

        let mut custom = serde_json::json!({
            "document_id": record.document_id,
            "content_hash": record.hash,
            "key_provenance": keypair.provenance(),
            "public_key_fingerprint": keypair.public_key_fingerprint(),
        });
        if let Some(url) = &self.config.public_key_url {
            custom["public_key_url"] = serde_json::Value::String(url.clone());
        }

        let body = build_entry_body(&artifact_hash_hex, &signature, &keypair.spki_pem(), custom);

        let response = match self.client.post(self.entries_url()).json(&body).send().await {
            Ok(r) => r,
            Err(e) => {
                return Ok(PushOutcome::Failed(PushFailure::transient(
                    format!("request failed: {e}"),
                    None,
                )))
            }
        };

        let status = response.status().as_u16();
        if response.status().is_success() {
            let parsed: serde_json::Value = response.json().await.unwrap_or_default();
            let (uuid, log_index) = parse_created_entry(&parsed)
                .unwrap_or_else(|| ("unknown".to_string(), None));
            let url = log_index.map(|n| lookup_url(&self.config.url, n));
            tracing::info!(
                uuid = %uuid,
                log_index = log_index.unwrap_or_default(),
                "entry committed to transparency log"
            );
            return Ok(PushOutcome::Anchored(PushSuccess {
                url,
                details: serde_json::json!({
                    "uuid": uuid,
                    "log_index": log_index,
                    "artifact_hash": artifact_hash_hex,
                    "key_provenance": keypair.provenance(),
                }),
            }));
        }

        if status == 409 {
            let location = response
                .headers()
                .get("Location")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            tracing::info!(artifact_hash = %artifact_hash_hex, "entry already in transparency log");
            return Ok(PushOutcome::Anchored(duplicate_success(
                &self.config.url,
                &artifact_hash_hex,
                location.as_deref(),
            )));
        }

        let excerpt = response.text().await.unwrap_or_default();
        let excerpt = excerpt.chars().take(200).collect::<String>();
        Ok(PushOutcome::Failed(map_rekor_status(status, &excerpt)))
    }

    async fn test_connection(&self) -> Result<ConnectionStatus, ProviderError> {
        if self.config.url.is_empty() {
            return Ok(ConnectionStatus::failed(
                "transparency log endpoint is required",
            ));
        }
        if let Err(e) = self.resolve_keypair() {
            return Ok(ConnectionStatus::failed(format!("signing key invalid: {e}")));
        }

        let url = format!("{}/api/v1/log", self.config.url.trim_end_matches('/'));
        match self.client.get(url).send().await {
            Ok(r) if r.status().is_success() => {
                Ok(ConnectionStatus::ok("transparency log reachable"))
            }
            Ok(r) => Ok(ConnectionStatus::failed(format!(
                "transparency log returned status {}",
                r.status()
            ))),
            Err(e) => Ok(ConnectionStatus::failed(format!(
                "transparency log unreachable: {e}"
            ))),
        }
    }
}
