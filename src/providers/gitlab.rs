//! GitLab repository provider
//!
//! Same content-addressed layout as the GitHub adapter, delivered through
//! the GitLab repository-files API. GitLab reports a pre-existing file as a
//! 400 with an "already exists" message rather than a conflict status, so
//! that specific rejection is folded into the idempotent-success path.

use async_trait::async_trait;
use base64::Engine as _;
use std::time::Duration;

use crate::config::GitlabConfig;
use crate::error::ProviderError;
use crate::providers::github::{anchor_path, map_git_status};
use crate::providers::{
    ConnectionStatus, Provider, ProviderKey, PushFailure, PushOutcome, PushSuccess,
};
use crate::record::AnchorRecord;

/// Percent-encode one URL path component (RFC 3986 unreserved set)
pub(crate) fn encode_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

/// GitLab repository-files provider
pub struct GitlabProvider {
    config: GitlabConfig,
    client: reqwest::Client,
}

impl GitlabProvider {
    pub fn new(config: GitlabConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("anchor-relay/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { config, client })
    }

    fn file_url(&self, path: &str) -> String {
        format!(
            "{}/projects/{}/repository/files/{}",
            self.config.api_base,
            encode_component(&self.config.project_id),
            encode_component(path)
        )
    }
}

#[async_trait]
impl Provider for GitlabProvider {
    fn key(&self) -> ProviderKey {
        ProviderKey::Gitlab
    }

    async fn push(&self, record: &AnchorRecord) -> Result<PushOutcome, ProviderError> {
        if !self.config.is_enabled() {
            return Err(ProviderError::NotConfigured(
                "gitlab token and project id are required".to_string(),
            ));
        }

        let path = anchor_path(&self.config.folder, &record.hash);
        let payload = record.canonical_json().map_err(|e| {
            ProviderError::InvalidResponse(format!("record serialization failed: {e}"))
        })?;
        let body = serde_json::json!({
            "branch": self.config.branch,
            "encoding": "base64",
            "content": base64::engine::general_purpose::STANDARD.encode(&payload),
            "commit_message": format!("Anchor {}", record.document_id),
        });

        let response = match self
            .client
            .post(self.file_url(&path))
            .header("PRIVATE-TOKEN", &self.config.token)
            .json(&body)
            .send()
            .await
        {
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
            tracing::info!(path = %path, "anchor committed to gitlab");
            return Ok(PushOutcome::Anchored(PushSuccess {
                url: None,
                details: serde_json::json!({
                    "file_path": parsed["file_path"].as_str().unwrap_or(&path),
                    "branch": self.config.branch,
                }),
            }));
        }

        let excerpt = response.text().await.unwrap_or_default();
        let excerpt = excerpt.chars().take(200).collect::<String>();

        // GitLab rejects a duplicate path with 400 "already exists"; the
        // path encodes the content hash, so the existing file IS this anchor
        if status == 400 && excerpt.to_ascii_lowercase().contains("exist") {
            tracing::info!(path = %path, "anchor already present on gitlab");
            return Ok(PushOutcome::Anchored(
                PushSuccess {
                    url: None,
                    details: serde_json::Value::Null,
                }
                .with_details(serde_json::json!({ "file_path": path, "existing": true })),
            ));
        }
        if status == 400 {
            return Ok(PushOutcome::Failed(PushFailure::permanent(
                format!("rejected request: {excerpt}"),
                Some(400),
            )));
        }
        if status == 409 {
            return Ok(PushOutcome::Failed(PushFailure::transient(
                format!("write conflict: {excerpt}"),
                Some(409),
            )));
        }

        Ok(PushOutcome::Failed(map_git_status(status, &excerpt)))
    }

    async fn test_connection(&self) -> Result<ConnectionStatus, ProviderError> {
        if !self.config.is_enabled() {
            return Ok(ConnectionStatus::failed(
                "gitlab token and project id are required",
            ));
        }

        let url = format!(
            "{}/projects/{}",
            self.config.api_base,
            encode_component(&self.config.project_id)
        );
        match self
            .client
            .get(url)
            .header("PRIVATE-TOKEN", &self.config.token)
            .send()
            .await
        {
            Ok(r) if r.status().is_success() => Ok(ConnectionStatus::ok(format!(
                "project {} reachable",
                self.config.project_id
            ))),
            Ok(r) => Ok(ConnectionStatus::failed(format!(
                "gitlab returned status {}",
                r.status()
            ))),
            Err(e) => Ok(ConnectionStatus::failed(format!("gitlab unreachable: {e}"))),
        }
    }
}
