//! GitHub repository provider
//!
//! Commits each anchor record as a JSON file at a content-addressed path
//! (`{folder}/{hash[..2]}/{hash}.json`) via the contents API. The path is
//! derived from the content hash, so a crash-and-retry either recreates the
//! identical file or collides with the previous attempt; a conflict where
//! the file already exists is therefore treated as delivered.

use async_trait::async_trait;
use base64::Engine as _;
use std::time::Duration;

use crate::config::GithubConfig;
use crate::error::ProviderError;
use crate::providers::{
    ConnectionStatus, Provider, ProviderKey, PushFailure, PushOutcome, PushSuccess,
};
use crate::record::AnchorRecord;

/// Content-addressed repository path for an anchor record
///
/// A two-character shard directory keeps folder listings usable once the
/// anchor count grows.
pub(crate) fn anchor_path(folder: &str, hash: &str) -> String {
    let shard = if hash.len() >= 2 { &hash[..2] } else { hash };
    format!("{folder}/{shard}/{hash}.json")
}

/// Failure mapping for non-conflict git-host responses
pub(crate) fn map_git_status(status: u16, body_excerpt: &str) -> PushFailure {
    match status {
        401 | 403 => PushFailure::permanent(
            format!("authentication rejected ({status}): {body_excerpt}"),
            Some(status),
        ),
        404 => PushFailure::permanent(
            format!("repository or branch not found: {body_excerpt}"),
            Some(404),
        ),
        429 => PushFailure::rate_limited("rate limited", Some(429)),
        s if s >= 500 => {
            PushFailure::transient(format!("server error ({s}): {body_excerpt}"), Some(s))
        }
        s => PushFailure::permanent(format!("unexpected status {s}: {body_excerpt}"), Some(s)),
    }
}

/// GitHub contents-API provider
pub struct GithubProvider {
    config: GithubConfig,
    client: reqwest::Client,
}

impl GithubProvider {
    pub fn new(config: GithubConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("anchor-relay/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { config, client })
    }

    fn contents_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/contents/{}",
            self.config.api_base, self.config.owner, self.config.repo, path
        )
    }

    /// Check whether the content-addressed file already exists on the branch
    async fn path_exists(&self, path: &str) -> Result<Option<String>, reqwest::Error> {
        let response = self
            .client
            .get(self.contents_url(path))
            .bearer_auth(&self.config.token)
            .header("Accept", "application/vnd.github+json")
            .query(&[("ref", self.config.branch.as_str())])
            .send()
            .await?;
        if !response.status().is_success() {
            return Ok(None);
        }
        let body: serde_json::Value = response.json().await?;
        Ok(body["html_url"].as_str().map(str::to_string))
    }
}

#[async_trait]
impl Provider for GithubProvider {
    fn key(&self) -> ProviderKey {
        ProviderKey::Github
    }

    async fn push(&self, record: &AnchorRecord) -> Result<PushOutcome, ProviderError> {
        if !self.config.is_enabled() {
            return Err(ProviderError::NotConfigured(
                "github token, owner and repo are required".to_string(),
            ));
        }

        let path = anchor_path(&self.config.folder, &record.hash);
        let payload = record.canonical_json().map_err(|e| {
            ProviderError::InvalidResponse(format!("record serialization failed: {e}"))
        })?;
        let body = serde_json::json!({
            "message": format!("Anchor {}", record.document_id),
            "content": base64::engine::general_purpose::STANDARD.encode(&payload),
            "branch": self.config.branch,
        });

        let response = match self
            .client
            .put(self.contents_url(&path))
            .bearer_auth(&self.config.token)
            .header("Accept", "application/vnd.github+json")
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
            let url = parsed["content"]["html_url"].as_str().map(str::to_string);
            tracing::info!(path = %path, "anchor committed to github");
            return Ok(PushOutcome::Anchored(PushSuccess {
                url,
                details: serde_json::json!({
                    "path": path,
                    "commit": parsed["commit"]["sha"],
                }),
            }));
        }

        let excerpt = response.text().await.unwrap_or_default();
        let excerpt = excerpt.chars().take(200).collect::<String>();

        if status == 409 || status == 422 {
            // The content-addressed path means an existing file for this
            // hash is the same anchor; confirm before declaring success
            match self.path_exists(&path).await {
                Ok(Some(url)) => {
                    tracing::info!(path = %path, "anchor already present on github");
                    return Ok(PushOutcome::Anchored(
                        PushSuccess::at(url)
                            .with_details(serde_json::json!({ "path": path, "existing": true })),
                    ));
                }
                Ok(None) if status == 409 => {
                    return Ok(PushOutcome::Failed(PushFailure::transient(
                        format!("write conflict: {excerpt}"),
                        Some(409),
                    )))
                }
                Ok(None) => {
                    return Ok(PushOutcome::Failed(PushFailure::permanent(
                        format!("rejected as unprocessable: {excerpt}"),
                        Some(422),
                    )))
                }
                Err(e) => {
                    return Ok(PushOutcome::Failed(PushFailure::transient(
                        format!("conflict check failed: {e}"),
                        Some(status),
                    )))
                }
            }
        }

        Ok(PushOutcome::Failed(map_git_status(status, &excerpt)))
    }

    async fn test_connection(&self) -> Result<ConnectionStatus, ProviderError> {
        if !self.config.is_enabled() {
            return Ok(ConnectionStatus::failed(
                "github token, owner and repo are required",
            ));
        }

        let url = format!(
            "{}/repos/{}/{}",
            self.config.api_base, self.config.owner, self.config.repo
        );
        match self
            .client
            .get(url)
            .bearer_auth(&self.config.token)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
        {
            Ok(r) if r.status().is_success() => Ok(ConnectionStatus::ok(format!(
                "repository {}/{} reachable",
                self.config.owner, self.config.repo
            ))),
            Ok(r) => Ok(ConnectionStatus::failed(format!(
                "github returned status {}",
                r.status()
            ))),
            Err(e) => Ok(ConnectionStatus::failed(format!("github unreachable: {e}"))),
        }
    }
}
