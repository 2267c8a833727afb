//! Anchor record data model
//!
//! An `AnchorRecord` is the immutable value object handed to the queue by
//! the enqueue call sites. Hashing itself is an external collaborator; this
//! module only models its output (`ContentDigest`) at the boundary.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::providers::ProviderKey;

/// Hash algorithm tag produced by the external hash subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha384 => "sha384",
            HashAlgorithm::Sha512 => "sha512",
        }
    }
}

impl std::fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the content hash is a plain digest or a keyed (HMAC) digest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegrityMode {
    Plain,
    Keyed,
}

/// Output of the external hash subsystem, consumed at the boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentDigest {
    /// Hex-encoded hash value
    pub hash: String,

    /// Algorithm that produced the hash
    pub algorithm: HashAlgorithm,

    /// Plain vs. keyed hashing
    pub mode: IntegrityMode,
}

/// Failure signals the hash subsystem may raise
///
/// `KeyUnavailable` is distinct so callers can record a downgrade to plain
/// hashing instead of silently swallowing it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DigestError {
    /// Keyed mode was requested but no key is available
    #[error("keyed hashing requested but no key is available")]
    KeyUnavailable,

    /// The requested algorithm is not supported by the host
    #[error("unsupported hash algorithm: {0}")]
    Unsupported(String),
}

/// Content-integrity record delivered to every active provider
///
/// Immutable once queued; the only mutation is stamping the provider key
/// on the copy handed to an adapter, so remote artifacts carry the leg
/// they were produced by.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorRecord {
    /// Identifier of the document being anchored
    pub document_id: String,

    /// Identifier of the originating content, if different from the document
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub content_id: Option<String>,

    /// Hash algorithm tag
    pub algorithm: HashAlgorithm,

    /// Hex-encoded hash value
    pub hash: String,

    /// Plain vs. keyed hashing
    pub mode: IntegrityMode,

    /// Human-readable provenance (not cryptographically verified)
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub site: Option<String>,

    /// Producing software tag
    pub generator: String,

    /// Provider key stamped on the copy being attempted
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub provider: Option<ProviderKey>,
}

impl AnchorRecord {
    pub fn new(document_id: impl Into<String>, digest: ContentDigest) -> Self {
        Self {
            document_id: document_id.into(),
            content_id: None,
            algorithm: digest.algorithm,
            hash: digest.hash,
            mode: digest.mode,
            title: None,
            url: None,
            author: None,
            site: None,
            generator: format!("anchor-relay/{}", env!("CARGO_PKG_VERSION")),
            provider: None,
        }
    }

    pub fn with_content_id(mut self, content_id: impl Into<String>) -> Self {
        self.content_id = Some(content_id.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn with_site(mut self, site: impl Into<String>) -> Self {
        self.site = Some(site.into());
        self
    }

    /// Copy of this record stamped with the provider being attempted
    pub fn for_provider(&self, provider: ProviderKey) -> Self {
        let mut copy = self.clone();
        copy.provider = Some(provider);
        copy
    }

    /// Canonical JSON serialization
    ///
    /// Field order follows the struct declaration and absent options are
    /// omitted, so the same record always serializes to the same bytes.
    /// The transparency-log artifact hash is computed over these bytes.
    pub fn canonical_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest() -> ContentDigest {
        ContentDigest {
            hash: "ab".repeat(32),
            algorithm: HashAlgorithm::Sha256,
            mode: IntegrityMode::Plain,
        }
    }

    #[test]
    fn test_record_builder() {
        let record = AnchorRecord::new("post:42", digest())
            .with_title("Hello")
            .with_url("https://example.com/hello")
            .with_site("example.com");

        assert_eq!(record.document_id, "post:42");
        assert_eq!(record.title.as_deref(), Some("Hello"));
        assert_eq!(record.author, None);
        assert!(record.generator.starts_with("anchor-relay/"));
    }

    #[test]
    fn test_for_provider_stamps_copy_only() {
        let record = AnchorRecord::new("doc:1", digest());
        let stamped = record.for_provider(ProviderKey::Tsa);
        assert_eq!(stamped.provider, Some(ProviderKey::Tsa));
        assert_eq!(record.provider, None);
    }

    #[test]
    fn test_canonical_json_is_deterministic() {
        let record = AnchorRecord::new("doc:1", digest()).with_title("t");
        let a = record.canonical_json().unwrap();
        let b = record.clone().canonical_json().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_canonical_json_omits_absent_fields() {
        let record = AnchorRecord::new("doc:1", digest());
        let json = String::from_utf8(record.canonical_json().unwrap()).unwrap();
        assert!(!json.contains("content_id"));
        assert!(!json.contains("provider"));
        assert!(json.contains("\"algorithm\":\"sha256\""));
        assert!(json.contains("\"mode\":\"plain\""));
    }

    #[test]
    fn test_algorithm_wire_names() {
        assert_eq!(HashAlgorithm::Sha256.to_string(), "sha256");
        assert_eq!(
            serde_json::to_string(&HashAlgorithm::Sha512).unwrap(),
            "\"sha512\""
        );
    }

    #[test]
    fn test_digest_error_display() {
        assert_eq!(
            DigestError::KeyUnavailable.to_string(),
            "keyed hashing requested but no key is available"
        );
        assert_eq!(
            DigestError::Unsupported("md5".to_string()).to_string(),
            "unsupported hash algorithm: md5"
        );
    }

    #[test]
    fn test_record_serde_roundtrip() {
        let record = AnchorRecord::new("doc:9", digest()).with_author("Ada");
        let json = serde_json::to_string(&record).unwrap();
        let back: AnchorRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record, back);
    }
}
