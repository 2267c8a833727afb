//! Host-lifecycle enqueue hooks
//!
//! The three integration points a host application calls when content
//! reaches a durable state: a page or post is published, a native document
//! is saved, rendered HTML output is written. Each builds an anchor record
//! from its domain object and hands it to the queue; none of them learn
//! anything about providers, retries, or delivery outcomes.

use std::sync::Arc;

use crate::error::QueueError;
use crate::providers::ProviderKey;
use crate::queue::{AnchorQueue, EnqueueOutcome};
use crate::record::{AnchorRecord, ContentDigest};

/// Provenance fields supplied by the publishing host
#[derive(Debug, Clone, Default)]
pub struct PublishMetadata {
    pub title: Option<String>,
    pub url: Option<String>,
    pub author: Option<String>,
    pub site: Option<String>,
}

/// Enqueue-only facade handed to host integration layers
pub struct AnchorHooks {
    queue: Arc<AnchorQueue>,
    active: Vec<ProviderKey>,
}

impl AnchorHooks {
    pub fn new(queue: Arc<AnchorQueue>, active: Vec<ProviderKey>) -> Self {
        Self { queue, active }
    }

    /// A page or post was published
    pub async fn content_published(
        &self,
        document_id: impl Into<String>,
        digest: ContentDigest,
        meta: PublishMetadata,
    ) -> Result<EnqueueOutcome, QueueError> {
        let mut record = AnchorRecord::new(document_id, digest);
        if let Some(title) = meta.title {
            record = record.with_title(title);
        }
        if let Some(url) = meta.url {
            record = record.with_url(url);
        }
        if let Some(author) = meta.author {
            record = record.with_author(author);
        }
        if let Some(site) = meta.site {
            record = record.with_site(site);
        }
        self.queue.enqueue(record, &self.active).await
    }

    /// A native document was saved
    pub async fn document_saved(
        &self,
        document_id: impl Into<String>,
        content_id: impl Into<String>,
        digest: ContentDigest,
    ) -> Result<EnqueueOutcome, QueueError> {
        let record = AnchorRecord::new(document_id, digest).with_content_id(content_id);
        self.queue.enqueue(record, &self.active).await
    }

    /// Rendered HTML output was written for a document
    pub async fn html_rendered(
        &self,
        document_id: impl Into<String>,
        digest: ContentDigest,
        output_url: impl Into<String>,
    ) -> Result<EnqueueOutcome, QueueError> {
        let record = AnchorRecord::new(document_id, digest).with_url(output_url);
        self.queue.enqueue(record, &self.active).await
    }
}
