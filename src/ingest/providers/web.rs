// src/ingest/providers/web.rs
use async_trait::async_trait;
use tracing::{debug, warn};
use url::Url;

use crate::error::{ConfigError, FetchError};
use crate::ingest::http::HttpFetcher;
use crate::ingest::providers::{html, rss};
use crate::ingest::types::{SourceAdapter, SourceBatch, SourceDescriptor, SourceKind};
use crate::model::SourceCursor;

/// Adapter for feed and page sources (`rss`, `web`, `html` kinds).
pub struct WebSourceAdapter {
    descriptor: SourceDescriptor,
    http: HttpFetcher,
}

impl WebSourceAdapter {
    pub fn new(descriptor: SourceDescriptor, http: HttpFetcher) -> Self {
        Self { descriptor, http }
    }

    async fn fetch_feed(&self, url: &str) -> Result<SourceBatch, FetchError> {
        let body = self.http.get_text(url).await?;
        Ok(rss::parse_feed(&body)?)
    }

    /// JSON-LD first; anchors only when JSON-LD yields nothing usable.
    async fn fetch_page(&self) -> Result<SourceBatch, FetchError> {
        let base = Url::parse(&self.descriptor.url).map_err(|e| {
            ConfigError::Invalid(format!("source {} url: {e}", self.descriptor.name))
        })?;
        let body = self.http.get_text(base.as_str()).await?;

        let mut batch = SourceBatch::from_results(html::extract_json_ld(&body));
        if batch.candidates.is_empty() {
            batch.candidates = html::extract_anchors(&body, &base);
        }
        debug!(
            target: "ingest",
            source = %self.descriptor.name,
            candidates = batch.candidates.len(),
            "page scraped"
        );
        Ok(batch)
    }
}

#[async_trait]
impl SourceAdapter for WebSourceAdapter {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    async fn fetch(&self, _cursor: Option<&SourceCursor>) -> Result<SourceBatch, FetchError> {
        match self.descriptor.kind {
            SourceKind::Rss => self.fetch_feed(&self.descriptor.url).await,
            SourceKind::Html => self.fetch_page().await,
            SourceKind::Web => {
                if let Some(feed_url) = self.descriptor.rss_url.as_deref() {
                    match self.fetch_feed(feed_url).await {
                        Ok(batch) if !batch.candidates.is_empty() => return Ok(batch),
                        Ok(_) => debug!(
                            target: "ingest",
                            source = %self.descriptor.name,
                            "feed empty, scraping page"
                        ),
                        Err(e) => warn!(
                            target: "ingest",
                            source = %self.descriptor.name,
                            error = %e,
                            "feed failed, scraping page"
                        ),
                    }
                }
                self.fetch_page().await
            }
            SourceKind::X => Err(ConfigError::Invalid(format!(
                "source {} has kind x but was given a web adapter",
                self.descriptor.name
            ))
            .into()),
        }
    }
}
