// src/ingest/types.rs
use serde::{Deserialize, Serialize};

use crate::error::{FetchError, ParseError};
use crate::model::SourceCursor;

/// How a source is fetched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// `url` is an RSS/Atom feed.
    Rss,
    /// Try `rss_url` first, fall back to scraping the `url` page.
    #[default]
    Web,
    /// Scrape the `url` page only (JSON-LD, then anchors).
    Html,
    /// Social timeline via the X API; `url` is the profile, `name` the handle.
    X,
}

/// One configured external content source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub rss_url: Option<String>,
    #[serde(default)]
    pub kind: SourceKind,
    #[serde(default)]
    pub default_tags: Vec<String>,
}

impl SourceDescriptor {
    pub fn new(id: &str, name: &str, kind: SourceKind, url: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            url: url.to_string(),
            rss_url: None,
            kind,
            default_tags: Vec::new(),
        }
    }

    pub fn with_rss(mut self, rss_url: &str) -> Self {
        self.rss_url = Some(rss_url.to_string());
        self
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.default_tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    /// Stable key used for ids and cursors: the slugged `id`, or the slugged
    /// name when no id was configured.
    pub fn normalized_id(&self) -> String {
        let raw = if self.id.trim().is_empty() {
            &self.name
        } else {
            &self.id
        };
        slugify(raw)
    }
}

/// Lowercase, ascii alphanumerics kept, every other run collapsed to `_`.
pub fn slugify(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut pending_sep = false;
    for c in s.trim().trim_start_matches('@').chars() {
        if c.is_ascii_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.push(c.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }
    out
}

/// Untrusted record straight out of a feed, page or API payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawCandidate {
    pub title: Option<String>,
    pub url: Option<String>,
    pub summary: Option<String>,
    /// Structured date field as published (RFC 2822, RFC 3339, ...).
    pub date: Option<String>,
    /// Surrounding free text, used to recover a date when `date` is absent.
    pub context: Option<String>,
    /// Source-provided labels (e.g. hashtags).
    pub tags: Vec<String>,
    pub author_handle: Option<String>,
    pub author_name: Option<String>,
    pub alt_url: Option<String>,
}

/// Output of one adapter fetch.
#[derive(Debug, Default)]
pub struct SourceBatch {
    pub candidates: Vec<RawCandidate>,
    /// Blocks that failed to parse; skipped, counted, never fatal.
    pub parse_errors: Vec<ParseError>,
    /// Watermark to persist after a successful fetch.
    pub cursor: Option<SourceCursor>,
}

impl SourceBatch {
    pub fn from_results(results: Vec<Result<RawCandidate, ParseError>>) -> Self {
        let mut batch = SourceBatch::default();
        for r in results {
            match r {
                Ok(c) => batch.candidates.push(c),
                Err(e) => batch.parse_errors.push(e),
            }
        }
        batch
    }
}

#[async_trait::async_trait]
pub trait SourceAdapter: Send + Sync {
    fn descriptor(&self) -> &SourceDescriptor;

    /// Fetch candidates. `cursor` is the last persisted watermark, for sources
    /// that support incremental queries.
    async fn fetch(&self, cursor: Option<&SourceCursor>) -> Result<SourceBatch, FetchError>;
}
