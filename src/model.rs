// src/model.rs
//! Canonical data shapes: timeline items, per-source cursors and the persisted
//! feed document.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ingest::types::SourceKind;

pub const SCHEMA_VERSION: u32 = 1;
pub const SEED_SOURCE_ID: &str = "seed";

/// One aggregated entry. `id` is `sha256(source_id | canonical url)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineItem {
    pub id: String,
    pub source_id: String,
    pub source_name: String,
    pub title: String,
    #[serde(default)]
    pub summary: String,
    pub url: String,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt_url: Option<String>,
}

impl TimelineItem {
    /// Persisted items must carry a non-blank id, title and url.
    pub fn is_valid(&self) -> bool {
        !self.id.trim().is_empty() && !self.title.trim().is_empty() && !self.url.trim().is_empty()
    }

    pub fn is_seed(&self) -> bool {
        self.source_id == SEED_SOURCE_ID
    }
}

/// Placeholder written when a feed has never produced anything.
pub fn seed_item(feed: &str, seed_url: &str, now: DateTime<Utc>) -> TimelineItem {
    TimelineItem {
        id: SEED_SOURCE_ID.to_string(),
        source_id: SEED_SOURCE_ID.to_string(),
        source_name: "Local".to_string(),
        title: format!("{feed} timeline seed (data sync not yet populated)."),
        summary: "This placeholder guarantees the feed never renders empty.".to_string(),
        url: seed_url.to_string(),
        date: now,
        tags: vec!["seed".to_string()],
        author_handle: None,
        author_name: None,
        alt_url: None,
    }
}

/// Highest external id observed for a source (snowflake-style, numeric string).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceCursor(String);

impl SourceCursor {
    pub fn new(raw: &str) -> Option<Self> {
        let t = raw.trim();
        if t.is_empty() {
            None
        } else {
            Some(Self(t.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Keep whichever of `current` and `candidate` is newer.
    pub fn advance(current: Option<Self>, candidate: &str) -> Option<Self> {
        let Some(next) = Self::new(candidate) else {
            return current;
        };
        match current {
            Some(cur) if compare_ids(cur.as_str(), next.as_str()) != Ordering::Less => Some(cur),
            _ => Some(next),
        }
    }
}

/// Compare two external ids.
///
/// Decimal strings compare exactly as unbounded integers (leading zeros ignored,
/// then digit count, then digits). If either side is not a decimal string we
/// fall back to length, then lexicographic order.
pub fn compare_ids(a: &str, b: &str) -> Ordering {
    fn digits(s: &str) -> Option<&str> {
        if s.is_empty() || !s.bytes().all(|c| c.is_ascii_digit()) {
            return None;
        }
        let stripped = s.trim_start_matches('0');
        Some(if stripped.is_empty() { "0" } else { stripped })
    }

    match (digits(a), digits(b)) {
        (Some(x), Some(y)) => x.len().cmp(&y.len()).then_with(|| x.cmp(y)),
        _ => a.len().cmp(&b.len()).then_with(|| a.cmp(b)),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub id: String,
    pub name: String,
    pub kind: SourceKind,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedMeta {
    pub schema_version: u32,
    pub generated_at: DateTime<Utc>,
    pub feed: String,
    #[serde(default)]
    pub sources: Vec<SourceRef>,
}

/// What is stored under a feed's key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedDocument {
    pub meta: FeedMeta,
    pub items: Vec<TimelineItem>,
}
