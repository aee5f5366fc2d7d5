// src/ingest/live.rs
//! Pass-through reads of one platform feed. Nothing is stored; every request
//! fetches the feed again.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use url::Url;

use crate::error::FetchError;
use crate::ingest::http::HttpFetcher;
use crate::ingest::normalize::{canonicalize_url, clean_text, parse_structured_date};
use crate::ingest::providers::rss::parse_feed;
use crate::ingest::types::RawCandidate;

/// Items returned per live read.
pub const LIVE_ITEMS_MAX: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LiveItem {
    pub title: String,
    pub url: String,
    pub date: Option<DateTime<Utc>>,
}

/// First occurrence of each canonical url, newest first, undated last.
pub fn newest_unique(candidates: Vec<RawCandidate>, base: Option<&Url>, limit: usize) -> Vec<LiveItem> {
    let mut seen = HashSet::new();
    let mut items: Vec<LiveItem> = candidates
        .into_iter()
        .filter_map(|c| {
            let title = clean_text(c.title.as_deref()?);
            let url = canonicalize_url(c.url.as_deref()?, base)?;
            if title.is_empty() || !seen.insert(url.clone()) {
                return None;
            }
            Some(LiveItem {
                title,
                url,
                date: c.date.as_deref().and_then(parse_structured_date),
            })
        })
        .collect();
    items.sort_by(|a, b| b.date.cmp(&a.date));
    items.truncate(limit);
    items
}

pub async fn fetch_live(http: &HttpFetcher, rss_url: &str) -> Result<Vec<LiveItem>, FetchError> {
    let body = http.get_text(rss_url).await?;
    let batch = parse_feed(&body)?;
    let base = Url::parse(rss_url).ok();
    Ok(newest_unique(batch.candidates, base.as_ref(), LIVE_ITEMS_MAX))
}
