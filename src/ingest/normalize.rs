// src/ingest/normalize.rs
//! Candidate → `TimelineItem`: text cleaning, URL canonicalization, id
//! derivation, tag inference and date resolution.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::{format_description::well_known::Rfc2822, OffsetDateTime};
use url::Url;

use crate::ingest::types::{RawCandidate, SourceDescriptor};
use crate::model::TimelineItem;

pub const DEFAULT_TITLE_MAX: usize = 180;
pub const DEFAULT_SUMMARY_MAX: usize = 600;
const ELLIPSIS: char = '…';

static RE_SCRIPT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<(script|style)\b[^>]*>.*?</(script|style)\s*>").unwrap());
static RE_TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());
static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Strip markup, decode entities, collapse whitespace.
pub fn clean_text(s: &str) -> String {
    let out = s.replace("<![CDATA[", "").replace("]]>", "");
    let out = RE_SCRIPT.replace_all(&out, " ");
    let out = RE_TAGS.replace_all(&out, " ");
    let out = html_escape::decode_html_entities(&out).replace('\u{00A0}', " ");
    RE_WS.replace_all(&out, " ").trim().to_string()
}

/// Cut to at most `max` chars; a cut string ends with a single `…`.
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    if max == 0 {
        return String::new();
    }
    let mut out: String = s.chars().take(max - 1).collect();
    let trimmed = out.trim_end().len();
    out.truncate(trimmed);
    out.push(ELLIPSIS);
    out
}

/// Absolute http(s) URL without fragment and without `utm_*` parameters.
/// Relative links resolve against `base`.
pub fn canonicalize_url(raw: &str, base: Option<&Url>) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let mut url = match Url::parse(raw) {
        Ok(u) => u,
        Err(url::ParseError::RelativeUrlWithoutBase) => base?.join(raw).ok()?,
        Err(_) => return None,
    };
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return None;
    }
    url.set_fragment(None);

    if url.query().is_some() {
        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| !k.to_ascii_lowercase().starts_with("utm_"))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        if kept.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(kept);
        }
    }
    Some(url.to_string())
}

/// Deterministic id: hex sha256 of `source_id|canonical_url`.
pub fn item_id(source_id: &str, canonical_url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_id.as_bytes());
    hasher.update(b"|");
    hasher.update(canonical_url.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Case-insensitive substring rule: `keyword` present → add `tags`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagRule {
    pub keyword: String,
    pub tags: Vec<String>,
}

impl TagRule {
    pub fn new(keyword: &str, tags: &[&str]) -> Self {
        Self {
            keyword: keyword.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }
}

pub fn default_tag_rules() -> Vec<TagRule> {
    [
        ("agents", "agents"),
        ("agent", "agents"),
        ("reasoning", "reasoning"),
        ("benchmark", "eval"),
        ("evaluation", "eval"),
        ("safety", "safety"),
        ("alignment", "safety"),
        ("policy", "policy"),
        ("regulation", "policy"),
        ("governance", "policy"),
        ("compute", "compute"),
        ("gpu", "compute"),
        ("inference", "inference"),
        ("training", "training"),
        ("model", "model"),
        ("release", "release"),
        ("launch", "release"),
        ("paper", "papers"),
        ("arxiv", "papers"),
        ("dataset", "data"),
    ]
    .into_iter()
    .map(|(k, t)| TagRule::new(k, &[t]))
    .collect()
}

/// Defaults first, then source-provided tags, then rule hits, or
/// `fallback_tags` when no rule hits; duplicates (case-insensitive) dropped,
/// first spelling wins.
pub fn infer_tags(
    text: &str,
    default_tags: &[String],
    source_tags: &[String],
    rules: &[TagRule],
    fallback_tags: &[String],
) -> Vec<String> {
    let haystack = text.to_lowercase();
    let mut out: Vec<String> = Vec::new();
    let mut push = |tag: &str| {
        let t = tag.trim();
        if !t.is_empty() && !out.iter().any(|x| x.eq_ignore_ascii_case(t)) {
            out.push(t.to_string());
        }
    };
    default_tags.iter().for_each(|t| push(t.as_str()));
    source_tags.iter().for_each(|t| push(t.as_str()));
    let mut hit = false;
    for rule in rules {
        let needle = rule.keyword.trim().to_lowercase();
        if !needle.is_empty() && haystack.contains(&needle) {
            hit = true;
            rule.tags.iter().for_each(|t| push(t.as_str()));
        }
    }
    if !hit {
        fallback_tags.iter().for_each(|t| push(t.as_str()));
    }
    out
}

/// RFC 3339, RFC 2822, naive ISO datetime or bare ISO date.
pub fn parse_structured_date(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = OffsetDateTime::parse(s, &Rfc2822) {
        return Utc.timestamp_opt(dt.unix_timestamp(), 0).single();
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(n) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&n));
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok().and_then(midnight_utc)
}

static RE_ISO_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})\b").unwrap());
static RE_LONG_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(January|February|March|April|May|June|July|August|September|October|November|December)\s+(\d{1,2})(?:st|nd|rd|th)?,?\s+(\d{4})\b",
    )
    .unwrap()
});
static RE_SLASH_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{1,2})/(\d{1,2})/(\d{4})\b").unwrap());

/// Recover a calendar date from free text: ISO, long month name, then US
/// month/day/year.
pub fn date_from_text(text: &str) -> Option<DateTime<Utc>> {
    if let Some(c) = RE_ISO_DATE.captures(text) {
        let d = ymd(&c[1], &c[2], &c[3]);
        if d.is_some() {
            return d;
        }
    }
    if let Some(c) = RE_LONG_DATE.captures(text) {
        let month = month_number(&c[1])?;
        let d = ymd(&c[3], &month.to_string(), &c[2]);
        if d.is_some() {
            return d;
        }
    }
    RE_SLASH_DATE
        .captures(text)
        .and_then(|c| ymd(&c[3], &c[1], &c[2]))
}

fn ymd(y: &str, m: &str, d: &str) -> Option<DateTime<Utc>> {
    let date = NaiveDate::from_ymd_opt(y.parse().ok()?, m.parse().ok()?, d.parse().ok()?)?;
    midnight_utc(date)
}

fn midnight_utc(d: NaiveDate) -> Option<DateTime<Utc>> {
    d.and_hms_opt(0, 0, 0).map(|n| Utc.from_utc_datetime(&n))
}

fn month_number(name: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = [
        "january", "february", "march", "april", "may", "june", "july", "august", "september",
        "october", "november", "december",
    ];
    let lower = name.to_ascii_lowercase();
    MONTHS
        .iter()
        .position(|m| *m == lower)
        .map(|i| i as u32 + 1)
}

/// The date mentioned last in `text`, across all recognised formats.
pub fn last_date_in_text(text: &str) -> Option<DateTime<Utc>> {
    let iso = RE_ISO_DATE
        .captures_iter(text)
        .filter_map(|c| Some((c.get(0)?.start(), ymd(&c[1], &c[2], &c[3])?)));
    let long = RE_LONG_DATE.captures_iter(text).filter_map(|c| {
        let month = month_number(&c[1])?;
        Some((c.get(0)?.start(), ymd(&c[3], &month.to_string(), &c[2])?))
    });
    let slash = RE_SLASH_DATE
        .captures_iter(text)
        .filter_map(|c| Some((c.get(0)?.start(), ymd(&c[3], &c[1], &c[2])?)));
    iso.chain(long)
        .chain(slash)
        .max_by_key(|(pos, _)| *pos)
        .map(|(_, d)| d)
}

/// Structured date, then the date nearest the link in its context, then a
/// date in the summary, then `fallback`. Candidates that carry a context
/// never read dates from their summary.
pub fn resolve_date(candidate: &RawCandidate, fallback: DateTime<Utc>) -> DateTime<Utc> {
    if let Some(d) = candidate.date.as_deref().and_then(parse_structured_date) {
        return d;
    }
    let from_text = match candidate.context.as_deref() {
        Some(context) => last_date_in_text(context),
        None => candidate.summary.as_deref().and_then(date_from_text),
    };
    from_text.unwrap_or(fallback)
}

/// Per-feed normalization settings.
#[derive(Debug, Clone)]
pub struct Normalizer {
    pub title_max: usize,
    pub summary_max: usize,
    pub tag_rules: Vec<TagRule>,
    pub fallback_tags: Vec<String>,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self {
            title_max: DEFAULT_TITLE_MAX,
            summary_max: DEFAULT_SUMMARY_MAX,
            tag_rules: default_tag_rules(),
            fallback_tags: Vec::new(),
        }
    }
}

impl Normalizer {
    /// `None` when the candidate has no usable url or title; callers drop it.
    pub fn normalize(
        &self,
        source: &SourceDescriptor,
        candidate: RawCandidate,
        fallback: DateTime<Utc>,
    ) -> Option<TimelineItem> {
        let base = Url::parse(&source.url).ok();
        let url = canonicalize_url(candidate.url.as_deref()?, base.as_ref())?;

        let full_title = clean_text(candidate.title.as_deref().unwrap_or_default());
        if full_title.is_empty() {
            return None;
        }
        let full_summary = clean_text(candidate.summary.as_deref().unwrap_or_default());

        let source_id = source.normalized_id();
        let date = resolve_date(&candidate, fallback);
        // rules see the untruncated text
        let tags = infer_tags(
            &format!("{full_title} {full_summary} {url}"),
            &source.default_tags,
            &candidate.tags,
            &self.tag_rules,
            &self.fallback_tags,
        );
        let title = truncate_chars(&full_title, self.title_max);
        let summary = truncate_chars(&full_summary, self.summary_max);
        let alt_url = candidate
            .alt_url
            .as_deref()
            .and_then(|u| canonicalize_url(u, None));

        Some(TimelineItem {
            id: item_id(&source_id, &url),
            source_id,
            source_name: source.name.clone(),
            title,
            summary,
            url,
            date,
            tags,
            author_handle: candidate.author_handle,
            author_name: candidate.author_name,
            alt_url,
        })
    }
}
