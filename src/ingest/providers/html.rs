// src/ingest/providers/html.rs
//! Candidates from plain HTML pages: embedded JSON-LD first, anchor scraping
//! as the fallback.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use url::Url;

use crate::error::ParseError;
use crate::ingest::normalize::{canonicalize_url, clean_text};
use crate::ingest::types::RawCandidate;

/// Anchor text shorter than this is treated as navigation chrome.
pub const MIN_ANCHOR_TEXT: usize = 24;
/// Most raw HTML taken on either side of an anchor.
const CONTEXT_WINDOW: usize = 600;
const MAX_ANCHORS: usize = 40;
const MAX_JSON_DEPTH: usize = 16;

static RE_LD_JSON: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?is)<script\b[^>]*type\s*=\s*["']?application/ld\+json["']?[^>]*>(.*?)</script\s*>"#,
    )
    .unwrap()
});
static RE_SCRIPT_STYLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<(script|style|noscript)\b[^>]*>.*?</(script|style|noscript)\s*>").unwrap()
});
static RE_ANCHOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<a\b[^>]*?\bhref\s*=\s*["']([^"'#][^"']*)["'][^>]*>(.*?)</a\s*>"#).unwrap()
});

/// Schema.org types that describe the site rather than content.
const SKIP_TYPES: [&str; 9] = [
    "Organization",
    "Corporation",
    "Person",
    "WebSite",
    "WebPage",
    "BreadcrumbList",
    "ImageObject",
    "SearchAction",
    "SiteNavigationElement",
];
/// Keys whose values are metadata about a node, never content nodes.
const SKIP_KEYS: [&str; 6] = ["publisher", "author", "image", "logo", "potentialAction", "breadcrumb"];

/// One result per content node found; a block that is not valid JSON yields
/// one `ParseError` and the other blocks are still walked.
pub fn extract_json_ld(html: &str) -> Vec<Result<RawCandidate, ParseError>> {
    let mut out = Vec::new();
    for cap in RE_LD_JSON.captures_iter(html) {
        let raw = cap[1].trim().trim_start_matches("<!--").trim_end_matches("-->");
        match serde_json::from_str::<Value>(raw) {
            Ok(v) => walk(&v, 0, &mut out),
            Err(e) => out.push(Err(ParseError::Json(e.to_string()))),
        }
    }
    out
}

fn walk(v: &Value, depth: usize, out: &mut Vec<Result<RawCandidate, ParseError>>) {
    if depth > MAX_JSON_DEPTH {
        return;
    }
    match v {
        Value::Array(items) => items.iter().for_each(|i| walk(i, depth + 1, out)),
        Value::Object(map) => {
            if !is_skipped_type(map) {
                if let Some(c) = json_ld_node(map) {
                    out.push(Ok(c));
                }
            }
            for (k, child) in map {
                if !SKIP_KEYS.contains(&k.as_str()) {
                    walk(child, depth + 1, out);
                }
            }
        }
        _ => {}
    }
}

fn is_skipped_type(map: &Map<String, Value>) -> bool {
    let is_skip = |t: &str| SKIP_TYPES.contains(&t);
    match map.get("@type") {
        Some(Value::String(t)) => is_skip(t),
        Some(Value::Array(ts)) => ts.iter().filter_map(Value::as_str).any(is_skip),
        _ => false,
    }
}

fn str_field(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| map.get(*k))
        .filter_map(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Object(o) => o.get("@id").and_then(Value::as_str).map(str::to_string),
            _ => None,
        })
        .find(|s| !s.trim().is_empty())
}

/// A node qualifies when it has a url and a title or description.
fn json_ld_node(map: &Map<String, Value>) -> Option<RawCandidate> {
    let url = str_field(map, &["url", "mainEntityOfPage"])?;
    let description = str_field(map, &["description", "abstract"]);
    let title = str_field(map, &["headline", "name", "title"]).or_else(|| description.clone())?;
    Some(RawCandidate {
        title: Some(title),
        url: Some(url),
        summary: description,
        date: str_field(map, &["datePublished", "dateCreated", "uploadDate", "dateModified"]),
        ..Default::default()
    })
}

/// Anchors whose stripped text is long enough to be a headline. Relative
/// links resolve against `base`; links back to the page itself are skipped.
///
/// A headline's context runs from the previous headline up to the end of
/// its own anchor, and its summary from the anchor to the next headline, each
/// capped at `CONTEXT_WINDOW` bytes.
pub fn extract_anchors(html: &str, base: &Url) -> Vec<RawCandidate> {
    let page = RE_SCRIPT_STYLE.replace_all(html, " ");
    let self_url = canonicalize_url(base.as_str(), None);

    let headlines: Vec<_> = RE_ANCHOR
        .captures_iter(&page)
        .filter_map(|cap| {
            let text = clean_text(&cap[2]);
            let whole = cap.get(0)?;
            (text.chars().count() >= MIN_ANCHOR_TEXT)
                .then(|| (whole.range(), clean_text(&cap[1]), text))
        })
        .collect();

    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::new();
    for (i, (range, href, text)) in headlines.iter().enumerate() {
        if out.len() >= MAX_ANCHORS {
            break;
        }
        let Some(url) = canonicalize_url(href, Some(base)) else {
            continue;
        };
        if Some(&url) == self_url.as_ref() || !seen.insert(url.clone()) {
            continue;
        }

        let prev_end = if i == 0 { 0 } else { headlines[i - 1].0.end };
        let next_start = headlines.get(i + 1).map_or(page.len(), |h| h.0.start);
        let start = floor_boundary(&page, prev_end.max(range.start.saturating_sub(CONTEXT_WINDOW)));
        let end = floor_boundary(&page, next_start.min(range.end + CONTEXT_WINDOW));

        out.push(RawCandidate {
            title: Some(text.clone()),
            url: Some(url),
            summary: Some(clean_text(&page[range.end..end])),
            context: Some(clean_text(&page[start..range.end])),
            ..Default::default()
        });
    }
    out
}

fn floor_boundary(s: &str, mut i: usize) -> usize {
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_ld_walks_graph_and_skips_site_nodes() {
        let html = r#"<html><head>
<script type="application/ld+json">
{"@context":"https://schema.org","@graph":[
  {"@type":"Organization","name":"Example Corp","url":"https://example.com"},
  {"@type":"NewsArticle","headline":"Model launch","url":"https://example.com/launch",
   "datePublished":"2025-04-01","publisher":{"@type":"Organization","name":"P","url":"https://p.example"}},
  {"@type":"ItemList","itemListElement":[
     {"@type":"ListItem","url":"https://example.com/list-1","description":"Only a description"}]}
]}
</script>
<script type="application/ld+json">{ not json </script>
</head></html>"#;
        let got = extract_json_ld(html);
        let ok: Vec<_> = got.iter().filter_map(|r| r.as_ref().ok()).collect();
        let errs = got.iter().filter(|r| r.is_err()).count();
        assert_eq!(errs, 1);
        assert_eq!(ok.len(), 2);
        assert_eq!(ok[0].title.as_deref(), Some("Model launch"));
        assert_eq!(ok[0].date.as_deref(), Some("2025-04-01"));
        assert_eq!(ok[1].title.as_deref(), Some("Only a description"));
        assert_eq!(ok[1].url.as_deref(), Some("https://example.com/list-1"));
    }

    #[test]
    fn json_ld_main_entity_object_counts_as_url() {
        let html = r#"<script type="application/ld+json">
{"@type":"BlogPosting","headline":"Post","mainEntityOfPage":{"@id":"https://example.com/post"}}
</script>"#;
        let got = extract_json_ld(html);
        assert_eq!(got.len(), 1);
        assert_eq!(
            got[0].as_ref().unwrap().url.as_deref(),
            Some("https://example.com/post")
        );
    }

    #[test]
    fn anchors_filter_chrome_and_keep_context() {
        let base = Url::parse("https://example.com/timeline").unwrap();
        let html = r##"<nav><a href="/">Home</a><a href="/about">About us</a></nav>
<script>var a = '<a href="/js">a link hidden inside a script block</a>';</script>
<div><p>March 3, 2025</p><a href="/posts/agents?utm_source=nav">Agents reach new reasoning milestone today</a>
<p>Researchers describe the evaluation.</p></div>
<a href="#top">Back to the top of this very long page</a>
<a href="/posts/agents">Agents reach new reasoning milestone today</a>
<a href="https://example.com/timeline">This link points at the page itself, skip</a>"##;
        let got = extract_anchors(html, &base);
        assert_eq!(got.len(), 1);
        let c = &got[0];
        assert_eq!(c.url.as_deref(), Some("https://example.com/posts/agents"));
        assert_eq!(c.title.as_deref(), Some("Agents reach new reasoning milestone today"));
        assert!(c.context.as_deref().unwrap().contains("March 3, 2025"));
    }

    #[test]
    fn timeline_anchors_take_the_nearest_preceding_date() {
        let base = Url::parse("https://example.com/timeline").unwrap();
        let html = r#"<h3>January 12, 2025</h3><a href="/a">First milestone on the public timeline</a>
<p>Details of the first.</p>
<h3>February 3, 2025</h3><a href="/b">Second milestone on the public timeline</a>
<a href="/c">Third milestone with no heading of its own</a>
<p>Mentioned later: March 9, 2025</p>"#;
        let got = extract_anchors(html, &base);
        let fallback = chrono::Utc::now();
        let dates: Vec<_> = got
            .iter()
            .map(|c| crate::ingest::normalize::resolve_date(c, fallback))
            .collect();

        assert_eq!(got.len(), 3);
        assert_eq!(dates[0].date_naive().to_string(), "2025-01-12");
        assert_eq!(dates[1].date_naive().to_string(), "2025-02-03");
        assert_eq!(dates[2], fallback);
        assert_eq!(got[0].summary.as_deref(), Some("Details of the first. February 3, 2025"));
        assert!(!got[1].context.as_deref().unwrap().contains("January"));
    }
}
