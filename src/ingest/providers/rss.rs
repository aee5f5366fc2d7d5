// src/ingest/providers/rss.rs
//! RSS 2.0 / Atom parsing.
//!
//! Well-formed feeds go through `quick_xml` serde structs. Feeds that fail
//! strict parsing (unescaped HTML, stray entities, RDF layouts) fall back to
//! tag-scoped extraction of each `<item>`/`<entry>` block, so one broken block
//! only costs that block.

use std::collections::HashMap;

use metrics::{counter, histogram};
use once_cell::sync::Lazy;
use quick_xml::de::from_str;
use regex::Regex;
use serde::Deserialize;

use crate::error::ParseError;
use crate::ingest::normalize::clean_text;
use crate::ingest::types::{RawCandidate, SourceBatch};

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    guid: Option<Text>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    #[serde(rename = "dc:date", alias = "date")]
    dc_date: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomFeed {
    #[serde(rename = "entry", default)]
    entry: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    title: Option<Text>,
    #[serde(rename = "link", default)]
    link: Vec<AtomLink>,
    published: Option<String>,
    updated: Option<String>,
    summary: Option<Text>,
    content: Option<Text>,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: Option<String>,
    #[serde(rename = "@rel")]
    rel: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Text {
    #[serde(rename = "$text", default)]
    value: String,
}

/// Parse a feed document into per-block candidates.
///
/// Errors only when the body is not recognisably a feed at all.
pub fn parse_feed(body: &str) -> Result<SourceBatch, ParseError> {
    let t0 = std::time::Instant::now();
    let xml = scrub_html_entities_for_xml(body);

    let results = match strict_parse(&xml) {
        Some(r) => r,
        None => {
            let r = parse_blocks(&xml);
            if r.is_empty() && !looks_like_feed(&xml) {
                return Err(ParseError::Xml("no <item> or <entry> blocks found".into()));
            }
            r
        }
    };

    let batch = SourceBatch::from_results(results);
    histogram!("aggregator_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
    counter!("aggregator_parse_errors_total").increment(batch.parse_errors.len() as u64);
    Ok(batch)
}

/// `None` if neither strict layout produced anything.
fn strict_parse(xml: &str) -> Option<Vec<Result<RawCandidate, ParseError>>> {
    if let Ok(rss) = from_str::<Rss>(xml) {
        if !rss.channel.item.is_empty() {
            return Some(rss.channel.item.into_iter().map(rss_item).collect());
        }
    }
    if let Ok(atom) = from_str::<AtomFeed>(xml) {
        if !atom.entry.is_empty() {
            return Some(atom.entry.into_iter().map(atom_entry).collect());
        }
    }
    None
}

fn rss_item(it: Item) -> Result<RawCandidate, ParseError> {
    let url = non_empty(it.link).or_else(|| it.guid.and_then(|g| non_empty(Some(g.value))));
    candidate(
        it.title,
        url,
        it.description,
        non_empty(it.pub_date).or(non_empty(it.dc_date)),
    )
}

fn atom_entry(e: Entry) -> Result<RawCandidate, ParseError> {
    let url = e
        .link
        .iter()
        .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
        .or_else(|| e.link.first())
        .and_then(|l| l.href.clone());
    let summary = e.summary.or(e.content).map(|t| t.value);
    candidate(
        e.title.map(|t| t.value),
        url,
        summary,
        non_empty(e.published).or(non_empty(e.updated)),
    )
}

fn candidate(
    title: Option<String>,
    url: Option<String>,
    summary: Option<String>,
    date: Option<String>,
) -> Result<RawCandidate, ParseError> {
    let title = non_empty(title).ok_or(ParseError::Missing("title"))?;
    let url = non_empty(url.map(|u| clean_text(&u))).ok_or(ParseError::Missing("link"))?;
    Ok(RawCandidate {
        title: Some(title),
        url: Some(url),
        summary,
        date,
        ..Default::default()
    })
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|v| !v.trim().is_empty())
}

static RE_ITEM: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<item\b[^>]*>(.*?)</item\s*>").unwrap());
static RE_ENTRY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<entry\b[^>]*>(.*?)</entry\s*>").unwrap());
static RE_ATOM_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<link\b[^>]*?href\s*=\s*["']([^"']+)["'][^>]*>"#).unwrap()
});

const BLOCK_TAGS: [&str; 12] = [
    "title",
    "link",
    "guid",
    "pubDate",
    "dc:date",
    "published",
    "updated",
    "description",
    "summary",
    "content",
    "content:encoded",
    "media:description",
];

static RE_TAG: Lazy<HashMap<&'static str, Regex>> = Lazy::new(|| {
    BLOCK_TAGS
        .iter()
        .map(|t| {
            let pat = format!(r"(?is)<{0}\b[^>]*>(.*?)</{0}\s*>", regex::escape(t));
            (*t, Regex::new(&pat).unwrap())
        })
        .collect()
});

/// First non-empty inner text among `tags`, raw (markup kept).
fn pick_tag(block: &str, tags: &[&str]) -> Option<String> {
    tags.iter()
        .filter_map(|t| RE_TAG.get(t))
        .filter_map(|re| re.captures(block))
        .map(|c| c[1].trim().to_string())
        .find(|v| !clean_text(v).is_empty())
}

/// Tag-scoped extraction over raw `<item>`/`<entry>` blocks.
fn parse_blocks(xml: &str) -> Vec<Result<RawCandidate, ParseError>> {
    let mut out = Vec::new();
    for c in RE_ITEM.captures_iter(xml) {
        let block = &c[1];
        out.push(candidate(
            pick_tag(block, &["title"]),
            pick_tag(block, &["link", "guid"]),
            pick_tag(block, &["description", "content:encoded", "summary"]),
            pick_tag(block, &["pubDate", "dc:date", "published", "updated"]).map(|d| clean_text(&d)),
        ));
    }
    for c in RE_ENTRY.captures_iter(xml) {
        let block = &c[1];
        let link = RE_ATOM_LINK
            .captures(block)
            .map(|m| m[1].to_string())
            .or_else(|| pick_tag(block, &["link"]));
        out.push(candidate(
            pick_tag(block, &["title"]),
            link,
            pick_tag(block, &["summary", "content", "media:description"]),
            pick_tag(block, &["published", "updated", "pubDate"]).map(|d| clean_text(&d)),
        ));
    }
    out
}

fn looks_like_feed(xml: &str) -> bool {
    let head: String = xml.chars().take(2048).collect::<String>().to_ascii_lowercase();
    ["<rss", "<feed", "<rdf:rdf", "<channel"]
        .iter()
        .any(|m| head.contains(m))
}

/// HTML entities that are not defined in XML and would break strict parsing.
fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", "&#160;")
        .replace("&ndash;", "&#8211;")
        .replace("&mdash;", "&#8212;")
        .replace("&hellip;", "&#8230;")
        .replace("&ldquo;", "&#8220;")
        .replace("&rdquo;", "&#8221;")
        .replace("&lsquo;", "&#8216;")
        .replace("&rsquo;", "&#8217;")
}
