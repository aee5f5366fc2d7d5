// src/config/aggregator.rs
//! Aggregator configuration.
//!
//! Loaded once at startup and passed into pipeline constructors. Files never
//! carry secrets; those are merged from the environment by `apply_env`.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::ingest::normalize::{canonicalize_url, default_tag_rules, TagRule};
use crate::ingest::providers::x_api::{normalize_handle, DEFAULT_API_BASE};
use crate::ingest::types::{slugify, SourceDescriptor, SourceKind};

pub const ENV_CONFIG_PATH: &str = "AGGREGATOR_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/aggregator.toml";

const ENV_SYNC_TOKEN: &str = "SYNC_TOKEN";
const ENV_X_BEARER: &str = "X_BEARER_TOKEN";
const ENV_X_ENABLED: &str = "AGGREGATOR_X_ENABLED";
const ENV_DATA_DIR: &str = "AGGREGATOR_DATA_DIR";

const DEFAULT_USER_AGENT: &str = "timeline-aggregator/0.1 (+https://github.com/)";
/// Link carried by the placeholder item of an empty feed.
pub const DEFAULT_SEED_URL: &str = "https://github.com/AngelESuero/Portfolio-Website-";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    pub user_agent: String,
    /// Per-source budget, clamped to 1..=60.
    pub fetch_timeout_secs: u64,
    /// 0 disables the in-process scheduler.
    pub sync_interval_secs: u64,
    pub data_dir: PathBuf,
    #[serde(skip_serializing)]
    pub sync_token: Option<String>,
    #[serde(skip_serializing)]
    pub x_bearer_token: Option<String>,
    pub feeds: Vec<FeedConfig>,
    /// Feeds read on request and never stored, keyed by slug.
    pub live: Vec<LiveFeedConfig>,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            fetch_timeout_secs: 15,
            sync_interval_secs: 3600,
            data_dir: PathBuf::from("data"),
            sync_token: None,
            x_bearer_token: None,
            feeds: default_feeds(),
            live: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub name: String,
    /// Storage key of the item document; `<name>:items` when blank.
    pub key: String,
    pub enabled: bool,
    pub max_retained: usize,
    pub cache_max_age_secs: u64,
    pub title_max: usize,
    pub summary_max: usize,
    pub seed_url: String,
    pub tag_rules: Vec<TagRule>,
    /// Added when no tag rule matches an item.
    pub fallback_tags: Vec<String>,
    pub sources: Vec<SourceDescriptor>,
    pub x: Option<XSettings>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            key: String::new(),
            enabled: true,
            max_retained: 600,
            cache_max_age_secs: 300,
            title_max: 180,
            summary_max: 600,
            seed_url: DEFAULT_SEED_URL.to_string(),
            tag_rules: default_tag_rules(),
            fallback_tags: Vec::new(),
            sources: Vec::new(),
            x: None,
        }
    }
}

/// A platform profile whose feed is proxied as-is; `rss_url` is absent for
/// platforms without one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveFeedConfig {
    pub slug: String,
    pub rss_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct XSettings {
    pub handles: Vec<String>,
    pub max_results: u32,
    pub exclude_replies: bool,
    pub api_base: String,
}

impl Default for XSettings {
    fn default() -> Self {
        Self {
            handles: Vec::new(),
            max_results: 40,
            exclude_replies: false,
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }
}

impl AggregatorConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn sync_interval(&self) -> Option<Duration> {
        (self.sync_interval_secs > 0).then(|| Duration::from_secs(self.sync_interval_secs))
    }

    pub fn feed(&self, name: &str) -> Option<&FeedConfig> {
        self.feeds.iter().find(|f| f.name.eq_ignore_ascii_case(name))
    }

    pub fn live_feed(&self, slug: &str) -> Option<&LiveFeedConfig> {
        let slug = slug.trim();
        self.live.iter().find(|l| l.slug.eq_ignore_ascii_case(slug))
    }

    /// Clamp numeric settings into range, fill derived keys and drop feeds and
    /// sources that cannot work.
    pub fn sanitize(mut self) -> Self {
        if self.user_agent.trim().is_empty() {
            self.user_agent = DEFAULT_USER_AGENT.to_string();
        }
        self.fetch_timeout_secs = self.fetch_timeout_secs.clamp(1, 60);

        let mut names = HashSet::new();
        self.feeds.retain(|f| {
            let name = f.name.trim().to_ascii_lowercase();
            if name.is_empty() || !names.insert(name) {
                warn!(feed = %f.name, "skipping feed with blank or duplicate name");
                return false;
            }
            true
        });
        self.feeds = self.feeds.into_iter().map(FeedConfig::sanitize).collect();

        let mut slugs = HashSet::new();
        for l in self.live.iter_mut() {
            l.slug = l.slug.trim().to_ascii_lowercase();
            l.rss_url = l.rss_url.take().filter(|u| !u.trim().is_empty());
        }
        self.live.retain(|l| !l.slug.is_empty() && slugs.insert(l.slug.clone()));
        self
    }

    /// Merge secrets and toggles from the process environment.
    pub fn apply_env(self) -> Self {
        self.apply_env_from(|k| std::env::var(k).ok())
    }

    /// `apply_env` with an injectable lookup.
    pub fn apply_env_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_blank = |k: &str| lookup(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(t) = non_blank(ENV_SYNC_TOKEN) {
            self.sync_token = Some(t);
        }
        if let Some(t) = non_blank(ENV_X_BEARER) {
            self.x_bearer_token = Some(t);
        }
        if let Some(dir) = non_blank(ENV_DATA_DIR) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(flag) = non_blank(ENV_X_ENABLED) {
            let on = matches!(flag.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on");
            for f in self.feeds.iter_mut().filter(|f| f.x.is_some()) {
                f.enabled = on;
            }
        }
        self
    }
}

impl FeedConfig {
    fn sanitize(mut self) -> Self {
        self.name = self.name.trim().to_string();
        if self.key.trim().is_empty() {
            self.key = format!("{}:items", self.name.to_ascii_lowercase());
        }
        self.max_retained = self.max_retained.clamp(1, 5000);
        self.cache_max_age_secs = self.cache_max_age_secs.clamp(60, 900);
        self.title_max = self.title_max.max(8);
        self.summary_max = self.summary_max.max(8);
        self.seed_url = match canonicalize_url(&self.seed_url, None) {
            Some(u) => u,
            None => {
                warn!(
                    feed = %self.name,
                    seed_url = %self.seed_url,
                    "seed_url is not an absolute http(s) url, using default"
                );
                DEFAULT_SEED_URL.to_string()
            }
        };

        let feed = self.name.clone();
        self.sources.retain(|s| {
            let ok = !s.name.trim().is_empty() && !s.url.trim().is_empty();
            if !ok {
                warn!(%feed, source = %s.name, "skipping source without name or url");
            }
            ok
        });
        let mut ids = HashSet::new();
        self.sources.retain(|s| ids.insert(s.normalized_id()));

        if let Some(x) = self.x.as_mut() {
            x.max_results = x.max_results.clamp(5, 100);
            let mut seen = HashSet::new();
            x.handles = x
                .handles
                .iter()
                .map(|h| normalize_handle(h))
                .filter(|h| !h.is_empty() && seen.insert(h.to_ascii_lowercase()))
                .collect();
            if x.api_base.trim().is_empty() {
                x.api_base = DEFAULT_API_BASE.to_string();
            }
        }
        self
    }

    /// Configured sources plus one `x` source per social handle.
    pub fn source_descriptors(&self) -> Vec<SourceDescriptor> {
        let mut out = self.sources.clone();
        if let Some(x) = &self.x {
            for h in &x.handles {
                out.push(
                    SourceDescriptor::new(
                        &format!("x_{}", slugify(h)),
                        h,
                        SourceKind::X,
                        &format!("https://x.com/{h}"),
                    )
                    .with_tags(&["social"]),
                );
            }
        }
        out
    }
}

/// Load from an explicit path. `.json` files are read as JSON, anything else
/// as TOML.
pub fn load_config_from(path: &Path) -> Result<AggregatorConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading aggregator config from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let cfg: AggregatorConfig = if ext == "json" {
        serde_json::from_str(&content)
            .with_context(|| format!("parsing {} as json", path.display()))?
    } else {
        toml::from_str(&content).with_context(|| format!("parsing {} as toml", path.display()))?
    };
    Ok(cfg.sanitize())
}

/// Load config using env var + fallbacks:
/// 1) $AGGREGATOR_CONFIG_PATH
/// 2) config/aggregator.toml
/// 3) built-in defaults
pub fn load_config_default() -> Result<AggregatorConfig> {
    if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_config_from(&pb);
        } else {
            return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
        }
    }
    let toml_p = PathBuf::from(DEFAULT_CONFIG_PATH);
    if toml_p.exists() {
        return load_config_from(&toml_p);
    }
    Ok(AggregatorConfig::default().sanitize())
}

fn default_feeds() -> Vec<FeedConfig> {
    let web_sources = vec![
        SourceDescriptor::new(
            "ai_digest_timeline",
            "AI Digest Timeline",
            SourceKind::Web,
            "https://www.theidigest.org/timeline",
        )
        .with_rss("https://www.theidigest.org/feed")
        .with_tags(&["timeline", "curation"]),
        SourceDescriptor::new(
            "lifearchitect_agi",
            "LifeArchitect AGI",
            SourceKind::Web,
            "https://lifearchitect.ai/agi/",
        )
        .with_rss("https://lifearchitect.ai/feed/")
        .with_tags(&["analysis", "agi"]),
        SourceDescriptor::new(
            "goodheartlabs_agi",
            "GoodHeartLabs AGI",
            SourceKind::Web,
            "https://agi.goodheartlabs.com/",
        )
        .with_rss("https://agi.goodheartlabs.com/feed.xml")
        .with_tags(&["forecasting", "agi"]),
        SourceDescriptor::new(
            "openai_news",
            "OpenAI News",
            SourceKind::Rss,
            "https://openai.com/news/rss.xml",
        )
        .with_tags(&["primary", "release"]),
        SourceDescriptor::new(
            "deepmind_blog",
            "Google DeepMind Blog",
            SourceKind::Rss,
            "https://deepmind.google/blog/feed/basic",
        )
        .with_tags(&["primary", "research"]),
        SourceDescriptor::new(
            "msr_blog",
            "Microsoft Research Blog",
            SourceKind::Rss,
            "https://www.microsoft.com/en-us/research/blog/feed/",
        )
        .with_tags(&["research"]),
        SourceDescriptor::new(
            "hf_blog",
            "Hugging Face Blog",
            SourceKind::Rss,
            "https://huggingface.co/blog/feed.xml",
        )
        .with_tags(&["open-source"]),
        SourceDescriptor::new(
            "nvidia_dev_blog",
            "NVIDIA Developer Blog",
            SourceKind::Rss,
            "https://developer.nvidia.com/blog/feed/",
        )
        .with_tags(&["compute"]),
        SourceDescriptor::new(
            "arxiv_cs_ai",
            "arXiv cs.AI",
            SourceKind::Rss,
            "https://rss.arxiv.org/rss/cs.AI",
        )
        .with_tags(&["papers"]),
        SourceDescriptor::new(
            "arxiv_cs_cl",
            "arXiv cs.CL",
            SourceKind::Rss,
            "https://rss.arxiv.org/rss/cs.CL",
        )
        .with_tags(&["papers", "language"]),
    ];

    vec![
        FeedConfig {
            name: "web".to_string(),
            sources: web_sources,
            ..FeedConfig::default()
        },
        FeedConfig {
            name: "social".to_string(),
            enabled: false,
            max_retained: 1000,
            cache_max_age_secs: 120,
            x: Some(XSettings {
                handles: vec![
                    "OpenAI".to_string(),
                    "GoogleDeepMind".to_string(),
                    "AnthropicAI".to_string(),
                ],
                ..XSettings::default()
            }),
            ..FeedConfig::default()
        },
    ]
}
