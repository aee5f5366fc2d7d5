// src/ingest/providers/x_api.rs
//! Social timeline adapter over the X API v2.
//!
//! One adapter per handle. The handle resolves to a user id once and the
//! `{id, name}` pair is cached in the KV store; timelines are then requested
//! with `since_id` set to the stored cursor so each run only sees new posts.

use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::error::{ConfigError, FetchError, ParseError};
use crate::ingest::http::HttpFetcher;
use crate::ingest::types::{RawCandidate, SourceAdapter, SourceBatch, SourceDescriptor};
use crate::model::SourceCursor;
use crate::store::KvStore;

pub const DEFAULT_API_BASE: &str = "https://api.x.com/2";
const MAX_HASHTAGS: usize = 8;
const TITLE_LINE_MAX: usize = 160;

static RE_STATUS_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^/[A-Za-z0-9_]+/status/[0-9]+/?$").unwrap());

/// `https://x.com/<user>/status/<digits>`, `www.` tolerated.
pub fn is_valid_status_url(value: &str) -> bool {
    let Ok(u) = Url::parse(value) else {
        return false;
    };
    let host = u.host_str().unwrap_or_default().to_ascii_lowercase();
    host.trim_start_matches("www.") == "x.com" && RE_STATUS_PATH.is_match(u.path())
}

pub fn normalize_handle(handle: &str) -> String {
    handle.trim().trim_start_matches('@').trim().to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedUser {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    data: Option<UserData>,
}

#[derive(Debug, Deserialize)]
struct UserData {
    id: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct TweetsResponse {
    #[serde(default)]
    data: Vec<Tweet>,
}

#[derive(Debug, Deserialize)]
struct Tweet {
    id: String,
    #[serde(default)]
    text: String,
    created_at: Option<String>,
    #[serde(default)]
    entities: Option<Entities>,
}

#[derive(Debug, Default, Deserialize)]
struct Entities {
    #[serde(default)]
    hashtags: Vec<Hashtag>,
    #[serde(default)]
    urls: Vec<EntityUrl>,
}

#[derive(Debug, Deserialize)]
struct Hashtag {
    tag: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EntityUrl {
    expanded_url: Option<String>,
}

pub struct XTimelineAdapter {
    descriptor: SourceDescriptor,
    handle: String,
    http: HttpFetcher,
    api_base: String,
    bearer: Option<String>,
    store: Arc<dyn KvStore>,
    namespace: String,
    max_results: u32,
    exclude_replies: bool,
}

impl XTimelineAdapter {
    pub fn new(
        descriptor: SourceDescriptor,
        http: HttpFetcher,
        bearer: Option<String>,
        store: Arc<dyn KvStore>,
        namespace: &str,
    ) -> Self {
        let handle = normalize_handle(&descriptor.name);
        Self {
            descriptor,
            handle,
            http,
            api_base: DEFAULT_API_BASE.to_string(),
            bearer: bearer.filter(|t| !t.trim().is_empty()),
            store,
            namespace: namespace.to_string(),
            max_results: 40,
            exclude_replies: false,
        }
    }

    pub fn with_api_base(mut self, base: &str) -> Self {
        self.api_base = base.trim_end_matches('/').to_string();
        self
    }

    pub fn with_limits(mut self, max_results: u32, exclude_replies: bool) -> Self {
        self.max_results = max_results.clamp(5, 100);
        self.exclude_replies = exclude_replies;
        self
    }

    pub fn user_cache_key(&self) -> String {
        format!("{}:user:{}", self.namespace, self.handle.to_lowercase())
    }

    fn token(&self) -> Result<&str, ConfigError> {
        self.bearer
            .as_deref()
            .ok_or(ConfigError::MissingSecret("X_BEARER_TOKEN"))
    }

    async fn resolve_user(&self, token: &str) -> Result<CachedUser, FetchError> {
        let key = self.user_cache_key();
        match self.store.get(&key).await {
            Ok(Some(raw)) => {
                if let Ok(u) = serde_json::from_str::<CachedUser>(&raw) {
                    if !u.id.is_empty() {
                        return Ok(u);
                    }
                }
            }
            Ok(None) => {}
            Err(e) => warn!(target: "ingest", %key, error = %e, "user cache read failed"),
        }

        let url = format!("{}/users/by/username/{}", self.api_base, self.handle);
        let resp: UserResponse = self
            .http
            .get_json(&url, Some(token), &[("user.fields", "id,name,username".to_string())])
            .await?;
        let data = resp.data.ok_or(ParseError::Missing("user id"))?;
        let user = CachedUser {
            name: if data.name.trim().is_empty() {
                self.handle.clone()
            } else {
                data.name
            },
            id: data.id,
        };

        // a failed cache write only costs a lookup next run
        match serde_json::to_string(&user) {
            Ok(body) => {
                if let Err(e) = self.store.put(&key, body).await {
                    warn!(target: "ingest", %key, error = %e, "user cache write failed");
                }
            }
            Err(e) => warn!(target: "ingest", %key, error = %e, "user cache encode failed"),
        }
        Ok(user)
    }

    fn to_candidate(&self, user: &CachedUser, t: Tweet) -> Result<RawCandidate, ParseError> {
        let url = format!("https://x.com/{}/status/{}", self.handle, t.id);
        if !is_valid_status_url(&url) {
            return Err(ParseError::Json(format!("invalid status url {url}")));
        }
        let title: String = t
            .text
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .ok_or(ParseError::Missing("text"))?
            .chars()
            .take(TITLE_LINE_MAX)
            .collect();
        let entities = t.entities.unwrap_or_default();
        let tags = entities
            .hashtags
            .into_iter()
            .filter_map(|h| h.tag)
            .filter(|t| !t.is_empty())
            .take(MAX_HASHTAGS)
            .collect();
        let alt_url = entities
            .urls
            .into_iter()
            .filter_map(|u| u.expanded_url)
            .find(|u| is_valid_status_url(u) && *u != url);

        Ok(RawCandidate {
            title: Some(title),
            url: Some(url),
            summary: Some(t.text),
            date: t.created_at,
            tags,
            author_handle: Some(self.handle.clone()),
            author_name: Some(user.name.clone()),
            alt_url,
            ..Default::default()
        })
    }
}

#[async_trait]
impl SourceAdapter for XTimelineAdapter {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    async fn fetch(&self, cursor: Option<&SourceCursor>) -> Result<SourceBatch, FetchError> {
        let token = self.token()?;
        let user = self.resolve_user(token).await?;

        let mut query = vec![
            ("max_results", self.max_results.to_string()),
            ("tweet.fields", "created_at,public_metrics,entities".to_string()),
        ];
        if self.exclude_replies {
            query.push(("exclude", "replies,retweets".to_string()));
        }
        if let Some(c) = cursor {
            query.push(("since_id", c.as_str().to_string()));
        }

        let url = format!("{}/users/{}/tweets", self.api_base, user.id);
        let resp: TweetsResponse = self.http.get_json(&url, Some(token), &query).await?;

        let mut next = cursor.cloned();
        let mut results = Vec::with_capacity(resp.data.len());
        for t in resp.data {
            next = SourceCursor::advance(next, &t.id);
            results.push(self.to_candidate(&user, t));
        }
        debug!(target: "ingest", handle = %self.handle, posts = results.len(), "timeline fetched");

        let mut batch = SourceBatch::from_results(results);
        batch.cursor = next;
        Ok(batch)
    }
}
