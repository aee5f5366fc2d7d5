// src/ingest/mod.rs
pub mod http;
pub mod live;
pub mod merge;
pub mod normalize;
pub mod providers;
pub mod scheduler;
pub mod types;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use once_cell::sync::OnceCell;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::{AggregatorConfig, FeedConfig};
use crate::error::{ConfigError, FetchError};
use crate::ingest::http::HttpFetcher;
use crate::ingest::merge::{count_new, drop_seeds_if_real, merge};
use crate::ingest::normalize::Normalizer;
use crate::ingest::providers::{WebSourceAdapter, XTimelineAdapter};
use crate::ingest::types::{SourceAdapter, SourceBatch, SourceKind};
use crate::model::{seed_item, FeedDocument, FeedMeta, SourceCursor, SourceRef, TimelineItem, SCHEMA_VERSION};
use crate::store::{KvStore, PersistenceGateway};

/// Default page size of the read endpoint.
pub const DEFAULT_READ_LIMIT: usize = 200;

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("aggregator_runs_total", "Pipeline runs started.");
        describe_counter!(
            "aggregator_candidates_total",
            "Raw candidates returned by source adapters."
        );
        describe_counter!(
            "aggregator_items_new_total",
            "Items not previously stored, per run."
        );
        describe_counter!(
            "aggregator_source_errors_total",
            "Source fetch, timeout and config failures."
        );
        describe_counter!(
            "aggregator_parse_errors_total",
            "Feed/page blocks skipped as unparseable."
        );
        describe_histogram!("aggregator_fetch_ms", "Per-source fetch time in milliseconds.");
        describe_histogram!("aggregator_parse_ms", "Feed parse time in milliseconds.");
        describe_gauge!("aggregator_stored_items", "Items persisted after the last run.");
        describe_gauge!(
            "aggregator_last_run_ts",
            "Unix ts when a pipeline last finished."
        );
    });
}

/// Result of one pipeline run, returned verbatim by `/sync`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub ok: bool,
    pub total_items: usize,
    pub fetched_new: usize,
    pub errors: Vec<String>,
}

impl RunSummary {
    fn failed(errors: Vec<String>) -> Self {
        Self {
            ok: false,
            total_items: 0,
            fetched_new: 0,
            errors,
        }
    }
}

/// One feed: its sources, normalizer and storage.
///
/// Runs are serialised per pipeline, so a scheduled run and a manual `/sync`
/// never interleave their read-modify-write of the stored document.
pub struct FeedPipeline {
    feed: FeedConfig,
    adapters: Vec<Box<dyn SourceAdapter>>,
    normalizer: Normalizer,
    gateway: PersistenceGateway,
    fetch_timeout: Duration,
    config_errors: Vec<String>,
    run_lock: Mutex<()>,
}

impl FeedPipeline {
    pub fn new(
        feed: FeedConfig,
        adapters: Vec<Box<dyn SourceAdapter>>,
        store: Arc<dyn KvStore>,
        fetch_timeout: Duration,
    ) -> Self {
        let normalizer = Normalizer {
            title_max: feed.title_max,
            summary_max: feed.summary_max,
            tag_rules: feed.tag_rules.clone(),
            fallback_tags: feed.fallback_tags.clone(),
        };
        let gateway = PersistenceGateway::new(store, &feed.name.to_ascii_lowercase(), &feed.key);
        Self {
            feed,
            adapters,
            normalizer,
            gateway,
            fetch_timeout,
            config_errors: Vec::new(),
            run_lock: Mutex::new(()),
        }
    }

    /// Build adapters for every source of `feed`. A social feed without a
    /// bearer token gets no social adapters and reports one config error per
    /// run instead.
    pub fn from_config(cfg: &AggregatorConfig, feed: &FeedConfig, store: Arc<dyn KvStore>) -> Self {
        let http = HttpFetcher::new(&cfg.user_agent, cfg.fetch_timeout());
        let namespace = feed.name.to_ascii_lowercase();
        let mut adapters: Vec<Box<dyn SourceAdapter>> = Vec::new();
        let mut config_errors = Vec::new();

        for d in feed.source_descriptors() {
            match d.kind {
                SourceKind::X => {
                    let Some(token) = cfg.x_bearer_token.clone() else {
                        continue;
                    };
                    let x = feed.x.clone().unwrap_or_default();
                    adapters.push(Box::new(
                        XTimelineAdapter::new(d, http.clone(), Some(token), store.clone(), &namespace)
                            .with_api_base(&x.api_base)
                            .with_limits(x.max_results, x.exclude_replies),
                    ));
                }
                _ => adapters.push(Box::new(WebSourceAdapter::new(d, http.clone()))),
            }
        }

        let wants_x = feed.x.as_ref().is_some_and(|x| !x.handles.is_empty());
        if wants_x && cfg.x_bearer_token.is_none() {
            config_errors.push(format!(
                "{}: {}",
                feed.name,
                ConfigError::MissingSecret("X_BEARER_TOKEN")
            ));
        }

        let mut p = Self::new(feed.clone(), adapters, store, cfg.fetch_timeout());
        p.config_errors = config_errors;
        p
    }

    pub fn name(&self) -> &str {
        &self.feed.name
    }

    pub fn feed(&self) -> &FeedConfig {
        &self.feed
    }

    pub async fn run(&self) -> RunSummary {
        self.run_at(Utc::now()).await
    }

    /// One full run: fetch every source concurrently, normalize, merge with
    /// what is stored, persist. `now` is the fallback date for undated items.
    pub async fn run_at(&self, now: DateTime<Utc>) -> RunSummary {
        let _guard = self.run_lock.lock().await;
        ensure_metrics_described();
        let feed = self.feed.name.clone();
        counter!("aggregator_runs_total", "feed" => feed.clone()).increment(1);

        if !self.feed.enabled {
            return RunSummary::failed(vec![format!("feed {feed} is disabled")]);
        }

        let existing = match self.gateway.read_items().await {
            Ok(v) => v,
            Err(e) => {
                // not knowing what is stored means a write could wipe it
                warn!(target: "ingest", %feed, error = %e, "store read failed, skipping run");
                return RunSummary::failed(vec![format!("store: {e}")]);
            }
        };

        let mut errors = self.config_errors.clone();
        let mut incoming: Vec<TimelineItem> = Vec::new();
        let mut cursors: Vec<(String, SourceCursor)> = Vec::new();

        for (adapter, res) in self.fetch_all().await {
            let source = adapter.descriptor();
            match res {
                Ok(batch) => {
                    counter!("aggregator_candidates_total", "feed" => feed.clone())
                        .increment(batch.candidates.len() as u64);
                    if !batch.parse_errors.is_empty() {
                        warn!(
                            target: "ingest",
                            source = %source.name,
                            skipped = batch.parse_errors.len(),
                            "unparseable blocks skipped"
                        );
                    }
                    if let Some(c) = batch.cursor {
                        cursors.push((source.normalized_id(), c));
                    }
                    incoming.extend(
                        batch
                            .candidates
                            .into_iter()
                            .filter_map(|c| self.normalizer.normalize(source, c, now)),
                    );
                }
                Err(e) => {
                    warn!(target: "ingest", source = %source.name, error = %e, "source failed");
                    counter!("aggregator_source_errors_total", "feed" => feed.clone()).increment(1);
                    errors.push(format!("{}: {e}", source.name));
                }
            }
        }

        // undated items keep the date they were first stored with
        let known: HashMap<&str, DateTime<Utc>> =
            existing.iter().map(|i| (i.id.as_str(), i.date)).collect();
        for item in incoming.iter_mut().filter(|i| i.date == now) {
            if let Some(d) = known.get(item.id.as_str()) {
                item.date = *d;
            }
        }
        drop(known);

        let existing = if incoming.is_empty() {
            existing
        } else {
            existing.into_iter().filter(|i| !i.is_seed()).collect()
        };
        let fetched_new = count_new(&existing, &incoming);
        let mut items = drop_seeds_if_real(merge(existing, incoming, self.feed.max_retained));
        if items.is_empty() {
            items.push(seed_item(&feed, &self.feed.seed_url, now));
        }
        let total_items = items.len();

        let doc = FeedDocument {
            meta: self.meta(now),
            items,
        };
        match self.gateway.write_document(&doc).await {
            Ok(()) => {
                // cursors only move once the items they cover are stored
                for (sid, c) in &cursors {
                    if let Err(e) = self.gateway.write_cursor(sid, c).await {
                        errors.push(format!("cursor {sid}: {e}"));
                    }
                }
            }
            Err(e) => errors.push(format!("store: {e}")),
        }

        counter!("aggregator_items_new_total", "feed" => feed.clone()).increment(fetched_new as u64);
        gauge!("aggregator_stored_items", "feed" => feed.clone()).set(total_items as f64);
        gauge!("aggregator_last_run_ts", "feed" => feed.clone()).set(now.timestamp() as f64);

        info!(
            target: "ingest",
            %feed,
            total_items,
            fetched_new,
            errors = errors.len(),
            "pipeline run finished"
        );

        RunSummary {
            ok: errors.is_empty(),
            total_items,
            fetched_new,
            errors,
        }
    }

    /// Every adapter in parallel, each capped at `fetch_timeout`.
    async fn fetch_all(&self) -> Vec<(&dyn SourceAdapter, Result<SourceBatch, FetchError>)> {
        let jobs = self.adapters.iter().map(|a| async move {
            let adapter: &dyn SourceAdapter = a.as_ref();
            let sid = adapter.descriptor().normalized_id();
            let cursor = self.gateway.read_cursor(&sid).await;
            let t0 = Instant::now();
            let res = match tokio::time::timeout(self.fetch_timeout, adapter.fetch(cursor.as_ref())).await {
                Ok(r) => r,
                Err(_) => Err(FetchError::Timeout(self.fetch_timeout)),
            };
            histogram!("aggregator_fetch_ms", "source" => sid).record(t0.elapsed().as_secs_f64() * 1_000.0);
            (adapter, res)
        });
        join_all(jobs).await
    }

    /// Configured sources, including ones that got no adapter, then any
    /// adapter added outside the config.
    fn meta(&self, now: DateTime<Utc>) -> FeedMeta {
        let mut sources: Vec<SourceRef> = Vec::new();
        let configured = self.feed.source_descriptors();
        let extra = self.adapters.iter().map(|a| a.descriptor());
        for d in configured.iter().chain(extra) {
            let id = d.normalized_id();
            if sources.iter().any(|s| s.id == id) {
                continue;
            }
            sources.push(SourceRef {
                id,
                name: d.name.clone(),
                kind: d.kind,
                url: d.url.clone(),
            });
        }
        FeedMeta {
            schema_version: SCHEMA_VERSION,
            generated_at: now,
            feed: self.feed.name.clone(),
            sources,
        }
    }

    /// Newest `limit` stored items; the seed item when nothing usable is
    /// stored or the store cannot be read.
    pub async fn latest(&self, limit: usize) -> Vec<TimelineItem> {
        let limit = limit.clamp(1, self.feed.max_retained.max(1));
        let mut items = match self.gateway.read_items().await {
            Ok(v) => v,
            Err(e) => {
                warn!(target: "ingest", feed = %self.feed.name, error = %e, "store read failed");
                Vec::new()
            }
        };
        if items.is_empty() {
            return vec![seed_item(&self.feed.name, &self.feed.seed_url, Utc::now())];
        }
        items.sort_by(|a, b| b.date.cmp(&a.date));
        items.truncate(limit);
        items
    }
}

/// Every configured feed, enabled or not.
pub struct Aggregator {
    config: AggregatorConfig,
    pipelines: Vec<Arc<FeedPipeline>>,
    http: HttpFetcher,
}

impl Aggregator {
    pub fn new(config: AggregatorConfig, pipelines: Vec<FeedPipeline>) -> Self {
        let http = HttpFetcher::new(&config.user_agent, config.fetch_timeout());
        Self {
            config,
            pipelines: pipelines.into_iter().map(Arc::new).collect(),
            http,
        }
    }

    pub fn from_config(config: AggregatorConfig, store: Arc<dyn KvStore>) -> Self {
        let pipelines = config
            .feeds
            .iter()
            .map(|f| FeedPipeline::from_config(&config, f, store.clone()))
            .collect();
        Self::new(config, pipelines)
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    pub fn pipeline(&self, name: &str) -> Option<Arc<FeedPipeline>> {
        self.pipelines
            .iter()
            .find(|p| p.name().eq_ignore_ascii_case(name))
            .cloned()
    }

    pub fn pipelines(&self) -> &[Arc<FeedPipeline>] {
        &self.pipelines
    }

    /// Client for on-demand reads outside any pipeline.
    pub fn http(&self) -> &HttpFetcher {
        &self.http
    }

    /// Run every enabled feed one after another.
    pub async fn run_enabled(&self) -> Vec<(String, RunSummary)> {
        let mut out = Vec::new();
        for p in self.pipelines.iter().filter(|p| p.feed().enabled) {
            out.push((p.name().to_string(), p.run().await));
        }
        out
    }
}
