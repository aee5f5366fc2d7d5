// tests/ingest_pipeline.rs
//
// End-to-end pipeline runs over in-memory storage and fixture-backed sources.
// No sockets: adapters hand back parsed fixtures, fail, or stall.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use timeline_aggregator::config::FeedConfig;
use timeline_aggregator::error::{FetchError, StoreError};
use timeline_aggregator::ingest::normalize::{canonicalize_url, TagRule};
use timeline_aggregator::ingest::providers::rss::parse_feed;
use timeline_aggregator::ingest::types::{
    RawCandidate, SourceAdapter, SourceBatch, SourceDescriptor, SourceKind,
};
use timeline_aggregator::ingest::FeedPipeline;
use timeline_aggregator::model::{FeedDocument, SourceCursor, TimelineItem};
use timeline_aggregator::store::{KvStore, MemoryStore};

const RESEARCH_RSS: &str = include_str!("fixtures/research_rss.xml");
const MALFORMED_RSS: &str = include_str!("fixtures/malformed_rss.xml");
const ATOM: &str = include_str!("fixtures/atom.xml");

enum Behaviour {
    Feed(&'static str),
    Candidates(Vec<RawCandidate>),
    Fail,
    Stall,
    /// One post plus the watermark it advances to.
    Cursor(&'static str),
}

struct FakeSource {
    d: SourceDescriptor,
    behaviour: Behaviour,
}

impl FakeSource {
    fn boxed(id: &str, behaviour: Behaviour) -> Box<dyn SourceAdapter> {
        let d = SourceDescriptor::new(id, &format!("Source {id}"), SourceKind::Rss, "https://src.example.com/");
        Box::new(Self { d, behaviour })
    }
}

#[async_trait]
impl SourceAdapter for FakeSource {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.d
    }

    async fn fetch(&self, _cursor: Option<&SourceCursor>) -> Result<SourceBatch, FetchError> {
        match &self.behaviour {
            Behaviour::Feed(xml) => Ok(parse_feed(xml)?),
            Behaviour::Candidates(c) => Ok(SourceBatch {
                candidates: c.clone(),
                ..Default::default()
            }),
            Behaviour::Fail => Err(FetchError::Status {
                url: "https://src.example.com/feed".into(),
                status: 503,
                body: "unavailable".into(),
            }),
            Behaviour::Stall => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(SourceBatch::default())
            }
            Behaviour::Cursor(id) => Ok(SourceBatch {
                candidates: vec![RawCandidate {
                    title: Some(format!("Post {id}")),
                    url: Some(format!("https://src.example.com/status/{id}")),
                    date: Some("2025-06-01T09:00:00Z".into()),
                    ..Default::default()
                }],
                cursor: SourceCursor::new(id),
                ..Default::default()
            }),
        }
    }
}

/// Memory store whose reads or writes of the item document can be switched
/// to fail.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    fail_items_get: AtomicBool,
    fail_items_put: AtomicBool,
}

impl FlakyStore {
    fn backend_down(key: &str) -> StoreError {
        StoreError::Io {
            key: key.to_string(),
            source: std::io::Error::other("backend down"),
        }
    }
}

#[async_trait]
impl KvStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        if key == "web:items" && self.fail_items_get.load(Ordering::SeqCst) {
            return Err(Self::backend_down(key));
        }
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, value: String) -> Result<(), StoreError> {
        if key == "web:items" && self.fail_items_put.load(Ordering::SeqCst) {
            return Err(Self::backend_down(key));
        }
        self.inner.put(key, value).await
    }
}

fn feed(max_retained: usize) -> FeedConfig {
    FeedConfig {
        name: "web".into(),
        key: "web:items".into(),
        max_retained,
        ..FeedConfig::default()
    }
}

fn pipeline(
    store: &Arc<MemoryStore>,
    max_retained: usize,
    adapters: Vec<Box<dyn SourceAdapter>>,
) -> FeedPipeline {
    FeedPipeline::new(feed(max_retained), adapters, store.clone(), Duration::from_millis(200))
}

fn run_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 7, 1, 12, 0, 0).unwrap()
}

fn stored(store: &MemoryStore) -> Vec<TimelineItem> {
    let raw = store.raw("web:items").expect("document written");
    let doc: FeedDocument = serde_json::from_str(&raw).expect("valid document");
    doc.items
}

fn assert_sorted_newest_first(items: &[TimelineItem]) {
    assert!(
        items.windows(2).all(|w| w[0].date >= w[1].date),
        "items must be sorted newest first"
    );
}

#[tokio::test]
async fn three_rss_items_into_empty_store() {
    let store = Arc::new(MemoryStore::new());
    let p = pipeline(&store, 600, vec![FakeSource::boxed("lab", Behaviour::Feed(RESEARCH_RSS))]);

    let s = p.run_at(run_time()).await;
    assert!(s.ok, "errors: {:?}", s.errors);
    assert_eq!(s.fetched_new, 3);
    assert_eq!(s.total_items, 3);

    let items = stored(&store);
    assert_eq!(items.len(), 3);
    assert_sorted_newest_first(&items);
    assert_eq!(items[0].url, "https://research.example.com/posts/agents");
    assert_eq!(items[1].url, "https://research.example.com/posts/benchmark");
    assert!(items[0].tags.contains(&"agents".to_string()));
    assert!(items[0].summary.starts_with("We study how agents plan"));
    assert_eq!(items[2].title, "Open weights release \u{2014} v2");
    assert!(items.iter().all(|i| i.source_id == "lab"));
}

#[tokio::test]
async fn second_identical_run_changes_nothing() {
    let store = Arc::new(MemoryStore::new());
    let p = pipeline(
        &store,
        600,
        vec![
            FakeSource::boxed("lab", Behaviour::Feed(RESEARCH_RSS)),
            FakeSource::boxed("atom", Behaviour::Feed(ATOM)),
        ],
    );

    let first = p.run_at(run_time()).await;
    let after_first = stored(&store);
    let second = p.run_at(run_time() + chrono::Duration::hours(1)).await;
    let after_second = stored(&store);

    assert_eq!(first.fetched_new, 5);
    assert_eq!(second.fetched_new, 0);
    assert_eq!(second.total_items, 5);
    assert_eq!(after_first, after_second);
}

#[tokio::test]
async fn two_of_five_sources_failing_still_persists_the_rest() {
    let store = Arc::new(MemoryStore::new());
    let p = pipeline(
        &store,
        600,
        vec![
            FakeSource::boxed("lab", Behaviour::Feed(RESEARCH_RSS)),
            FakeSource::boxed("down_a", Behaviour::Fail),
            FakeSource::boxed("atom", Behaviour::Feed(ATOM)),
            FakeSource::boxed("down_b", Behaviour::Fail),
            FakeSource::boxed("handmade", Behaviour::Feed(MALFORMED_RSS)),
        ],
    );

    let s = p.run_at(run_time()).await;
    assert!(!s.ok);
    assert_eq!(s.errors.len(), 2, "errors: {:?}", s.errors);
    assert!(s.errors.iter().any(|e| e.starts_with("Source down_a:")));
    assert!(s.errors.iter().any(|e| e.starts_with("Source down_b:")));
    // 3 + 2 + 2 (one malformed block skipped, not an error)
    assert_eq!(s.total_items, 7);
    assert_sorted_newest_first(&stored(&store));
}

#[tokio::test]
async fn stalled_source_times_out_without_sinking_the_run() {
    let store = Arc::new(MemoryStore::new());
    let p = pipeline(
        &store,
        600,
        vec![
            FakeSource::boxed("slow", Behaviour::Stall),
            FakeSource::boxed("lab", Behaviour::Feed(RESEARCH_RSS)),
        ],
    );

    let started = std::time::Instant::now();
    let s = p.run_at(run_time()).await;
    assert!(started.elapsed() < Duration::from_secs(5));

    assert_eq!(s.errors.len(), 1);
    assert!(s.errors[0].contains("Source slow"));
    assert!(s.errors[0].contains("timed out"));
    assert_eq!(s.total_items, 3);
}

#[tokio::test]
async fn all_sources_failing_on_first_run_writes_a_seed() {
    let store = Arc::new(MemoryStore::new());
    let p = pipeline(&store, 600, vec![FakeSource::boxed("down", Behaviour::Fail)]);

    let s = p.run_at(run_time()).await;
    assert!(!s.ok);
    assert_eq!(s.total_items, 1);
    let items = stored(&store);
    assert_eq!(items.len(), 1);
    assert!(items[0].is_seed());

    // the seed goes away as soon as something real arrives
    let p = pipeline(&store, 600, vec![FakeSource::boxed("lab", Behaviour::Feed(RESEARCH_RSS))]);
    let s = p.run_at(run_time()).await;
    assert_eq!(s.fetched_new, 3);
    let items = stored(&store);
    assert_eq!(items.len(), 3);
    assert!(items.iter().all(|i| !i.is_seed()));
}

#[tokio::test]
async fn failing_run_keeps_prior_items() {
    let store = Arc::new(MemoryStore::new());
    pipeline(&store, 600, vec![FakeSource::boxed("lab", Behaviour::Feed(RESEARCH_RSS))])
        .run_at(run_time())
        .await;

    let s = pipeline(&store, 600, vec![FakeSource::boxed("lab", Behaviour::Fail)])
        .run_at(run_time())
        .await;
    assert!(!s.ok);
    assert_eq!(s.total_items, 3);
    assert_eq!(stored(&store).len(), 3);
}

#[tokio::test]
async fn retention_bound_keeps_newest() {
    let store = Arc::new(MemoryStore::new());
    let p = pipeline(
        &store,
        2,
        vec![
            FakeSource::boxed("lab", Behaviour::Feed(RESEARCH_RSS)),
            FakeSource::boxed("atom", Behaviour::Feed(ATOM)),
        ],
    );
    for _ in 0..3 {
        let s = p.run_at(run_time()).await;
        assert!(s.total_items <= 2);
    }
    let items = stored(&store);
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].url, "https://research.example.com/posts/agents");
    assert_eq!(items[1].url, "https://research.example.com/posts/benchmark");
}

#[tokio::test]
async fn tracking_params_and_fragments_dedup_to_one_item() {
    assert_eq!(
        canonicalize_url("https://example.com/a?utm_source=x&b=2#frag", None),
        canonicalize_url("https://example.com/a?b=2", None)
    );

    let store = Arc::new(MemoryStore::new());
    let c = |url: &str, date: &str| RawCandidate {
        title: Some("Same story".into()),
        url: Some(url.into()),
        date: Some(date.into()),
        ..Default::default()
    };
    let p = pipeline(
        &store,
        600,
        vec![FakeSource::boxed(
            "dup",
            Behaviour::Candidates(vec![
                c("https://example.com/a?utm_source=x&b=2#frag", "2025-01-02"),
                c("https://example.com/a?b=2", "2025-01-01"),
            ]),
        )],
    );
    let s = p.run_at(run_time()).await;
    assert_eq!(s.total_items, 1);
    assert_eq!(stored(&store)[0].url, "https://example.com/a?b=2");
}

#[tokio::test]
async fn refetch_with_different_title_whitespace_stays_one_item() {
    let store = Arc::new(MemoryStore::new());
    let candidate = |title: &str| RawCandidate {
        title: Some(title.into()),
        url: Some("https://example.com/post".into()),
        date: Some("2025-06-01T00:00:00Z".into()),
        ..Default::default()
    };

    pipeline(
        &store,
        600,
        vec![FakeSource::boxed("blog", Behaviour::Candidates(vec![candidate("Big   news")]))],
    )
    .run_at(run_time())
    .await;
    let s = pipeline(
        &store,
        600,
        vec![FakeSource::boxed(
            "blog",
            Behaviour::Candidates(vec![candidate("  Big\n news  ")]),
        )],
    )
    .run_at(run_time())
    .await;

    assert_eq!(s.fetched_new, 0);
    let items = stored(&store);
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].title, "Big news");
}

#[tokio::test]
async fn corrupt_stored_document_is_rebuilt() {
    let store = Arc::new(MemoryStore::new());
    store.insert_raw("web:items", "{\"items\": [ this is not json");
    let p = pipeline(&store, 600, vec![FakeSource::boxed("lab", Behaviour::Feed(RESEARCH_RSS))]);

    let s = p.run_at(run_time()).await;
    assert!(s.ok);
    assert_eq!(s.fetched_new, 3);
    assert_eq!(stored(&store).len(), 3);
}

#[tokio::test]
async fn read_side_falls_back_to_seed() {
    let store = Arc::new(MemoryStore::new());
    let p = pipeline(&store, 600, Vec::new());
    let items = p.latest(50).await;
    assert_eq!(items.len(), 1);
    assert!(items[0].is_seed());
    // reading never writes
    assert!(store.get("web:items").await.unwrap().is_none());
}

#[tokio::test]
async fn unreadable_store_skips_the_run() {
    let store = Arc::new(FlakyStore::default());
    store.inner.insert_raw("web:items", "{}");
    store.fail_items_get.store(true, Ordering::SeqCst);
    let p = FeedPipeline::new(
        feed(600),
        vec![FakeSource::boxed("x_lab", Behaviour::Cursor("1790000000000000002"))],
        store.clone(),
        Duration::from_millis(200),
    );

    let s = p.run_at(run_time()).await;
    assert!(!s.ok);
    assert_eq!(s.total_items, 0);
    assert_eq!(s.errors.len(), 1);
    assert!(s.errors[0].starts_with("store:"), "got {:?}", s.errors);
    // nothing overwritten, no cursor moved
    assert_eq!(store.inner.raw("web:items").as_deref(), Some("{}"));
    assert!(store.inner.raw("web:last_id:x_lab").is_none());
}

#[tokio::test]
async fn cursor_moves_only_after_items_are_stored() {
    let store = Arc::new(FlakyStore::default());
    store.fail_items_put.store(true, Ordering::SeqCst);
    let p = FeedPipeline::new(
        feed(600),
        vec![FakeSource::boxed("X_Lab", Behaviour::Cursor("1790000000000000002"))],
        store.clone(),
        Duration::from_millis(200),
    );

    let failed = p.run_at(run_time()).await;
    assert!(!failed.ok);
    assert_eq!(failed.errors.len(), 1);
    assert!(failed.errors[0].starts_with("store:"), "got {:?}", failed.errors);
    assert!(store.inner.raw("web:items").is_none());
    assert!(store.inner.raw("web:last_id:x_lab").is_none());

    store.fail_items_put.store(false, Ordering::SeqCst);
    let ok = p.run_at(run_time()).await;
    assert!(ok.ok, "errors: {:?}", ok.errors);
    assert_eq!(ok.total_items, 1);
    assert_eq!(
        store.inner.raw("web:last_id:x_lab").as_deref(),
        Some("\"1790000000000000002\"")
    );
}

#[tokio::test]
async fn fallback_tags_fill_in_when_no_rule_matches() {
    let store = Arc::new(MemoryStore::new());
    let f = FeedConfig {
        tag_rules: vec![TagRule::new("stream", &["Streams"])],
        fallback_tags: vec!["Uploads".into()],
        ..feed(600)
    };
    let candidates = vec![
        RawCandidate {
            title: Some("Friday stream replay".into()),
            url: Some("https://videos.example.com/watch?v=1".into()),
            date: Some("2025-06-02".into()),
            ..Default::default()
        },
        RawCandidate {
            title: Some("New beat showcase".into()),
            url: Some("https://videos.example.com/watch?v=2".into()),
            date: Some("2025-06-01".into()),
            ..Default::default()
        },
    ];
    let p = FeedPipeline::new(
        f,
        vec![FakeSource::boxed("yt", Behaviour::Candidates(candidates))],
        store.clone(),
        Duration::from_millis(200),
    );

    assert!(p.run_at(run_time()).await.ok);
    let items = stored(&store);
    assert_eq!(items[0].tags, ["Streams".to_string()]);
    assert_eq!(items[1].tags, ["Uploads".to_string()]);
}
