use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use shuttle_axum::axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::ingest::live::fetch_live;
use crate::ingest::{Aggregator, RunSummary, DEFAULT_READ_LIMIT};
use crate::model::TimelineItem;

#[derive(Clone)]
pub struct AppState {
    pub aggregator: Arc<Aggregator>,
}

impl AppState {
    pub fn new(aggregator: Arc<Aggregator>) -> Self {
        Self { aggregator }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(json!({ "ok": true })) }))
        .route("/sync", get(sync_all).post(sync_all))
        .route("/feeds/{name}", get(read_feed))
        .route("/feeds/{name}/sync", get(sync_feed).post(sync_feed))
        .route("/live/{slug}", get(read_live))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

#[derive(Deserialize)]
struct ReadQuery {
    limit: Option<String>,
}

impl ReadQuery {
    /// Unparseable limits fall back to the default instead of rejecting the read.
    fn limit(&self) -> usize {
        self.limit
            .as_deref()
            .and_then(|l| l.trim().parse().ok())
            .unwrap_or(DEFAULT_READ_LIMIT)
    }
}

#[derive(Serialize)]
struct FeedResp {
    feed: String,
    enabled: bool,
    items: Vec<TimelineItem>,
}

fn not_found(name: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": format!("unknown feed: {name}") })),
    )
        .into_response()
}

async fn read_feed(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(q): Query<ReadQuery>,
) -> Response {
    let Some(p) = state.aggregator.pipeline(&name) else {
        return not_found(&name);
    };
    let feed = p.feed();
    let items = if feed.enabled {
        p.latest(q.limit()).await
    } else {
        Vec::new()
    };
    let cache = format!("public, max-age={}", feed.cache_max_age_secs);
    (
        [(header::CACHE_CONTROL, cache)],
        Json(FeedResp {
            feed: feed.name.clone(),
            enabled: feed.enabled,
            items,
        }),
    )
        .into_response()
}

/// Proxies one platform feed: the newest items, or an empty list with
/// `ok: false` when the platform cannot be read.
async fn read_live(State(state): State<AppState>, Path(slug): Path<String>) -> Response {
    let agg = &state.aggregator;
    let Some(live) = agg.config().live_feed(&slug) else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "ok": false, "message": format!("unknown live feed: {slug}"), "items": [] })),
        )
            .into_response();
    };
    let Some(rss_url) = live.rss_url.as_deref() else {
        return (
            [(header::CACHE_CONTROL, "public, max-age=300")],
            Json(json!({ "ok": true, "message": "no feed configured for this platform", "items": [] })),
        )
            .into_response();
    };
    match fetch_live(agg.http(), rss_url).await {
        Ok(items) => (
            [(header::CACHE_CONTROL, "public, max-age=900")],
            Json(json!({ "ok": true, "items": items })),
        )
            .into_response(),
        Err(e) => {
            tracing::warn!(target: "api", slug = %live.slug, error = %e, "live feed read failed");
            (
                [(header::CACHE_CONTROL, "public, max-age=120")],
                Json(json!({ "ok": false, "message": e.to_string(), "items": [] })),
            )
                .into_response()
        }
    }
}

async fn sync_feed(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Some(denied) = authorize(&state, &headers) {
        return denied;
    }
    let Some(p) = state.aggregator.pipeline(&name) else {
        return not_found(&name);
    };
    if !p.feed().enabled {
        return (
            StatusCode::CONFLICT,
            Json(json!({ "error": format!("feed {} is disabled", p.name()) })),
        )
            .into_response();
    }
    summary_response(p.run().await)
}

/// Runs every enabled feed and folds the summaries into one.
async fn sync_all(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(denied) = authorize(&state, &headers) {
        return denied;
    }
    let mut total = RunSummary {
        ok: true,
        total_items: 0,
        fetched_new: 0,
        errors: Vec::new(),
    };
    for (_, s) in state.aggregator.run_enabled().await {
        total.ok &= s.ok;
        total.total_items += s.total_items;
        total.fetched_new += s.fetched_new;
        total.errors.extend(s.errors);
    }
    summary_response(total)
}

fn summary_response(summary: RunSummary) -> Response {
    let status = if summary.errors.is_empty() {
        StatusCode::OK
    } else {
        StatusCode::MULTI_STATUS
    };
    (status, [(header::CACHE_CONTROL, "no-store")], Json(summary)).into_response()
}

/// `None` when the request carries the configured bearer token. With no token
/// configured, manual syncs are refused outright.
fn authorize(state: &AppState, headers: &HeaderMap) -> Option<Response> {
    let expected = state.aggregator.config().sync_token.as_deref().unwrap_or_default();
    let given = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_token)
        .unwrap_or_default();
    if !expected.is_empty() && constant_time_eq(given.as_bytes(), expected.as_bytes()) {
        return None;
    }
    tracing::warn!(target: "api", "rejected sync request");
    Some((StatusCode::UNAUTHORIZED, "Unauthorized").into_response())
}

/// Token of a `Bearer` authorization value; the scheme is case-insensitive.
fn bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.trim().split_once(char::is_whitespace)?;
    scheme.eq_ignore_ascii_case("bearer").then(|| token.trim())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_compare() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
    }

    #[test]
    fn bearer_scheme_is_case_insensitive() {
        assert_eq!(bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(bearer_token("bearer \t  abc "), Some("abc"));
        assert_eq!(bearer_token("BEARER abc"), Some("abc"));
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("Bearerabc"), None);
    }

    #[test]
    fn bad_limit_reads_as_default() {
        let q = |l: Option<&str>| ReadQuery { limit: l.map(str::to_string) };
        assert_eq!(q(Some("abc")).limit(), DEFAULT_READ_LIMIT);
        assert_eq!(q(Some(" 5 ")).limit(), 5);
        assert_eq!(q(Some("-1")).limit(), DEFAULT_READ_LIMIT);
        assert_eq!(q(None).limit(), DEFAULT_READ_LIMIT);
    }
}
