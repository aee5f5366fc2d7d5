//! Timeline Aggregator — Binary Entrypoint
//! Loads config, wires the store, pipelines and scheduler, and serves the
//! read/sync endpoints plus `/metrics`.

use std::sync::Arc;

use anyhow::Context;
use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use timeline_aggregator::config::load_config_default;
use timeline_aggregator::ingest::scheduler::spawn_scheduler;
use timeline_aggregator::metrics::Metrics;
use timeline_aggregator::store::{FileStore, KvStore};
use timeline_aggregator::{router, Aggregator, AppState};

/// Enable compact tracing logs in development only.
/// Activation requires BOTH:
///   - dev environment (debug build OR SHUTTLE_ENV in {local, development, dev})
///   - AGGREGATOR_DEV_LOG=1
fn enable_dev_tracing() {
    let dev_flag = std::env::var("AGGREGATOR_DEV_LOG")
        .ok()
        .is_some_and(|v| v == "1");

    let is_dev_env = cfg!(debug_assertions)
        || matches!(
            std::env::var("SHUTTLE_ENV")
                .unwrap_or_default()
                .to_ascii_lowercase()
                .as_str(),
            "local" | "development" | "dev"
        );

    if !(dev_flag && is_dev_env) {
        return;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("timeline_aggregator=info,warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();

    enable_dev_tracing();

    let config = load_config_default()
        .context("loading aggregator config")?
        .apply_env();
    let store: Arc<dyn KvStore> = Arc::new(FileStore::new(&config.data_dir)?);
    let interval = config.sync_interval();
    let aggregator = Arc::new(Aggregator::from_config(config, store));

    if let Some(every) = interval {
        spawn_scheduler(aggregator.clone(), every);
    }

    let mut app = router(AppState::new(aggregator));
    match Metrics::init() {
        Ok(m) => app = app.merge(m.router()),
        Err(e) => tracing::warn!(error = ?e, "metrics exporter disabled"),
    }

    Ok(app.into())
}
