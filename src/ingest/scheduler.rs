// src/ingest/scheduler.rs
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::ingest::Aggregator;

/// Spawn a background task that runs every enabled feed each `every`.
///
/// The first tick fires immediately so a fresh deployment fills its store
/// without waiting a full interval.
pub fn spawn_scheduler(aggregator: Arc<Aggregator>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            for (feed, summary) in aggregator.run_enabled().await {
                tracing::info!(
                    target: "ingest",
                    %feed,
                    ok = summary.ok,
                    total_items = summary.total_items,
                    fetched_new = summary.fetched_new,
                    "scheduled sync"
                );
            }
        }
    })
}
