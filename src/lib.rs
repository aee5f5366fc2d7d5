// src/lib.rs
// Public library surface for integration tests and the binary.

pub mod api;
pub mod config;
pub mod error;
pub mod ingest;
pub mod metrics;
pub mod model;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::api::{router, AppState};
pub use crate::config::AggregatorConfig;
pub use crate::ingest::{Aggregator, FeedPipeline, RunSummary};
pub use crate::model::TimelineItem;
