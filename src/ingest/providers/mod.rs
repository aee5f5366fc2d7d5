// src/ingest/providers/mod.rs
pub mod html;
pub mod rss;
pub mod web;
pub mod x_api;

pub use web::WebSourceAdapter;
pub use x_api::XTimelineAdapter;
