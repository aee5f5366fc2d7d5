// src/config/mod.rs
pub mod aggregator;

pub use aggregator::{
    load_config_default, load_config_from, AggregatorConfig, FeedConfig, LiveFeedConfig, XSettings,
    DEFAULT_SEED_URL, ENV_CONFIG_PATH,
};
