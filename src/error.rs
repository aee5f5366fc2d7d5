// src/error.rs
//! Error taxonomy for the aggregation pipeline.
//!
//! Fetch and parse errors stay local to one source; config errors short-circuit
//! one optional pipeline; persistence read errors mean "nothing stored yet".
//! None of them escape `FeedPipeline::run`, which always returns a summary.

use std::time::Duration;

use thiserror::Error;

/// Network, timeout or HTTP-status failure for a single source.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP {status} from {url}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    #[error("reading body of {url}: {message}")]
    Body { url: String, message: String },

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("source is not configured: {0}")]
    Config(#[from] ConfigError),
}

/// Malformed feed/page/API payload. Raised per block or per document.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("xml: {0}")]
    Xml(String),

    #[error("json: {0}")]
    Json(String),

    #[error("candidate is missing {0}")]
    Missing(&'static str),
}

/// Missing secret or invalid setting for an enabled pipeline.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required secret {0}")]
    MissingSecret(&'static str),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Stored JSON that fails shape validation. Callers treat it as absent.
#[derive(Debug, Error)]
#[error("stored value under {key} is invalid: {message}")]
pub struct PersistenceReadError {
    pub key: String,
    pub message: String,
}

/// Key-value backend failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io on {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("encoding value for {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}
