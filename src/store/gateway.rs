// src/store/gateway.rs
//! Reads and writes one feed's persisted state: the item document under the
//! feed's items key, and one cursor per source under
//! `<namespace>:last_id:<source id>`.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use super::KvStore;
use crate::error::{PersistenceReadError, StoreError};
use crate::model::{FeedDocument, SourceCursor, TimelineItem};

pub struct PersistenceGateway {
    store: Arc<dyn KvStore>,
    namespace: String,
    items_key: String,
}

impl PersistenceGateway {
    pub fn new(store: Arc<dyn KvStore>, namespace: &str, items_key: &str) -> Self {
        Self {
            store,
            namespace: namespace.to_string(),
            items_key: items_key.to_string(),
        }
    }

    /// Stored items. Corrupt data reads as empty; only backend failures are
    /// errors, so callers can tell "nothing stored" from "could not look".
    pub async fn read_items(&self) -> Result<Vec<TimelineItem>, StoreError> {
        let Some(raw) = self.store.get(&self.items_key).await? else {
            return Ok(Vec::new());
        };
        match decode_items(&self.items_key, &raw) {
            Ok(items) => Ok(items),
            Err(e) => {
                warn!(target: "ingest", error = %e, "discarding unreadable stored items");
                Ok(Vec::new())
            }
        }
    }

    pub async fn write_document(&self, doc: &FeedDocument) -> Result<(), StoreError> {
        let body = serde_json::to_string(doc).map_err(|source| StoreError::Encode {
            key: self.items_key.clone(),
            source,
        })?;
        self.store.put(&self.items_key, body).await
    }

    pub fn cursor_key(&self, source_id: &str) -> String {
        format!("{}:last_id:{}", self.namespace, source_id.to_lowercase())
    }

    /// Missing, unreadable or blank cursors all mean "start from scratch".
    pub async fn read_cursor(&self, source_id: &str) -> Option<SourceCursor> {
        let key = self.cursor_key(source_id);
        let raw = match self.store.get(&key).await {
            Ok(v) => v?,
            Err(e) => {
                warn!(target: "ingest", %key, error = %e, "cursor read failed");
                return None;
            }
        };
        // stored as a JSON string; older values may be bare text
        let text = serde_json::from_str::<String>(&raw).unwrap_or(raw);
        SourceCursor::new(&text)
    }

    pub async fn write_cursor(&self, source_id: &str, cursor: &SourceCursor) -> Result<(), StoreError> {
        let key = self.cursor_key(source_id);
        let body = serde_json::to_string(cursor).map_err(|source| StoreError::Encode {
            key: key.clone(),
            source,
        })?;
        self.store.put(&key, body).await
    }
}

/// Accepts a `{ items: [...] }` document or a bare array. Entries that do not
/// deserialize or lack id/title/url are dropped one by one.
pub fn decode_items(key: &str, raw: &str) -> Result<Vec<TimelineItem>, PersistenceReadError> {
    let invalid = |message: String| PersistenceReadError {
        key: key.to_string(),
        message,
    };
    let value: Value = serde_json::from_str(raw).map_err(|e| invalid(e.to_string()))?;
    let entries = match value {
        Value::Array(a) => a,
        Value::Object(mut o) => match o.remove("items") {
            Some(Value::Array(a)) => a,
            _ => return Err(invalid("document has no items array".into())),
        },
        _ => return Err(invalid("expected an array or an object".into())),
    };

    let total = entries.len();
    let items: Vec<TimelineItem> = entries
        .into_iter()
        .filter_map(|v| serde_json::from_value::<TimelineItem>(v).ok())
        .filter(TimelineItem::is_valid)
        .collect();
    if items.len() < total {
        debug!(target: "ingest", key, dropped = total - items.len(), "dropped invalid stored entries");
    }
    Ok(items)
}
