// src/store/mod.rs
//! Key-value persistence: the `KvStore` seam, two backends, and the gateway
//! that owns the stored document shapes.

pub mod file;
pub mod gateway;
pub mod memory;

pub use file::FileStore;
pub use gateway::PersistenceGateway;
pub use memory::MemoryStore;

use crate::error::StoreError;

/// Minimal string-valued KV contract (values are JSON documents).
#[async_trait::async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn put(&self, key: &str, value: String) -> Result<(), StoreError>;
}
