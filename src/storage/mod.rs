//! Storage layer for conversation content and metadata.
//!
//! Two collaborators live here:
//! - [`DocumentStore`]: one opaque content blob per conversation, keyed by id.
//!   The store does no locking; writers are serialized by the write coordinator.
//! - [`MetadataStore`]: the relational side, of which the sync pipeline only
//!   needs the "last modified" touch.
//!
//! [`FileStore`] keeps blobs as `{id}.html` under a root directory,
//! [`CachedStore`] wraps any document store with an in-memory cache, and
//! [`SledMetadataStore`] keeps conversation rows in a Sled tree.

mod cache;
mod file_store;
mod sled_store;

pub use cache::CachedStore;
pub use file_store::FileStore;
pub use sled_store::SledMetadataStore;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Conversation id, shared by the metadata row and its content blob
pub type DocumentId = i64;

/// Errors that can occur during storage operations
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Sled database error: {0}")]
    Sled(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Document not found: {0}")]
    NotFound(DocumentId),

    #[error("Document already exists: {0}")]
    AlreadyExists(DocumentId),

    #[error("Corruption detected in document: {0}")]
    Corruption(DocumentId),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Content blobs, one per conversation
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create an empty blob. Fails with `AlreadyExists` if one is present.
    async fn create(&self, id: DocumentId) -> StorageResult<()>;

    /// Read the current blob. Fails with `NotFound` if there is none.
    async fn read(&self, id: DocumentId) -> StorageResult<Bytes>;

    /// Overwrite an existing blob. Never creates one.
    async fn write(&self, id: DocumentId, data: Bytes) -> StorageResult<()>;

    /// Remove the blob. Fails with `NotFound` if there is none.
    async fn delete(&self, id: DocumentId) -> StorageResult<()>;
}

/// Write path of the conversation metadata store
pub trait MetadataStore: Send + Sync {
    /// Stamp the conversation's last-modified time with "now".
    ///
    /// Idempotent; touching an unknown conversation is not an error.
    fn touch_conversation(&self, id: DocumentId) -> StorageResult<()>;
}

/// Conversation row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: DocumentId,
    pub name: String,
    pub description: Option<String>,
    /// Unix timestamp of creation
    pub created_at: i64,
    /// Unix timestamp of the last content change
    pub last_modified: i64,
}

impl Conversation {
    pub fn new(id: DocumentId, name: impl Into<String>) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id,
            name: name.into(),
            description: None,
            created_at: now,
            last_modified: now,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Configuration for the storage layer
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Directory holding `{id}.html` content blobs
    pub content_dir: PathBuf,
    /// Path to the Sled metadata database directory
    pub db_path: PathBuf,
    /// How long a cached blob stays valid (None = no caching)
    pub cache_ttl: Option<Duration>,
    /// Sled cache size in bytes (default: 64MB)
    pub db_cache_size: u64,
    /// Background flush interval in milliseconds (0 = no periodic flush,
    /// rows reach disk on `flush` or drop)
    pub flush_interval_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            content_dir: PathBuf::from("./data/content"),
            db_path: PathBuf::from("./data/ether.sled"),
            cache_ttl: None,
            db_cache_size: 64 * 1024 * 1024,
            flush_interval_ms: 500,
        }
    }
}

impl StorageConfig {
    pub fn new(content_dir: impl Into<PathBuf>, db_path: impl Into<PathBuf>) -> Self {
        Self {
            content_dir: content_dir.into(),
            db_path: db_path.into(),
            ..Default::default()
        }
    }
}
