//! Read-through / write-through cache over a [`DocumentStore`].
//!
//! Blobs read from the inner store are kept for `ttl`; a write replaces the
//! cached copy only after the inner write succeeded, and any failure evicts
//! the entry so the next read goes back to the inner store.
//!
//! Every document slot carries a generation bumped by each write and
//! eviction. A read miss only fills the slot if the generation it saw
//! before going to the inner store is still current, so a slow read can
//! never put an older blob over a newer write.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::time::{Duration, Instant};

use super::{DocumentId, DocumentStore, StorageResult};

/// A cached content blob
#[derive(Debug, Clone)]
pub struct CachedFile {
    pub content: Bytes,
    /// When the content was last loaded from (or written to) the inner store
    pub last_read: Instant,
}

impl CachedFile {
    fn new(content: Bytes) -> Self {
        Self {
            content,
            last_read: Instant::now(),
        }
    }

    fn is_fresh(&self, ttl: Duration) -> bool {
        self.last_read.elapsed() < ttl
    }
}

#[derive(Debug, Default)]
struct Slot {
    generation: u64,
    file: Option<CachedFile>,
}

/// Document store wrapper with a per-document cache
pub struct CachedStore<S> {
    inner: S,
    /// Slots outlive their content so generations keep counting
    slots: DashMap<DocumentId, Slot>,
    ttl: Duration,
}

impl<S: DocumentStore> CachedStore<S> {
    pub fn new(inner: S, ttl: Duration) -> Self {
        Self {
            inner,
            slots: DashMap::new(),
            ttl,
        }
    }

    #[cfg(test)]
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Number of cached blobs
    pub fn cached_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.file.is_some()).count()
    }

    /// Drop the cached copy of a document
    pub fn invalidate(&self, id: DocumentId) {
        let mut slot = self.slots.entry(id).or_default();
        slot.generation += 1;
        slot.file = None;
    }

    fn fresh(&self, id: DocumentId) -> Option<Bytes> {
        self.slots.get(&id).and_then(|slot| {
            slot.file
                .as_ref()
                .filter(|file| file.is_fresh(self.ttl))
                .map(|file| file.content.clone())
        })
    }

    fn generation(&self, id: DocumentId) -> u64 {
        self.slots.get(&id).map_or(0, |slot| slot.generation)
    }

    /// Cache what was just written to the inner store
    fn store(&self, id: DocumentId, content: Bytes) {
        let mut slot = self.slots.entry(id).or_default();
        slot.generation += 1;
        slot.file = Some(CachedFile::new(content));
    }

    /// Cache what was read, unless the slot changed since `seen`
    fn fill(&self, id: DocumentId, seen: u64, content: Bytes) {
        let mut slot = self.slots.entry(id).or_default();
        if slot.generation == seen {
            slot.file = Some(CachedFile::new(content));
        }
    }
}

#[async_trait]
impl<S: DocumentStore> DocumentStore for CachedStore<S> {
    async fn create(&self, id: DocumentId) -> StorageResult<()> {
        self.inner.create(id).await?;
        self.store(id, Bytes::new());
        Ok(())
    }

    async fn read(&self, id: DocumentId) -> StorageResult<Bytes> {
        if let Some(content) = self.fresh(id) {
            return Ok(content);
        }

        let seen = self.generation(id);
        match self.inner.read(id).await {
            Ok(content) => {
                self.fill(id, seen, content.clone());
                Ok(content)
            }
            Err(e) => {
                self.invalidate(id);
                Err(e)
            }
        }
    }

    async fn write(&self, id: DocumentId, data: Bytes) -> StorageResult<()> {
        match self.inner.write(id, data.clone()).await {
            Ok(()) => {
                self.store(id, data);
                Ok(())
            }
            Err(e) => {
                self.invalidate(id);
                Err(e)
            }
        }
    }

    async fn delete(&self, id: DocumentId) -> StorageResult<()> {
        self.invalidate(id);
        self.inner.delete(id).await
    }
}
