//! In-memory stand-ins for the storage and log collaborators.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::future::Future;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

use crate::storage::{DocumentId, DocumentStore, MetadataStore, StorageError, StorageResult};
use crate::sync::log::{LogMessage, MessageLog, TransportError};

/// Document store over a map. Reads yield once to shake up task ordering.
#[derive(Default)]
pub struct MemoryStore {
    docs: DashMap<DocumentId, Bytes>,
}

impl MemoryStore {
    pub fn with_docs<'a>(docs: impl IntoIterator<Item = (DocumentId, &'a str)>) -> Self {
        let store = Self::default();
        for (id, content) in docs {
            store
                .docs
                .insert(id, Bytes::copy_from_slice(content.as_bytes()));
        }
        store
    }

    pub fn get(&self, id: DocumentId) -> Option<String> {
        self.docs
            .get(&id)
            .map(|b| String::from_utf8_lossy(&b).into_owned())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn create(&self, id: DocumentId) -> StorageResult<()> {
        if self.docs.contains_key(&id) {
            return Err(StorageError::AlreadyExists(id));
        }
        self.docs.insert(id, Bytes::new());
        Ok(())
    }

    async fn read(&self, id: DocumentId) -> StorageResult<Bytes> {
        tokio::task::yield_now().await;
        self.docs
            .get(&id)
            .map(|b| b.clone())
            .ok_or(StorageError::NotFound(id))
    }

    async fn write(&self, id: DocumentId, data: Bytes) -> StorageResult<()> {
        match self.docs.get_mut(&id) {
            Some(mut doc) => {
                *doc = data;
                Ok(())
            }
            None => Err(StorageError::NotFound(id)),
        }
    }

    async fn delete(&self, id: DocumentId) -> StorageResult<()> {
        self.docs
            .remove(&id)
            .map(|_| ())
            .ok_or(StorageError::NotFound(id))
    }
}

/// Memory store whose reads of chosen documents park until released
pub struct BlockingStore {
    pub inner: MemoryStore,
    blocked: Mutex<HashSet<DocumentId>>,
    release: Notify,
}

impl BlockingStore {
    pub fn new(inner: MemoryStore, blocked: &[DocumentId]) -> Self {
        Self {
            inner,
            blocked: Mutex::new(blocked.iter().copied().collect()),
            release: Notify::new(),
        }
    }

    /// Let every parked and future read through
    pub fn release_all(&self) {
        self.blocked.lock().clear();
        self.release.notify_waiters();
    }
}

#[async_trait]
impl DocumentStore for BlockingStore {
    async fn create(&self, id: DocumentId) -> StorageResult<()> {
        self.inner.create(id).await
    }

    async fn read(&self, id: DocumentId) -> StorageResult<Bytes> {
        loop {
            let notified = self.release.notified();
            if !self.blocked.lock().contains(&id) {
                break;
            }
            notified.await;
        }
        self.inner.read(id).await
    }

    async fn write(&self, id: DocumentId, data: Bytes) -> StorageResult<()> {
        self.inner.write(id, data).await
    }

    async fn delete(&self, id: DocumentId) -> StorageResult<()> {
        self.inner.delete(id).await
    }
}

/// Memory store whose next read, once armed, takes its snapshot and then
/// parks until released
pub struct StallingStore {
    pub inner: MemoryStore,
    armed: AtomicBool,
    parked: Notify,
    release: Notify,
}

impl StallingStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            armed: AtomicBool::new(false),
            parked: Notify::new(),
            release: Notify::new(),
        }
    }

    pub fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    /// Resolves once the armed read holds its snapshot
    pub async fn wait_parked(&self) {
        self.parked.notified().await;
    }

    pub fn release(&self) {
        self.release.notify_one();
    }
}

#[async_trait]
impl DocumentStore for StallingStore {
    async fn create(&self, id: DocumentId) -> StorageResult<()> {
        self.inner.create(id).await
    }

    async fn read(&self, id: DocumentId) -> StorageResult<Bytes> {
        let content = self.inner.read(id).await;
        if self.armed.swap(false, Ordering::SeqCst) {
            self.parked.notify_one();
            self.release.notified().await;
        }
        content
    }

    async fn write(&self, id: DocumentId, data: Bytes) -> StorageResult<()> {
        self.inner.write(id, data).await
    }

    async fn delete(&self, id: DocumentId) -> StorageResult<()> {
        self.inner.delete(id).await
    }
}

/// Memory store that panics when reading chosen documents
pub struct PanickingStore {
    pub inner: MemoryStore,
    cursed: HashSet<DocumentId>,
}

impl PanickingStore {
    pub fn new(inner: MemoryStore, cursed: &[DocumentId]) -> Self {
        Self {
            inner,
            cursed: cursed.iter().copied().collect(),
        }
    }
}

#[async_trait]
impl DocumentStore for PanickingStore {
    async fn create(&self, id: DocumentId) -> StorageResult<()> {
        self.inner.create(id).await
    }

    async fn read(&self, id: DocumentId) -> StorageResult<Bytes> {
        if self.cursed.contains(&id) {
            panic!("read of document {} blew up", id);
        }
        self.inner.read(id).await
    }

    async fn write(&self, id: DocumentId, data: Bytes) -> StorageResult<()> {
        self.inner.write(id, data).await
    }

    async fn delete(&self, id: DocumentId) -> StorageResult<()> {
        self.inner.delete(id).await
    }
}

/// Metadata store that records every touch
#[derive(Default)]
pub struct RecordingMetadata {
    touched: Mutex<Vec<DocumentId>>,
}

impl RecordingMetadata {
    pub fn touched(&self) -> Vec<DocumentId> {
        self.touched.lock().clone()
    }
}

impl MetadataStore for RecordingMetadata {
    fn touch_conversation(&self, id: DocumentId) -> StorageResult<()> {
        self.touched.lock().push(id);
        Ok(())
    }
}

/// Message log fed from a channel. Once the sender is dropped and the
/// backlog drained, reads fail as a lost connection.
pub struct MemoryLog {
    rx: mpsc::UnboundedReceiver<Result<LogMessage, TransportError>>,
    offset: i64,
}

pub type MemoryLogSender = mpsc::UnboundedSender<Result<LogMessage, TransportError>>;

impl MemoryLog {
    pub fn channel() -> (MemoryLogSender, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx, offset: 0 })
    }

    /// A log preloaded with `(key, value)` messages, closed after the last one
    pub fn from_messages<'a>(messages: impl IntoIterator<Item = (&'a str, String)>) -> Self {
        let (tx, log) = Self::channel();
        for (key, value) in messages {
            let _ = tx.send(Ok(LogMessage::new(key.as_bytes().to_vec(), value.into_bytes())));
        }
        log
    }
}

#[async_trait]
impl MessageLog for MemoryLog {
    async fn next_message(&mut self) -> Result<LogMessage, TransportError> {
        let mut message = self.rx.recv().await.ok_or(TransportError::Closed)??;
        message.offset = self.offset;
        self.offset += 1;
        Ok(message)
    }
}

/// Poll `check` until it holds, panicking after `timeout`
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let waited = tokio::time::timeout(timeout, async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "condition not reached within {:?}", timeout);
}
