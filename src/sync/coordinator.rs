//! Serialized writes to conversation content.
//!
//! Every update is a read-patch-write cycle on one blob, and the store does
//! no locking of its own. The coordinator owns a fixed set of writer shards;
//! a document always maps to the same shard and each shard applies its queue
//! strictly in submission order, so two updates to one document never
//! overlap. Different shards run in parallel. With a single shard (the
//! default) all writes in the process are serialized.
//!
//! Submission never blocks: queues are unbounded.

use bytes::Bytes;
use futures_util::future::join_all;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{AppliedUpdate, ApplyError, ApplyResult, UpdateEvent};
use crate::patch::PatchEngine;
use crate::storage::{DocumentId, DocumentStore, StorageError};

/// Configuration for the WriteCoordinator
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Number of writer shards (at least 1)
    pub shards: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self { shards: 1 }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CoordinatorError {
    #[error("Write coordinator is shut down")]
    Closed,
}

/// Write statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct CoordinatorStats {
    pub shards: usize,
    /// Updates submitted but not yet finished
    pub pending: usize,
    pub applied: u64,
    /// Patches that did not match the current content
    pub rejected: u64,
    /// Storage, parse and encoding failures
    pub failed: u64,
}

#[derive(Default)]
struct Counters {
    pending: AtomicUsize,
    applied: AtomicU64,
    rejected: AtomicU64,
    failed: AtomicU64,
}

struct WriteJob {
    event: UpdateEvent,
    done: oneshot::Sender<ApplyResult>,
}

/// Runs patch updates against the document store, one at a time per document
pub struct WriteCoordinator {
    shard_count: usize,
    /// Emptied on shutdown
    senders: RwLock<Vec<mpsc::UnboundedSender<WriteJob>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<Counters>,
}

impl WriteCoordinator {
    /// Spawn the writer shards. Must be called within a Tokio runtime.
    pub fn start(
        store: Arc<dyn DocumentStore>,
        engine: Arc<PatchEngine>,
        config: CoordinatorConfig,
    ) -> Self {
        let shard_count = config.shards.max(1);
        let counters = Arc::new(Counters::default());
        let mut senders = Vec::with_capacity(shard_count);
        let mut workers = Vec::with_capacity(shard_count);

        for shard in 0..shard_count {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.push(tx);
            workers.push(tokio::spawn(run_shard(
                shard,
                rx,
                store.clone(),
                engine.clone(),
                counters.clone(),
            )));
        }

        info!("Write coordinator started with {} shard(s)", shard_count);

        Self {
            shard_count,
            senders: RwLock::new(senders),
            workers: Mutex::new(workers),
            counters,
        }
    }

    /// Shard owning a document
    pub fn shard_for(&self, id: DocumentId) -> usize {
        id.rem_euclid(self.shard_count as i64) as usize
    }

    /// Queue an update. The receiver resolves once it has been applied or
    /// dropped; it may be ignored.
    pub fn submit(
        &self,
        event: UpdateEvent,
    ) -> Result<oneshot::Receiver<ApplyResult>, CoordinatorError> {
        let shard = self.shard_for(event.document_id);
        let (done, rx) = oneshot::channel();

        let senders = self.senders.read();
        let sender = senders.get(shard).ok_or(CoordinatorError::Closed)?;

        self.counters.pending.fetch_add(1, Ordering::Relaxed);
        if sender.send(WriteJob { event, done }).is_err() {
            self.counters.pending.fetch_sub(1, Ordering::Relaxed);
            return Err(CoordinatorError::Closed);
        }
        Ok(rx)
    }

    pub fn is_closed(&self) -> bool {
        self.senders.read().is_empty()
    }

    pub fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            shards: self.shard_count,
            pending: self.counters.pending.load(Ordering::Relaxed),
            applied: self.counters.applied.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting updates and wait for queued ones to finish
    pub async fn shutdown(&self) {
        let senders = std::mem::take(&mut *self.senders.write());
        if senders.is_empty() {
            return;
        }
        drop(senders);

        let workers = std::mem::take(&mut *self.workers.lock());
        for result in join_all(workers).await {
            if let Err(e) = result {
                error!("Writer shard panicked: {}", e);
            }
        }
        info!("Write coordinator stopped");
    }
}

async fn run_shard(
    shard: usize,
    mut rx: mpsc::UnboundedReceiver<WriteJob>,
    store: Arc<dyn DocumentStore>,
    engine: Arc<PatchEngine>,
    counters: Arc<Counters>,
) {
    debug!("Writer shard {} running", shard);

    while let Some(WriteJob { event, done }) = rx.recv().await {
        let id = event.document_id;
        // Run apart from the shard loop so a panic only loses this update
        let task = tokio::spawn({
            let store = store.clone();
            let engine = engine.clone();
            async move { apply_update(store.as_ref(), &engine, &event).await }
        });
        let result = match task.await {
            Ok(result) => result,
            Err(e) => {
                error!("Update for conversation {} panicked: {}", id, e);
                Err(ApplyError::Aborted(id))
            }
        };

        match &result {
            Ok(update) => {
                counters.applied.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "Applied {}/{} hunks to conversation {} ({} bytes)",
                    update.hunks_applied, update.hunks_total, id, update.content_len
                );
            }
            Err(ApplyError::Rejected(_)) => {
                counters.rejected.fetch_add(1, Ordering::Relaxed);
                warn!("Patch for conversation {} did not apply, dropped", id);
            }
            Err(ApplyError::Storage(StorageError::NotFound(_))) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!("No content for conversation {}, update dropped", id);
            }
            Err(e) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                error!("Update for conversation {} failed: {}", id, e);
            }
        }

        counters.pending.fetch_sub(1, Ordering::Relaxed);
        // The submitter may have stopped listening
        let _ = done.send(result);
    }

    debug!("Writer shard {} drained", shard);
}

/// One read-patch-write cycle. The blob is written only when the patch set
/// applied; otherwise the stored content is left as it was.
pub async fn apply_update(
    store: &dyn DocumentStore,
    engine: &PatchEngine,
    event: &UpdateEvent,
) -> ApplyResult {
    let id = event.document_id;
    let content = store.read(id).await?;
    let base = std::str::from_utf8(&content).map_err(|_| ApplyError::InvalidUtf8(id))?;

    let outcome = engine.apply(base, &event.patch)?;
    if !outcome.ok() {
        return Err(ApplyError::Rejected(id));
    }

    let hunks_applied = outcome.applied.iter().filter(|ok| **ok).count();
    let hunks_total = outcome.applied.len();
    let content_len = outcome.text.len();
    store.write(id, Bytes::from(outcome.text)).await?;

    Ok(AppliedUpdate {
        document_id: id,
        hunks_applied,
        hunks_total,
        content_len,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::CachedStore;
    use crate::testing::{BlockingStore, MemoryStore, PanickingStore, StallingStore};
    use std::time::Duration;

    fn start(store: Arc<dyn DocumentStore>, shards: usize) -> WriteCoordinator {
        WriteCoordinator::start(
            store,
            Arc::new(PatchEngine::default()),
            CoordinatorConfig { shards },
        )
    }

    #[tokio::test]
    async fn test_applies_patch() {
        let store = Arc::new(MemoryStore::with_docs([(42, "hello world")]));
        let coordinator = start(store.clone(), 1);
        let patch = PatchEngine::default().make("hello world", "hello there world");

        let update = coordinator
            .submit(UpdateEvent::new(42, patch))
            .unwrap()
            .await
            .unwrap()
            .unwrap();

        assert_eq!(update.document_id, 42);
        assert_eq!(update.content_len, "hello there world".len());
        assert_eq!(store.get(42).unwrap(), "hello there world");
        assert_eq!(coordinator.stats().applied, 1);
    }

    #[tokio::test]
    async fn test_rejected_patch_leaves_content() {
        let store = Arc::new(MemoryStore::with_docs([(1, "zzzzzzzzzzzzzzzzzzzz")]));
        let coordinator = start(store.clone(), 1);
        let patch = PatchEngine::default().make("The quick brown fox", "The slow brown fox");

        let result = coordinator
            .submit(UpdateEvent::new(1, patch))
            .unwrap()
            .await
            .unwrap();

        assert!(matches!(result, Err(ApplyError::Rejected(1))));
        assert_eq!(store.get(1).unwrap(), "zzzzzzzzzzzzzzzzzzzz");
        assert_eq!(coordinator.stats().rejected, 1);
    }

    #[tokio::test]
    async fn test_malformed_patch_and_missing_doc() {
        let store = Arc::new(MemoryStore::with_docs([(1, "abc")]));
        let coordinator = start(store.clone(), 1);

        let bad = coordinator
            .submit(UpdateEvent::new(1, "not a patch"))
            .unwrap()
            .await
            .unwrap();
        assert!(matches!(bad, Err(ApplyError::Patch(_))));
        assert_eq!(store.get(1).unwrap(), "abc");

        let missing = coordinator
            .submit(UpdateEvent::new(2, "@@ -1 +1 @@\n-a\n+b\n"))
            .unwrap()
            .await
            .unwrap();
        assert!(matches!(
            missing,
            Err(ApplyError::Storage(StorageError::NotFound(2)))
        ));
        // Never created implicitly
        assert!(store.get(2).is_none());
        assert_eq!(coordinator.stats().failed, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_same_document_updates_are_sequential() {
        let engine = PatchEngine::default();
        let mut versions = vec!["Once upon a time".to_string()];
        for i in 0..20 {
            let prev = versions.last().unwrap().clone();
            versions.push(format!("{} and then {}", prev, i));
        }

        let store = Arc::new(MemoryStore::with_docs([(7, versions[0].as_str())]));
        let coordinator = start(store.clone(), 4);

        let receivers: Vec<_> = versions
            .windows(2)
            .map(|pair| {
                let patch = engine.make(&pair[0], &pair[1]);
                coordinator.submit(UpdateEvent::new(7, patch)).unwrap()
            })
            .collect();

        for rx in receivers {
            rx.await.unwrap().unwrap();
        }
        assert_eq!(store.get(7).unwrap(), *versions.last().unwrap());
    }

    #[tokio::test]
    async fn test_slow_document_does_not_block_other_shards() {
        let store = Arc::new(BlockingStore::new(
            MemoryStore::with_docs([(2, "slow doc"), (1, "fast doc")]),
            &[2],
        ));
        let coordinator = start(store.clone(), 2);
        assert_ne!(coordinator.shard_for(1), coordinator.shard_for(2));

        let engine = PatchEngine::default();
        let slow = coordinator
            .submit(UpdateEvent::new(2, engine.make("slow doc", "slow doc!")))
            .unwrap();
        let fast = coordinator
            .submit(UpdateEvent::new(1, engine.make("fast doc", "fast doc!")))
            .unwrap();

        let fast_result = tokio::time::timeout(Duration::from_secs(5), fast)
            .await
            .expect("fast document was held up")
            .unwrap();
        assert!(fast_result.is_ok());
        assert_eq!(store.inner.get(2).unwrap(), "slow doc");

        store.release_all();
        slow.await.unwrap().unwrap();
        assert_eq!(store.inner.get(2).unwrap(), "slow doc!");
    }

    #[tokio::test]
    async fn test_shutdown_drains_queue() {
        let store = Arc::new(MemoryStore::with_docs([(3, "a")]));
        let coordinator = start(store.clone(), 1);
        let engine = PatchEngine::default();

        for next in ["ab", "abc", "abcd"] {
            let prev = &next[..next.len() - 1];
            coordinator
                .submit(UpdateEvent::new(3, engine.make(prev, next)))
                .unwrap();
        }
        coordinator.shutdown().await;

        assert_eq!(store.get(3).unwrap(), "abcd");
        assert_eq!(coordinator.stats().applied, 3);
        assert_eq!(coordinator.stats().pending, 0);
        assert!(coordinator.is_closed());
        assert_eq!(
            coordinator.submit(UpdateEvent::new(3, "x")).unwrap_err(),
            CoordinatorError::Closed
        );
    }

    #[tokio::test]
    async fn test_panicking_update_does_not_stop_the_shard() {
        let store = Arc::new(PanickingStore::new(
            MemoryStore::with_docs([(9, "cursed"), (1, "hello world")]),
            &[9],
        ));
        let coordinator = start(store.clone(), 1);
        let engine = PatchEngine::default();

        let cursed = coordinator
            .submit(UpdateEvent::new(9, engine.make("cursed", "cursed!")))
            .unwrap();
        let next = coordinator
            .submit(UpdateEvent::new(1, engine.make("hello world", "hello there world")))
            .unwrap();

        assert!(matches!(cursed.await.unwrap(), Err(ApplyError::Aborted(9))));
        next.await.unwrap().unwrap();
        assert_eq!(store.inner.get(1).unwrap(), "hello there world");

        let stats = coordinator.stats();
        assert_eq!((stats.applied, stats.failed, stats.pending), (1, 1, 0));
        assert!(!coordinator.is_closed());
    }

    #[tokio::test]
    async fn test_out_of_range_header_is_dropped_and_shard_continues() {
        let store = Arc::new(MemoryStore::with_docs([(1, "hello world abc")]));
        let coordinator = start(store.clone(), 1);

        let hostile = coordinator
            .submit(UpdateEvent::new(1, "@@ -1,3 +1,18446744073709551615 @@\n abc\n"))
            .unwrap();
        let valid = coordinator
            .submit(UpdateEvent::new(
                1,
                PatchEngine::default().make("hello world abc", "hello world abcd"),
            ))
            .unwrap();

        assert!(matches!(hostile.await.unwrap(), Err(ApplyError::Patch(_))));
        valid.await.unwrap().unwrap();
        assert_eq!(store.get(1).unwrap(), "hello world abcd");
    }

    #[tokio::test]
    async fn test_cached_reads_overlapping_a_write_keep_the_newer_content() {
        let engine = PatchEngine::default();
        let v0 = "The quick brown fox high";
        let v1 = "The quick brown fox jumps high";
        let v2 = "The quick brown fox jumps very high";

        let cache = Arc::new(CachedStore::new(
            StallingStore::new(MemoryStore::with_docs([(8, v0)])),
            Duration::from_secs(60),
        ));
        let coordinator = start(cache.clone(), 1);

        // A content read that stalls after loading v0
        cache.inner().arm();
        let reader = tokio::spawn({
            let cache = cache.clone();
            async move { cache.read(8).await }
        });
        cache.inner().wait_parked().await;

        coordinator
            .submit(UpdateEvent::new(8, engine.make(v0, v1)))
            .unwrap()
            .await
            .unwrap()
            .unwrap();
        cache.inner().release();
        reader.await.unwrap().unwrap();

        coordinator
            .submit(UpdateEvent::new(8, engine.make(v1, v2)))
            .unwrap()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cache.inner().inner.get(8).unwrap(), v2);
    }

    #[tokio::test]
    async fn test_negative_ids_map_to_a_shard() {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::default());
        let coordinator = start(store, 3);
        assert!(coordinator.shard_for(-5) < 3);
        assert_eq!(coordinator.shard_for(-3), 0);
    }
}
