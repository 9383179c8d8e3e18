//! Content synchronization pipeline.
//!
//! Edits reach the server as patch messages on an external, partitioned log.
//! The pipeline is two loops joined by unbounded queues:
//! - [`StreamConsumer`](consumer::StreamConsumer) pulls messages one at a
//!   time, decodes them and hands updates to the coordinator
//! - [`WriteCoordinator`] applies updates to the document store, never two at
//!   once for the same document, and reports each outcome back
//!
//! Content errors (bad keys, malformed envelopes, patches that do not apply,
//! storage failures) are logged and dropped. Losing the log connection is fatal.

// Without a transport only the tests drive the consumer
#[cfg_attr(not(feature = "kafka"), allow(dead_code))]
pub mod consumer;
pub mod coordinator;
#[cfg(feature = "kafka")]
pub mod kafka;
#[cfg_attr(not(feature = "kafka"), allow(dead_code))]
pub mod log;
#[cfg_attr(not(feature = "kafka"), allow(dead_code))]
pub mod protocol;

#[cfg(feature = "kafka")]
pub use consumer::StreamConsumer;
pub use coordinator::{CoordinatorConfig, CoordinatorStats, WriteCoordinator};
pub use log::LogConfig;

use thiserror::Error;

use crate::patch::PatchError;
use crate::storage::{DocumentId, StorageError};

/// A decoded content edit for one document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateEvent {
    pub document_id: DocumentId,
    /// Serialized patch set
    pub patch: String,
}

impl UpdateEvent {
    pub fn new(document_id: DocumentId, patch: impl Into<String>) -> Self {
        Self {
            document_id,
            patch: patch.into(),
        }
    }
}

/// Summary of a successfully applied update
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedUpdate {
    pub document_id: DocumentId,
    /// Hunks that landed, out of `hunks_total`
    pub hunks_applied: usize,
    pub hunks_total: usize,
    /// Size of the document after the update, in bytes
    pub content_len: usize,
}

/// Why an update was dropped
#[derive(Error, Debug)]
pub enum ApplyError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Could not process patch: {0}")]
    Patch(#[from] PatchError),

    #[error("Patch did not apply to document {0}")]
    Rejected(DocumentId),

    #[error("Document {0} is not valid UTF-8")]
    InvalidUtf8(DocumentId),

    #[error("Update for document {0} was aborted")]
    Aborted(DocumentId),
}

/// Outcome of one update, as reported by the coordinator
pub type ApplyResult = Result<AppliedUpdate, ApplyError>;
