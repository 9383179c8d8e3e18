//! Update log consumer.
//!
//! Pulls one message at a time, decodes it and hands updates to the
//! [`WriteCoordinator`]. Once an update has been applied the conversation's
//! last-modified time is stamped in the metadata store.
//!
//! Errors fall in two classes. Losing the log (or the coordinator) stops the
//! consumer and is reported to the caller. Anything wrong with a single
//! message is logged and the message skipped; it is not retried.
//!
//! Touches run as tasks owned by the consumer. After the coordinator has
//! drained, [`StreamConsumer::wait_for_touches`] lets the caller wait for the
//! stamps of every applied update before flushing metadata.

use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::coordinator::WriteCoordinator;
use super::log::{LogMessage, MessageLog, TransportError};
use super::protocol::{self, DecodeError, StreamEvent};
use super::ApplyResult;
use crate::storage::{DocumentId, MetadataStore};

/// How the consumer reacts to an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Stop consuming
    Fatal,
    /// Skip the message and keep going
    Recoverable,
}

#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("Write coordinator is closed")]
    CoordinatorClosed,
}

impl ConsumerError {
    pub fn severity(&self) -> Severity {
        match self {
            ConsumerError::Transport(_) | ConsumerError::CoordinatorClosed => Severity::Fatal,
            ConsumerError::Decode(_) => Severity::Recoverable,
        }
    }
}

/// Where the consumer is in its read loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Connecting,
    Reading,
    Decoding,
    Dispatching,
    Closed,
}

/// What happened to a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Queued for writing
    Submitted(DocumentId),
    /// Nothing to do for this message
    Ignored,
}

pub struct StreamConsumer<L> {
    log: L,
    coordinator: Arc<WriteCoordinator>,
    metadata: Arc<dyn MetadataStore>,
    /// Pending last-modified stamps
    touches: JoinSet<()>,
    state: ConsumerState,
    processed: u64,
}

impl<L: MessageLog> StreamConsumer<L> {
    pub fn new(
        log: L,
        coordinator: Arc<WriteCoordinator>,
        metadata: Arc<dyn MetadataStore>,
    ) -> Self {
        Self {
            log,
            coordinator,
            metadata,
            touches: JoinSet::new(),
            state: ConsumerState::Connecting,
            processed: 0,
        }
    }

    pub fn state(&self) -> ConsumerState {
        self.state
    }

    /// Messages pulled off the log so far
    pub fn processed(&self) -> u64 {
        self.processed
    }

    /// Touches not yet finished
    pub fn pending_touches(&self) -> usize {
        self.touches.len()
    }

    /// Consume until `shutdown` resolves or a fatal error occurs. The fatal
    /// error is returned. A message being handled when `shutdown` fires is
    /// finished first.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<(), ConsumerError>
    where
        F: Future<Output = ()>,
    {
        info!("Update consumer started");
        tokio::pin!(shutdown);

        loop {
            self.state = ConsumerState::Reading;
            while self.touches.try_join_next().is_some() {}

            let next = tokio::select! {
                _ = &mut shutdown => None,
                next = self.log.next_message() => Some(next),
            };
            let Some(next) = next else {
                self.state = ConsumerState::Closed;
                info!("Update consumer stopped after {} messages", self.processed);
                return Ok(());
            };

            let result = next
                .map_err(ConsumerError::from)
                .and_then(|message| self.process(message));

            if let Err(err) = result {
                match err.severity() {
                    Severity::Fatal => {
                        self.state = ConsumerState::Closed;
                        error!("Update consumer stopped: {}", err);
                        return Err(err);
                    }
                    Severity::Recoverable => warn!("Skipping update message: {}", err),
                }
            }
        }
    }

    /// Wait for the touches of every update handed out so far. Call after
    /// the coordinator has been shut down, or this waits on live queues.
    pub async fn wait_for_touches(&mut self) {
        while let Some(result) = self.touches.join_next().await {
            if let Err(e) = result {
                warn!("Touch task failed: {}", e);
            }
        }
    }

    /// Decode one message and dispatch it
    pub fn process(&mut self, message: LogMessage) -> Result<Dispatch, ConsumerError> {
        self.processed += 1;
        self.state = ConsumerState::Decoding;
        debug!(
            "Message at partition {} offset {}",
            message.partition, message.offset
        );

        match protocol::decode(&message.key, &message.value)? {
            StreamEvent::Update(event) => {
                self.state = ConsumerState::Dispatching;
                let id = event.document_id;
                let done = self
                    .coordinator
                    .submit(event)
                    .map_err(|_| ConsumerError::CoordinatorClosed)?;
                self.touches
                    .spawn(touch_when_applied(self.metadata.clone(), id, done));
                Ok(Dispatch::Submitted(id))
            }
            StreamEvent::Ignored { document_id, kind } => {
                debug!(
                    "Ignoring message type {} for conversation {}",
                    kind, document_id
                );
                Ok(Dispatch::Ignored)
            }
        }
    }
}

/// Stamp the conversation once its update has been written
async fn touch_when_applied(
    metadata: Arc<dyn MetadataStore>,
    id: DocumentId,
    done: oneshot::Receiver<ApplyResult>,
) {
    match done.await {
        Ok(Ok(_)) => {
            if let Err(e) = metadata.touch_conversation(id) {
                warn!("Failed to update last modified time of conversation {}: {}", id, e);
            }
        }
        // Already logged by the writer
        Ok(Err(_)) => {}
        Err(_) => warn!("Update for conversation {} was abandoned", id),
    }
}
