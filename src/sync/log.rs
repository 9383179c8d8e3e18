//! Source of update messages.

use async_trait::async_trait;
use thiserror::Error;

/// Connection settings for the update log
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Bootstrap broker address
    pub brokers: String,
    pub topic: String,
    /// Consumer group; members share the topic's partitions
    pub group_id: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            topic: "ether".to_string(),
            group_id: "ether".to_string(),
        }
    }
}

/// One record pulled off the log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogMessage {
    /// Conversation id as a decimal string
    pub key: Vec<u8>,
    /// JSON envelope
    pub value: Vec<u8>,
    pub partition: i32,
    pub offset: i64,
}

impl LogMessage {
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            partition: 0,
            offset: 0,
        }
    }
}

/// The log can no longer be read
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Could not connect to the update log: {0}")]
    Connect(String),

    #[error("Update log connection closed")]
    Closed,

    #[error("Failed to read from the update log: {0}")]
    Read(String),
}

/// A partitioned, ordered message log read by a consumer group member
#[async_trait]
pub trait MessageLog: Send {
    /// Block until the next message is available.
    ///
    /// Offsets are committed in the background at intervals, so after a
    /// crash the group may be handed the last few messages again. Patches
    /// that were already applied then usually fail to match and are dropped.
    async fn next_message(&mut self) -> Result<LogMessage, TransportError>;
}
