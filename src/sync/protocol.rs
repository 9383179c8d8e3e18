//! Wire format of the messages carried on the update log.
//!
//! Each log message is keyed by the conversation id as a decimal string. Its
//! value is the JSON envelope the collaborative editing protocol uses on its
//! WebSocket connections:
//!
//! ```json
//! { "type": 1, "data": { "patch": "@@ -1,11 +1,17 @@\n..." } }
//! ```
//!
//! Only `Update` messages carrying a patch feed the content pipeline; every
//! other type is acknowledged and ignored.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use super::UpdateEvent;
use crate::storage::DocumentId;

/// Envelope message types
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Init = 0,
    Update = 1,
    Ack = 2,
    Sync = 3,
    UserJoin = 4,
    UserLeave = 5,
}

impl TryFrom<i64> for MessageType {
    type Error = i64;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MessageType::Init),
            1 => Ok(MessageType::Update),
            2 => Ok(MessageType::Ack),
            3 => Ok(MessageType::Sync),
            4 => Ok(MessageType::UserJoin),
            5 => Ok(MessageType::UserLeave),
            other => Err(other),
        }
    }
}

/// Update message subtypes
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum UpdateType {
    Edit = 0,
    Cursor = 1,
}

impl From<u8> for UpdateType {
    fn from(value: u8) -> Self {
        match value {
            1 => UpdateType::Cursor,
            _ => UpdateType::Edit,
        }
    }
}

impl From<UpdateType> for u8 {
    fn from(value: UpdateType) -> Self {
        value as u8
    }
}

/// Caret and content shift carried by an update
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caret_start: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caret_end: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc: Option<i64>,
}

/// A user's selection in the document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caret {
    pub start: i64,
    pub end: i64,
}

/// Envelope payload. All fields are optional; which ones are present
/// depends on the message type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InnerData {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub update_type: Option<UpdateType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<Delta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_users: Option<HashMap<i64, Caret>>,
}

/// Tagged message wrapper
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: i64,
    #[serde(default)]
    pub data: InnerData,
}

impl Envelope {
    /// Build an update envelope carrying a patch
    pub fn update(patch: impl Into<String>) -> Self {
        Self {
            kind: MessageType::Update as i64,
            data: InnerData {
                update_type: Some(UpdateType::Edit),
                patch: Some(patch.into()),
                ..Default::default()
            },
        }
    }

    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::try_from(self.kind).ok()
    }
}

/// Errors decoding a log message
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Message key is not a conversation id: {0:?}")]
    InvalidKey(String),

    #[error("Message value malformed: {0}")]
    MalformedEnvelope(#[from] serde_json::Error),
}

/// What a decoded message asks the pipeline to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Apply a patch to a document
    Update(UpdateEvent),
    /// Nothing to do for this message type
    Ignored {
        document_id: DocumentId,
        kind: i64,
    },
}

/// Parse a message key as a conversation id
pub fn decode_key(key: &[u8]) -> Result<DocumentId, DecodeError> {
    std::str::from_utf8(key)
        .ok()
        .and_then(|s| s.parse::<DocumentId>().ok())
        .ok_or_else(|| DecodeError::InvalidKey(String::from_utf8_lossy(key).into_owned()))
}

/// Decode a raw log message into a pipeline event
pub fn decode(key: &[u8], value: &[u8]) -> Result<StreamEvent, DecodeError> {
    let document_id = decode_key(key)?;
    let envelope: Envelope = serde_json::from_slice(value)?;

    match (envelope.message_type(), envelope.data.patch) {
        (Some(MessageType::Update), Some(patch)) => {
            Ok(StreamEvent::Update(UpdateEvent::new(document_id, patch)))
        }
        // TODO: UserJoin / UserLeave could maintain a presence list per conversation
        _ => Ok(StreamEvent::Ignored {
            document_id,
            kind: envelope.kind,
        }),
    }
}
