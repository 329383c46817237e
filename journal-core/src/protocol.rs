//! Session wire protocol
//!
//! Every WebSocket text frame is a JSON object `{"event": <name>, "data": <payload>}`.
//! Inbound: `message` (plain text fragment). Outbound: `system`, `message`, `chunk`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::JournalError;
use crate::models::{now_millis, Message};

/// Events sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    /// One finalized transcript fragment.
    Message(String),
}

impl ClientEvent {
    /// Parse one inbound text frame. Unknown events are errors.
    pub fn from_frame(frame: &str) -> Result<Self, JournalError> {
        Ok(serde_json::from_str(frame)?)
    }
}

/// Events sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    System(SystemNotice),
    Message(Message),
    Chunk(StreamChunk),
}

impl ServerEvent {
    pub fn to_frame(&self) -> Result<String, JournalError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Connection lifecycle notice. `user_id` is the identity bound to the session:
/// the verified subject, or the minted anonymous id the client should reuse on
/// HTTP calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemNotice {
    #[serde(rename = "type")]
    pub kind: String,
    pub content: String,
    pub user_id: String,
    pub timestamp: i64,
}

impl SystemNotice {
    pub fn connected(user_id: impl Into<String>) -> Self {
        Self {
            kind: "system".to_string(),
            content: "connected".to_string(),
            user_id: user_id.into(),
            timestamp: now_millis(),
        }
    }
}

/// One incremental piece of a streamed assistant reply. Never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    pub id: Uuid,
    pub chunk: String,
    pub timestamp: i64,
}

impl StreamChunk {
    pub fn new(id: Uuid, chunk: impl Into<String>) -> Self {
        Self {
            id,
            chunk: chunk.into(),
            timestamp: now_millis(),
        }
    }
}
