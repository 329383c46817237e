use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::now_millis;

/// Who authored a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    User,
    Assistant,
    Error,
}

/// Role label sent to the language model as context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One entry of a user's chat history.
///
/// The `id` is the turn identifier: the user echo, every streamed chunk and the
/// final assistant (or error) message of one turn all carry the same value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub content: String,
    pub role: Role,
    /// Epoch milliseconds.
    pub timestamp: i64,
}

impl Message {
    pub fn user(id: Uuid, content: impl Into<String>) -> Self {
        Self::build(id, MessageKind::User, Role::User, content.into())
    }

    pub fn assistant(id: Uuid, content: impl Into<String>) -> Self {
        Self::build(id, MessageKind::Assistant, Role::Assistant, content.into())
    }

    /// Error entries keep the assistant role so the client renders them on the
    /// assistant side of the conversation.
    pub fn error(id: Uuid, content: impl Into<String>) -> Self {
        Self::build(id, MessageKind::Error, Role::Assistant, content.into())
    }

    fn build(id: Uuid, kind: MessageKind, role: Role, content: String) -> Self {
        Self {
            id,
            kind,
            content,
            role,
            timestamp: now_millis(),
        }
    }

    pub fn is_user(&self) -> bool {
        self.kind == MessageKind::User
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_wire_shape() {
        let id = Uuid::new_v4();
        let msg = Message::user(id, "walked the dog");
        let json = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["id"], id.to_string());
        assert_eq!(json["type"], "user");
        assert_eq!(json["role"], "user");
        assert_eq!(json["content"], "walked the dog");
        assert!(json["timestamp"].as_i64().unwrap() > 0);
    }

    #[test]
    fn test_error_message_uses_assistant_role() {
        let msg = Message::error(Uuid::new_v4(), "Error processing message");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["role"], "assistant");
        assert!(!msg.is_user());
    }
}
