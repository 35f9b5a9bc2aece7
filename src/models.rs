use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Placeholder label a conversation carries until it is renamed.
pub const DEFAULT_CHAT_NAME: &str = "New Chat";

/// Represents the role of a transcript entry
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// Represents a single message in a conversation.
///
/// Field names follow the persisted layout (`id`, `content`, `isUser`,
/// `timestamp`), timestamps are milliseconds since the unix epoch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub content: String,
    pub is_user: bool,
    pub timestamp: i64,
}

impl Message {
    pub fn user(id: String, content: String) -> Self {
        Self {
            id,
            content,
            is_user: true,
            timestamp: now_millis(),
        }
    }

    pub fn assistant(id: String, content: String) -> Self {
        Self {
            id,
            content,
            is_user: false,
            timestamp: now_millis(),
        }
    }

    pub fn role(&self) -> MessageRole {
        if self.is_user {
            MessageRole::User
        } else {
            MessageRole::Assistant
        }
    }
}

/// Represents a conversation thread
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub name: String,
    pub messages: Vec<Message>,
    pub created_at: i64,
}

impl Conversation {
    pub fn new(id: String, first_message: Option<Message>) -> Self {
        Self {
            id,
            name: DEFAULT_CHAT_NAME.to_string(),
            messages: first_message.into_iter().collect(),
            created_at: now_millis(),
        }
    }

    pub fn has_message(&self, message_id: &str) -> bool {
        self.messages.iter().any(|m| m.id == message_id)
    }
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Renders a millisecond timestamp for display, empty when out of range.
pub fn format_millis(millis: i64) -> String {
    Utc.timestamp_millis_opt(millis)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_default()
}
