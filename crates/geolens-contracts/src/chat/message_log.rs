use chrono::Utc;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Model,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Model => "model",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub text: String,
    /// Epoch milliseconds.
    pub timestamp: i64,
}

/// Ordered, append-only transcript of one chat session.
///
/// Entries are never edited or removed. Timestamps never decrease: a clock
/// that steps backwards is clamped to the previous entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageLog {
    messages: Vec<ChatMessage>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, role: ChatRole, text: impl Into<String>) -> &ChatMessage {
        self.push_at(role, text, Utc::now().timestamp_millis())
    }

    pub fn push_at(
        &mut self,
        role: ChatRole,
        text: impl Into<String>,
        timestamp: i64,
    ) -> &ChatMessage {
        let floor = self
            .messages
            .last()
            .map(|message| message.timestamp)
            .unwrap_or(i64::MIN);
        self.messages.push(ChatMessage {
            role,
            text: text.into(),
            timestamp: timestamp.max(floor),
        });
        &self.messages[self.messages.len() - 1]
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
