use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{ChatMessage, MessageRole, ProviderSlot};

/// Longest auto-generated title, in characters.
pub const AUTO_TITLE_CHARS: usize = 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(title: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            title,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A persisted message. `seq` orders messages within their conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub conversation_id: String,
    pub role: MessageRole,
    pub content: String,
    pub attachment_url: Option<String>,
    /// Provider that produced an assistant message.
    pub provider: Option<String>,
    pub created_at: DateTime<Utc>,
    pub seq: i64,
}

impl StoredMessage {
    pub fn new(conversation_id: impl Into<String>, role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.into(),
            role,
            content: content.into(),
            attachment_url: None,
            provider: None,
            created_at: Utc::now(),
            seq: 0,
        }
    }

    pub fn with_attachment(mut self, attachment_url: Option<String>) -> Self {
        self.attachment_url = attachment_url;
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Neutral form sent to providers. Attachments are referenced by URL
    /// on a trailing line.
    pub fn to_chat_message(&self) -> ChatMessage {
        match &self.attachment_url {
            Some(url) if self.content.is_empty() => {
                ChatMessage::new(self.role, format!("[Attachment: {}]", url))
            }
            Some(url) => ChatMessage::new(self.role, format!("{}\n[Attachment: {}]", self.content, url)),
            None => ChatMessage::new(self.role, self.content.clone()),
        }
    }
}

/// User input for one turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    pub content: String,
    #[serde(default)]
    pub attachment_url: Option<String>,
}

impl NewMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            attachment_url: None,
        }
    }
}

/// A completed user/assistant turn as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatExchange {
    pub conversation_id: String,
    pub user_message: StoredMessage,
    pub assistant_message: StoredMessage,
    pub provider: String,
    pub slot: ProviderSlot,
    pub attempts: u8,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationWithMessages {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub messages: Vec<StoredMessage>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChatError {
    #[error("message content must not be empty")]
    EmptyMessage,

    #[error("message is {length} characters, the limit is {max}")]
    MessageTooLong { length: usize, max: usize },

    #[error("invalid attachment URL: {0}")]
    InvalidAttachment(String),

    #[error("conversation not found: {0}")]
    ConversationNotFound(String),
}

/// Title derived from the first user message: trimmed, single line, at
/// most [`AUTO_TITLE_CHARS`] characters.
pub fn title_from_message(content: &str) -> String {
    let line = content.trim().lines().next().unwrap_or_default().trim();
    line.chars().take(AUTO_TITLE_CHARS).collect()
}
