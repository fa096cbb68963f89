use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use crate::app::config::ChatConfig;
use crate::chat::types::{
    title_from_message, ChatError, ChatExchange, Conversation, ConversationWithMessages, NewMessage,
    StoredMessage,
};
use crate::error::Result;
use crate::models::{MessageRole, ResponseRouter};
use crate::storage::{ConversationRepository, ConversationStatistics};

/// Coordinates conversation history, the response router and persistence.
pub struct ChatService {
    router: Arc<ResponseRouter>,
    repository: ConversationRepository,
    config: ChatConfig,
}

impl ChatService {
    pub fn new(router: Arc<ResponseRouter>, repository: ConversationRepository, config: ChatConfig) -> Self {
        info!(
            "Chat service ready (history window {}, max message length {})",
            config.history_window, config.max_message_length
        );
        Self {
            router,
            repository,
            config,
        }
    }

    pub fn router(&self) -> &Arc<ResponseRouter> {
        &self.router
    }

    fn validate(&self, message: &NewMessage) -> std::result::Result<(), ChatError> {
        if let Some(attachment) = &message.attachment_url {
            let url = Url::parse(attachment)
                .map_err(|e| ChatError::InvalidAttachment(format!("{}: {}", attachment, e)))?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(ChatError::InvalidAttachment(format!(
                    "{}: only http and https are supported",
                    attachment
                )));
            }
        } else if message.content.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        let length = message.content.chars().count();
        if length > self.config.max_message_length {
            return Err(ChatError::MessageTooLong {
                length,
                max: self.config.max_message_length,
            });
        }
        Ok(())
    }

    /// Sends one user turn and stores it with the reply. Nothing is stored
    /// when no provider produced a reply.
    pub async fn send_message(&self, conversation_id: &str, message: NewMessage) -> Result<ChatExchange> {
        self.validate(&message)?;

        let conversation = self
            .repository
            .get_conversation(conversation_id)
            .await?
            .ok_or_else(|| ChatError::ConversationNotFound(conversation_id.to_string()))?;

        let user = StoredMessage::new(conversation_id, MessageRole::User, message.content)
            .with_attachment(message.attachment_url);

        let mut history: Vec<_> = self
            .repository
            .recent_messages(conversation_id, self.config.history_window)
            .await?
            .iter()
            .map(StoredMessage::to_chat_message)
            .collect();
        history.push(user.to_chat_message());
        debug!(
            "Sending {} message(s) for conversation {}",
            history.len(),
            conversation_id
        );

        let reply = self.router.get_response(&history).await?;

        let assistant = StoredMessage::new(conversation_id, MessageRole::Assistant, reply.content)
            .with_provider(reply.provider.clone());
        let auto_title = conversation
            .title
            .is_none()
            .then(|| title_from_message(&user.content))
            .filter(|title| !title.is_empty());

        let (user_message, assistant_message) = self
            .repository
            .append_exchange(user, assistant, auto_title.as_deref())
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    warn!("Conversation {} deleted while awaiting a reply", conversation_id);
                    ChatError::ConversationNotFound(conversation_id.to_string()).into()
                } else {
                    e
                }
            })?;

        Ok(ChatExchange {
            conversation_id: conversation_id.to_string(),
            user_message,
            assistant_message,
            provider: reply.provider,
            slot: reply.slot,
            attempts: reply.attempts,
        })
    }

    pub async fn create_conversation(&self, title: Option<String>) -> Result<Conversation> {
        let title = title.map(|t| t.trim().to_string()).filter(|t| !t.is_empty());
        let conversation = Conversation::new(title);
        self.repository.create_conversation(&conversation).await?;
        Ok(conversation)
    }

    pub async fn get_conversation_with_messages(&self, conversation_id: &str) -> Result<ConversationWithMessages> {
        let conversation = self
            .repository
            .get_conversation(conversation_id)
            .await?
            .ok_or_else(|| ChatError::ConversationNotFound(conversation_id.to_string()))?;
        let messages = self.repository.get_messages(conversation_id).await?;

        Ok(ConversationWithMessages {
            conversation,
            messages,
        })
    }

    pub async fn list_conversations(&self, limit: i64, offset: i64) -> Result<Vec<Conversation>> {
        self.repository.list_conversations(limit, offset).await
    }

    pub async fn rename_conversation(&self, conversation_id: &str, title: &str) -> Result<Conversation> {
        let title = title.trim();
        if title.is_empty() {
            return Err(crate::error::Error::validation("title must not be empty"));
        }

        self.repository
            .rename_conversation(conversation_id, title)
            .await
            .map_err(|e| not_found_as_chat_error(e, conversation_id))?;

        self.repository
            .get_conversation(conversation_id)
            .await?
            .ok_or_else(|| ChatError::ConversationNotFound(conversation_id.to_string()).into())
    }

    pub async fn delete_conversation(&self, conversation_id: &str) -> Result<()> {
        self.repository
            .delete_conversation(conversation_id)
            .await
            .map_err(|e| not_found_as_chat_error(e, conversation_id))
    }

    pub async fn statistics(&self) -> Result<ConversationStatistics> {
        self.repository.get_statistics().await
    }
}

fn not_found_as_chat_error(error: crate::error::Error, conversation_id: &str) -> crate::error::Error {
    if error.is_not_found() {
        ChatError::ConversationNotFound(conversation_id.to_string()).into()
    } else {
        error
    }
}
