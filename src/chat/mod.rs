pub mod service;
pub mod types;

pub use service::ChatService;
pub use types::{
    ChatError, ChatExchange, Conversation, ConversationWithMessages, NewMessage, StoredMessage,
};
