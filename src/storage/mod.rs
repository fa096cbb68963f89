// Storage layer for persistent data

pub mod conversations;
pub mod database;

pub use conversations::{ConversationRepository, ConversationStatistics};
pub use database::Database;
