use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::collections::HashMap;
use tracing::{debug, info};

use crate::chat::types::{Conversation, StoredMessage};
use crate::error::{Error, Result};
use crate::models::MessageRole;

const MESSAGE_COLUMNS: &str =
    "id, conversation_id, role, content, attachment_url, provider, created_at, seq";

/// Repository for managing conversations and messages in the database
#[derive(Clone)]
pub struct ConversationRepository {
    pool: SqlitePool,
}

impl ConversationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create_conversation(&self, conversation: &Conversation) -> Result<()> {
        debug!("Creating conversation in database: {}", conversation.id);

        sqlx::query(
            "INSERT INTO conversations (id, title, created_at, updated_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&conversation.id)
        .bind(&conversation.title)
        .bind(conversation.created_at.timestamp_millis())
        .bind(conversation.updated_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        info!("Created conversation: {}", conversation.id);
        Ok(())
    }

    pub async fn get_conversation(&self, conversation_id: &str) -> Result<Option<Conversation>> {
        let row = sqlx::query(
            "SELECT id, title, created_at, updated_at FROM conversations WHERE id = ?",
        )
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(conversation_from_row).transpose()
    }

    /// Most recently updated first.
    pub async fn list_conversations(&self, limit: i64, offset: i64) -> Result<Vec<Conversation>> {
        debug!("Listing conversations with limit: {}, offset: {}", limit, offset);

        let rows = sqlx::query(
            r#"
            SELECT id, title, created_at, updated_at
            FROM conversations
            ORDER BY updated_at DESC, rowid DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(conversation_from_row).collect()
    }

    pub async fn rename_conversation(&self, conversation_id: &str, title: &str) -> Result<()> {
        debug!("Renaming conversation {} -> {}", conversation_id, title);

        let rows_affected =
            sqlx::query("UPDATE conversations SET title = ?, updated_at = ? WHERE id = ?")
                .bind(title)
                .bind(Utc::now().timestamp_millis())
                .bind(conversation_id)
                .execute(&self.pool)
                .await?
                .rows_affected();

        if rows_affected == 0 {
            return Err(Error::Database(sqlx::Error::RowNotFound));
        }
        Ok(())
    }

    /// Delete a conversation and all its messages
    pub async fn delete_conversation(&self, conversation_id: &str) -> Result<()> {
        debug!("Deleting conversation: {}", conversation_id);

        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM messages WHERE conversation_id = ?")
            .bind(conversation_id)
            .execute(&mut *tx)
            .await?;

        let rows_affected = sqlx::query("DELETE FROM conversations WHERE id = ?")
            .bind(conversation_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if rows_affected == 0 {
            tx.rollback().await?;
            return Err(Error::Database(sqlx::Error::RowNotFound));
        }

        tx.commit().await?;
        info!("Deleted conversation: {}", conversation_id);
        Ok(())
    }

    /// All messages of a conversation in order.
    pub async fn get_messages(&self, conversation_id: &str) -> Result<Vec<StoredMessage>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM messages WHERE conversation_id = ? ORDER BY seq ASC",
            MESSAGE_COLUMNS
        ))
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(message_from_row).collect()
    }

    /// The last `limit` messages, oldest first.
    pub async fn recent_messages(&self, conversation_id: &str, limit: u32) -> Result<Vec<StoredMessage>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM messages WHERE conversation_id = ? ORDER BY seq DESC LIMIT ?",
            MESSAGE_COLUMNS
        ))
        .bind(conversation_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        let mut messages = rows
            .iter()
            .map(message_from_row)
            .collect::<Result<Vec<_>>>()?;
        messages.reverse();
        Ok(messages)
    }

    /// Stores a user message and its reply in one transaction and bumps the
    /// conversation's `updated_at`. `auto_title` only applies when the
    /// conversation has no title yet.
    pub async fn append_exchange(
        &self,
        mut user: StoredMessage,
        mut assistant: StoredMessage,
        auto_title: Option<&str>,
    ) -> Result<(StoredMessage, StoredMessage)> {
        let conversation_id = user.conversation_id.clone();
        let mut tx = self.pool.begin().await?;

        let rows_affected = sqlx::query(
            "UPDATE conversations SET updated_at = ?, title = COALESCE(title, ?) WHERE id = ?",
        )
        .bind(assistant.created_at.timestamp_millis())
        .bind(auto_title)
        .bind(&conversation_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            tx.rollback().await?;
            return Err(Error::Database(sqlx::Error::RowNotFound));
        }

        let last_seq: i64 =
            sqlx::query_scalar("SELECT COALESCE(MAX(seq), 0) FROM messages WHERE conversation_id = ?")
                .bind(&conversation_id)
                .fetch_one(&mut *tx)
                .await?;

        user.seq = last_seq + 1;
        assistant.seq = last_seq + 2;
        insert_message(&mut *tx, &user).await?;
        insert_message(&mut *tx, &assistant).await?;

        tx.commit().await?;
        debug!(
            "Stored exchange in {} (seq {}..={})",
            conversation_id, user.seq, assistant.seq
        );
        Ok((user, assistant))
    }

    pub async fn get_statistics(&self) -> Result<ConversationStatistics> {
        let total_conversations: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM conversations")
            .fetch_one(&self.pool)
            .await?;

        let total_messages: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages")
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query(
            "SELECT provider, COUNT(*) AS replies FROM messages WHERE provider IS NOT NULL GROUP BY provider",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut replies_by_provider = HashMap::new();
        for row in rows {
            let provider: String = row.try_get("provider")?;
            let replies: i64 = row.try_get("replies")?;
            replies_by_provider.insert(provider, replies as u64);
        }

        Ok(ConversationStatistics {
            total_conversations: total_conversations as u64,
            total_messages: total_messages as u64,
            replies_by_provider,
        })
    }
}

/// Statistics about conversations
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConversationStatistics {
    pub total_conversations: u64,
    pub total_messages: u64,
    pub replies_by_provider: HashMap<String, u64>,
}

async fn insert_message(conn: &mut SqliteConnection, message: &StoredMessage) -> Result<()> {
    sqlx::query(&format!(
        "INSERT INTO messages ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        MESSAGE_COLUMNS
    ))
    .bind(&message.id)
    .bind(&message.conversation_id)
    .bind(message.role.as_str())
    .bind(&message.content)
    .bind(&message.attachment_url)
    .bind(&message.provider)
    .bind(message.created_at.timestamp_millis())
    .bind(message.seq)
    .execute(conn)
    .await?;
    Ok(())
}

fn timestamp(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| {
        Error::Database(sqlx::Error::Decode(
            format!("invalid timestamp: {}", millis).into(),
        ))
    })
}

fn conversation_from_row(row: &SqliteRow) -> Result<Conversation> {
    Ok(Conversation {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        created_at: timestamp(row.try_get("created_at")?)?,
        updated_at: timestamp(row.try_get("updated_at")?)?,
    })
}

fn message_from_row(row: &SqliteRow) -> Result<StoredMessage> {
    let role: String = row.try_get("role")?;
    let role = MessageRole::parse(&role).ok_or_else(|| {
        Error::Database(sqlx::Error::Decode(format!("unknown role: {}", role).into()))
    })?;

    Ok(StoredMessage {
        id: row.try_get("id")?,
        conversation_id: row.try_get("conversation_id")?,
        role,
        content: row.try_get("content")?,
        attachment_url: row.try_get("attachment_url")?,
        provider: row.try_get("provider")?,
        created_at: timestamp(row.try_get("created_at")?)?,
        seq: row.try_get("seq")?,
    })
}
