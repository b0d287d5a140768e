use sqlx::Row;

use concierge_core::domain::conversation::ConversationId;
use concierge_core::domain::message::{Message, MessageId, MessageMetadata, MessageRole};

use super::{format_timestamp, parse_timestamp, MessageRepository, RepositoryError};
use crate::DbPool;

pub struct SqlMessageRepository {
    pool: DbPool,
}

impl SqlMessageRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> Result<Message, RepositoryError> {
    let decode = |e: sqlx::Error| RepositoryError::Decode(e.to_string());

    let id: String = row.try_get("id").map_err(decode)?;
    let conversation_id: String = row.try_get("conversation_id").map_err(decode)?;
    let role: String = row.try_get("role").map_err(decode)?;
    let content: String = row.try_get("content").map_err(decode)?;
    let confidence: Option<f64> = row.try_get("confidence").map_err(decode)?;
    let intent: Option<String> = row.try_get("intent").map_err(decode)?;
    let metadata_json: String = row.try_get("metadata_json").map_err(decode)?;
    let created_at: String = row.try_get("created_at").map_err(decode)?;

    let role = MessageRole::parse(&role)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown message role `{role}`")))?;
    let metadata: MessageMetadata = serde_json::from_str(&metadata_json)
        .map_err(|e| RepositoryError::Decode(format!("metadata_json: {e}")))?;

    Ok(Message {
        id: MessageId(id),
        conversation_id: ConversationId(conversation_id),
        role,
        content,
        confidence,
        intent,
        metadata,
        created_at: parse_timestamp(&created_at)?,
    })
}

#[async_trait::async_trait]
impl MessageRepository for SqlMessageRepository {
    async fn recent(
        &self,
        conversation_id: &ConversationId,
        limit: usize,
    ) -> Result<Vec<Message>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, conversation_id, role, content, confidence, intent, metadata_json,
                    created_at
             FROM messages
             WHERE conversation_id = ?
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?",
        )
        .bind(&conversation_id.0)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut messages = rows.iter().map(row_to_message).collect::<Result<Vec<_>, _>>()?;
        messages.reverse();
        Ok(messages)
    }

    async fn recent_by_role(
        &self,
        conversation_id: &ConversationId,
        role: MessageRole,
        limit: usize,
    ) -> Result<Vec<Message>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, conversation_id, role, content, confidence, intent, metadata_json,
                    created_at
             FROM messages
             WHERE conversation_id = ? AND role = ?
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?",
        )
        .bind(&conversation_id.0)
        .bind(role.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut messages = rows.iter().map(row_to_message).collect::<Result<Vec<_>, _>>()?;
        messages.reverse();
        Ok(messages)
    }

    async fn insert(&self, message: Message) -> Result<(), RepositoryError> {
        let metadata_json = serde_json::to_string(&message.metadata)
            .map_err(|e| RepositoryError::Decode(e.to_string()))?;

        sqlx::query(
            "INSERT INTO messages (id, conversation_id, role, content, confidence, intent,
                                   metadata_json, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&message.id.0)
        .bind(&message.conversation_id.0)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(message.confidence)
        .bind(&message.intent)
        .bind(metadata_json)
        .bind(format_timestamp(message.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn count_by_role(
        &self,
        conversation_id: &ConversationId,
        role: MessageRole,
    ) -> Result<u64, RepositoryError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(1) FROM messages WHERE conversation_id = ? AND role = ?",
        )
        .bind(&conversation_id.0)
        .bind(role.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(count.max(0) as u64)
    }
}
