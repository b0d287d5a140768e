use chrono::{DateTime, Utc};
use sqlx::Row;

use concierge_core::domain::assistant::{AssistantId, BusinessId};
use concierge_core::domain::conversation::{Conversation, ConversationId, ConversationStatus};

use super::{format_timestamp, parse_timestamp, ConversationRepository, RepositoryError};
use crate::DbPool;

pub struct SqlConversationRepository {
    pool: DbPool,
}

impl SqlConversationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_conversation(row: &sqlx::sqlite::SqliteRow) -> Result<Conversation, RepositoryError> {
    let decode = |e: sqlx::Error| RepositoryError::Decode(e.to_string());

    let id: String = row.try_get("id").map_err(decode)?;
    let assistant_id: String = row.try_get("assistant_id").map_err(decode)?;
    let business_id: String = row.try_get("business_id").map_err(decode)?;
    let customer_name: Option<String> = row.try_get("customer_name").map_err(decode)?;
    let customer_phone: Option<String> = row.try_get("customer_phone").map_err(decode)?;
    let status: String = row.try_get("status").map_err(decode)?;
    let message_count: i64 = row.try_get("message_count").map_err(decode)?;
    let last_message_at: Option<String> = row.try_get("last_message_at").map_err(decode)?;
    let created_at: String = row.try_get("created_at").map_err(decode)?;

    let status = ConversationStatus::parse(&status)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown conversation status `{status}`")))?;

    Ok(Conversation {
        id: ConversationId(id),
        assistant_id: AssistantId(assistant_id),
        business_id: BusinessId(business_id),
        customer_name,
        customer_phone,
        status,
        message_count: message_count.max(0) as u64,
        last_message_at: last_message_at.as_deref().map(parse_timestamp).transpose()?,
        created_at: parse_timestamp(&created_at)?,
    })
}

#[async_trait::async_trait]
impl ConversationRepository for SqlConversationRepository {
    async fn find_by_id(
        &self,
        business_id: &BusinessId,
        assistant_id: &AssistantId,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, assistant_id, business_id, customer_name, customer_phone, status,
                    message_count, last_message_at, created_at
             FROM conversations
             WHERE id = ? AND business_id = ? AND assistant_id = ?",
        )
        .bind(&id.0)
        .bind(&business_id.0)
        .bind(&assistant_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_conversation).transpose()
    }

    async fn save(&self, conversation: Conversation) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO conversations (id, assistant_id, business_id, customer_name,
                                        customer_phone, status, message_count,
                                        last_message_at, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 customer_name = excluded.customer_name,
                 customer_phone = excluded.customer_phone,
                 status = excluded.status,
                 message_count = excluded.message_count,
                 last_message_at = excluded.last_message_at",
        )
        .bind(&conversation.id.0)
        .bind(&conversation.assistant_id.0)
        .bind(&conversation.business_id.0)
        .bind(&conversation.customer_name)
        .bind(&conversation.customer_phone)
        .bind(conversation.status.as_str())
        .bind(conversation.message_count as i64)
        .bind(conversation.last_message_at.map(format_timestamp))
        .bind(format_timestamp(conversation.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn record_exchange(
        &self,
        id: &ConversationId,
        at: DateTime<Utc>,
        escalated: bool,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE conversations SET
                 message_count = message_count + 2,
                 last_message_at = ?,
                 status = CASE WHEN ? AND status = 'active' THEN 'escalated' ELSE status END
             WHERE id = ?",
        )
        .bind(format_timestamp(at))
        .bind(escalated)
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::Missing { resource: "conversation", id: id.0.clone() });
        }
        Ok(())
    }
}
