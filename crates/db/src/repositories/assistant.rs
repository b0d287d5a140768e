use sqlx::Row;

use concierge_core::domain::assistant::{Assistant, AssistantId, AssistantUsage, BusinessId};

use super::{format_timestamp, parse_timestamp, AssistantRepository, RepositoryError};
use crate::DbPool;

pub struct SqlAssistantRepository {
    pool: DbPool,
}

impl SqlAssistantRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_assistant(row: &sqlx::sqlite::SqliteRow) -> Result<Assistant, RepositoryError> {
    let decode = |e: sqlx::Error| RepositoryError::Decode(e.to_string());

    let id: String = row.try_get("id").map_err(decode)?;
    let business_id: String = row.try_get("business_id").map_err(decode)?;
    let name: String = row.try_get("name").map_err(decode)?;
    let business_name: String = row.try_get("business_name").map_err(decode)?;
    let system_prompt: String = row.try_get("system_prompt").map_err(decode)?;
    let language: String = row.try_get("language").map_err(decode)?;
    let keywords_json: String = row.try_get("escalation_keywords_json").map_err(decode)?;
    let message_count: i64 = row.try_get("message_count").map_err(decode)?;
    let avg_response_time_ms: f64 = row.try_get("avg_response_time_ms").map_err(decode)?;
    let created_at: String = row.try_get("created_at").map_err(decode)?;
    let updated_at: String = row.try_get("updated_at").map_err(decode)?;

    let escalation_keywords: Vec<String> = serde_json::from_str(&keywords_json)
        .map_err(|e| RepositoryError::Decode(format!("escalation_keywords_json: {e}")))?;

    Ok(Assistant {
        id: AssistantId(id),
        business_id: BusinessId(business_id),
        name,
        business_name,
        system_prompt,
        language,
        escalation_keywords,
        usage: AssistantUsage {
            message_count: message_count.max(0) as u64,
            avg_response_time_ms,
        },
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

#[async_trait::async_trait]
impl AssistantRepository for SqlAssistantRepository {
    async fn find_by_id(
        &self,
        business_id: &BusinessId,
        id: &AssistantId,
    ) -> Result<Option<Assistant>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, business_id, name, business_name, system_prompt, language,
                    escalation_keywords_json, message_count, avg_response_time_ms,
                    created_at, updated_at
             FROM assistants WHERE id = ? AND business_id = ?",
        )
        .bind(&id.0)
        .bind(&business_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_assistant).transpose()
    }

    async fn save(&self, assistant: Assistant) -> Result<(), RepositoryError> {
        let keywords_json = serde_json::to_string(&assistant.escalation_keywords)
            .map_err(|e| RepositoryError::Decode(e.to_string()))?;

        sqlx::query(
            "INSERT INTO assistants (id, business_id, name, business_name, system_prompt, language,
                                     escalation_keywords_json, message_count, avg_response_time_ms,
                                     created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 business_name = excluded.business_name,
                 system_prompt = excluded.system_prompt,
                 language = excluded.language,
                 escalation_keywords_json = excluded.escalation_keywords_json,
                 message_count = excluded.message_count,
                 avg_response_time_ms = excluded.avg_response_time_ms,
                 updated_at = excluded.updated_at",
        )
        .bind(&assistant.id.0)
        .bind(&assistant.business_id.0)
        .bind(&assistant.name)
        .bind(&assistant.business_name)
        .bind(&assistant.system_prompt)
        .bind(&assistant.language)
        .bind(keywords_json)
        .bind(assistant.usage.message_count as i64)
        .bind(assistant.usage.avg_response_time_ms)
        .bind(format_timestamp(assistant.created_at))
        .bind(format_timestamp(assistant.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn record_usage(
        &self,
        id: &AssistantId,
        response_time_ms: u64,
    ) -> Result<(), RepositoryError> {
        // Single statement so concurrent requests cannot lose an update.
        let result = sqlx::query(
            "UPDATE assistants SET
                 avg_response_time_ms =
                     (avg_response_time_ms * message_count + ?) / (message_count + 1),
                 message_count = message_count + 1,
                 updated_at = ?
             WHERE id = ?",
        )
        .bind(response_time_ms as f64)
        .bind(format_timestamp(chrono::Utc::now()))
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::Missing { resource: "assistant", id: id.0.clone() });
        }
        Ok(())
    }
}
