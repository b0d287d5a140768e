use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

use concierge_core::domain::assistant::{Assistant, AssistantId, BusinessId};
use concierge_core::domain::conversation::{Conversation, ConversationId};
use concierge_core::domain::message::{Message, MessageRole};

use crate::DbPool;

pub mod assistant;
pub mod conversation;
pub mod memory;
pub mod message;

pub use assistant::SqlAssistantRepository;
pub use conversation::SqlConversationRepository;
pub use memory::{
    InMemoryAssistantRepository, InMemoryConversationRepository, InMemoryMessageRepository,
};
pub use message::SqlMessageRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("{resource} `{id}` does not exist")]
    Missing { resource: &'static str, id: String },
}

/// Assistant lookups are always scoped to the owning business.
#[async_trait]
pub trait AssistantRepository: Send + Sync {
    async fn find_by_id(
        &self,
        business_id: &BusinessId,
        id: &AssistantId,
    ) -> Result<Option<Assistant>, RepositoryError>;

    async fn save(&self, assistant: Assistant) -> Result<(), RepositoryError>;

    /// Folds one handled response into the usage counters.
    async fn record_usage(
        &self,
        id: &AssistantId,
        response_time_ms: u64,
    ) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn find_by_id(
        &self,
        business_id: &BusinessId,
        assistant_id: &AssistantId,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, RepositoryError>;

    async fn save(&self, conversation: Conversation) -> Result<(), RepositoryError>;

    async fn record_exchange(
        &self,
        id: &ConversationId,
        at: DateTime<Utc>,
        escalated: bool,
    ) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Returns up to `limit` of the latest messages, oldest first.
    async fn recent(
        &self,
        conversation_id: &ConversationId,
        limit: usize,
    ) -> Result<Vec<Message>, RepositoryError>;

    /// Like [`MessageRepository::recent`], restricted to one author role.
    async fn recent_by_role(
        &self,
        conversation_id: &ConversationId,
        role: MessageRole,
        limit: usize,
    ) -> Result<Vec<Message>, RepositoryError>;

    async fn insert(&self, message: Message) -> Result<(), RepositoryError>;

    async fn count_by_role(
        &self,
        conversation_id: &ConversationId,
        role: MessageRole,
    ) -> Result<u64, RepositoryError>;
}

/// The storage collaborator handed to the orchestrator.
#[derive(Clone)]
pub struct Repositories {
    pub assistants: Arc<dyn AssistantRepository>,
    pub conversations: Arc<dyn ConversationRepository>,
    pub messages: Arc<dyn MessageRepository>,
}

impl Repositories {
    pub fn in_memory() -> Self {
        Self {
            assistants: Arc::new(InMemoryAssistantRepository::default()),
            conversations: Arc::new(InMemoryConversationRepository::default()),
            messages: Arc::new(InMemoryMessageRepository::default()),
        }
    }

    pub fn sql(pool: DbPool) -> Self {
        Self {
            assistants: Arc::new(SqlAssistantRepository::new(pool.clone())),
            conversations: Arc::new(SqlConversationRepository::new(pool.clone())),
            messages: Arc::new(SqlMessageRepository::new(pool)),
        }
    }
}

/// Fixed-width UTC encoding so stored timestamps sort lexicographically.
pub(crate) fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("invalid timestamp `{value}`: {error}")))
}
