use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use concierge_core::domain::assistant::{Assistant, AssistantId, BusinessId};
use concierge_core::domain::conversation::{Conversation, ConversationId};
use concierge_core::domain::message::{Message, MessageRole};

use super::{AssistantRepository, ConversationRepository, MessageRepository, RepositoryError};

#[derive(Default)]
pub struct InMemoryAssistantRepository {
    assistants: RwLock<HashMap<String, Assistant>>,
}

#[async_trait::async_trait]
impl AssistantRepository for InMemoryAssistantRepository {
    async fn find_by_id(
        &self,
        business_id: &BusinessId,
        id: &AssistantId,
    ) -> Result<Option<Assistant>, RepositoryError> {
        let assistants = self.assistants.read().await;
        Ok(assistants.get(&id.0).filter(|assistant| &assistant.business_id == business_id).cloned())
    }

    async fn save(&self, assistant: Assistant) -> Result<(), RepositoryError> {
        let mut assistants = self.assistants.write().await;
        assistants.insert(assistant.id.0.clone(), assistant);
        Ok(())
    }

    async fn record_usage(
        &self,
        id: &AssistantId,
        response_time_ms: u64,
    ) -> Result<(), RepositoryError> {
        let mut assistants = self.assistants.write().await;
        let assistant = assistants
            .get_mut(&id.0)
            .ok_or_else(|| RepositoryError::Missing { resource: "assistant", id: id.0.clone() })?;
        assistant.usage.record(response_time_ms);
        assistant.updated_at = Utc::now();
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryConversationRepository {
    conversations: RwLock<HashMap<String, Conversation>>,
}

#[async_trait::async_trait]
impl ConversationRepository for InMemoryConversationRepository {
    async fn find_by_id(
        &self,
        business_id: &BusinessId,
        assistant_id: &AssistantId,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let conversations = self.conversations.read().await;
        Ok(conversations
            .get(&id.0)
            .filter(|conversation| {
                &conversation.business_id == business_id
                    && &conversation.assistant_id == assistant_id
            })
            .cloned())
    }

    async fn save(&self, conversation: Conversation) -> Result<(), RepositoryError> {
        let mut conversations = self.conversations.write().await;
        conversations.insert(conversation.id.0.clone(), conversation);
        Ok(())
    }

    async fn record_exchange(
        &self,
        id: &ConversationId,
        at: DateTime<Utc>,
        escalated: bool,
    ) -> Result<(), RepositoryError> {
        let mut conversations = self.conversations.write().await;
        let conversation = conversations.get_mut(&id.0).ok_or_else(|| {
            RepositoryError::Missing { resource: "conversation", id: id.0.clone() }
        })?;
        conversation.record_exchange(at, escalated);
        Ok(())
    }
}

/// Messages per conversation, kept in insertion order.
#[derive(Default)]
pub struct InMemoryMessageRepository {
    messages: RwLock<HashMap<String, Vec<Message>>>,
}

#[async_trait::async_trait]
impl MessageRepository for InMemoryMessageRepository {
    async fn recent(
        &self,
        conversation_id: &ConversationId,
        limit: usize,
    ) -> Result<Vec<Message>, RepositoryError> {
        let messages = self.messages.read().await;
        let Some(history) = messages.get(&conversation_id.0) else {
            return Ok(Vec::new());
        };
        let skip = history.len().saturating_sub(limit);
        Ok(history[skip..].to_vec())
    }

    async fn recent_by_role(
        &self,
        conversation_id: &ConversationId,
        role: MessageRole,
        limit: usize,
    ) -> Result<Vec<Message>, RepositoryError> {
        let messages = self.messages.read().await;
        let mut matching: Vec<Message> = messages
            .get(&conversation_id.0)
            .map(|history| {
                history
                    .iter()
                    .rev()
                    .filter(|message| message.role == role)
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        matching.reverse();
        Ok(matching)
    }

    async fn insert(&self, message: Message) -> Result<(), RepositoryError> {
        let mut messages = self.messages.write().await;
        messages.entry(message.conversation_id.0.clone()).or_default().push(message);
        Ok(())
    }

    async fn count_by_role(
        &self,
        conversation_id: &ConversationId,
        role: MessageRole,
    ) -> Result<u64, RepositoryError> {
        let messages = self.messages.read().await;
        Ok(messages
            .get(&conversation_id.0)
            .map(|history| history.iter().filter(|message| message.role == role).count() as u64)
            .unwrap_or(0))
    }
}
