//! Deterministic demo data for local runs and integration tests.
//!
//! Seeds one bakery assistant with two open conversations. Loading is idempotent: the
//! assistant and conversation rows are upserted, and usage counters are reset.

use concierge_core::domain::assistant::{Assistant, AssistantId, BusinessId};
use concierge_core::domain::conversation::{Conversation, ConversationId};

use crate::repositories::{Repositories, RepositoryError};

pub const DEMO_BUSINESS_ID: &str = "biz-padaria-central";
pub const DEMO_ASSISTANT_ID: &str = "asst-luna";
pub const DEMO_CONVERSATION_IDS: &[&str] = &["conv-demo-pt", "conv-demo-en"];

const DEMO_SYSTEM_PROMPT: &str = "Você é a Luna, atendente virtual da Padaria Central. \
Responda com simpatia e objetividade sobre produtos, horários, encomendas e entregas.";

const DEMO_ESCALATION_KEYWORDS: &[&str] = &["gerente", "falar com humano", "atendente humano"];

pub struct DemoSeedDataset;

impl DemoSeedDataset {
    pub fn assistant() -> Assistant {
        Assistant::new(
            AssistantId::new(DEMO_ASSISTANT_ID),
            BusinessId::new(DEMO_BUSINESS_ID),
            "Luna",
            "Padaria Central",
            DEMO_SYSTEM_PROMPT,
        )
        .with_escalation_keywords(DEMO_ESCALATION_KEYWORDS.iter().copied())
    }

    pub fn conversations() -> Vec<Conversation> {
        DEMO_CONVERSATION_IDS
            .iter()
            .map(|id| {
                let mut conversation = Conversation::new(
                    ConversationId::new(*id),
                    AssistantId::new(DEMO_ASSISTANT_ID),
                    BusinessId::new(DEMO_BUSINESS_ID),
                );
                if id.ends_with("-en") {
                    conversation.customer_name = Some("Alex".to_string());
                } else {
                    conversation.customer_name = Some("Maria".to_string());
                    conversation.customer_phone = Some("+55 11 98765-4321".to_string());
                }
                conversation
            })
            .collect()
    }

    pub async fn load(repositories: &Repositories) -> Result<SeedResult, RepositoryError> {
        repositories.assistants.save(Self::assistant()).await?;

        let mut conversations_seeded = Vec::new();
        for conversation in Self::conversations() {
            conversations_seeded.push(conversation.id.0.clone());
            repositories.conversations.save(conversation).await?;
        }

        Ok(SeedResult {
            business_id: DEMO_BUSINESS_ID,
            assistant_id: DEMO_ASSISTANT_ID,
            conversations_seeded,
        })
    }

    pub async fn verify(repositories: &Repositories) -> Result<VerificationResult, RepositoryError> {
        let business_id = BusinessId::new(DEMO_BUSINESS_ID);
        let assistant_id = AssistantId::new(DEMO_ASSISTANT_ID);
        let mut checks = Vec::new();

        let assistant = repositories.assistants.find_by_id(&business_id, &assistant_id).await?;
        checks.push(("assistant", assistant.is_some()));
        checks.push((
            "assistant-escalation-keywords",
            assistant
                .map(|assistant| assistant.escalation_keywords.len() == DEMO_ESCALATION_KEYWORDS.len())
                .unwrap_or(false),
        ));

        for id in DEMO_CONVERSATION_IDS {
            let conversation = repositories
                .conversations
                .find_by_id(&business_id, &assistant_id, &ConversationId::new(*id))
                .await?;
            checks.push((*id, conversation.is_some()));
        }

        let all_present = checks.iter().all(|(_, exists)| *exists);
        Ok(VerificationResult { all_present, checks })
    }
}

#[derive(Debug)]
pub struct SeedResult {
    pub business_id: &'static str,
    pub assistant_id: &'static str,
    pub conversations_seeded: Vec<String>,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}
