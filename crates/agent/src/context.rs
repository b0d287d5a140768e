use tracing::debug;

use concierge_core::domain::assistant::{Assistant, BusinessId};
use concierge_core::domain::conversation::Conversation;
use concierge_core::domain::customer::{CustomerProfile, Sentiment};
use concierge_core::domain::message::{Message, MessageRole};
use concierge_core::domain::request::ResponseRequest;
use concierge_core::errors::ResponseError;
use concierge_db::{Repositories, RepositoryError};

use crate::conversation::{token_matches, tokenize};

/// Number of latest customer messages scanned for sentiment.
pub const SENTIMENT_WINDOW: usize = 5;

const POSITIVE_TERMS: &[&str] = &[
    "obrigad",
    "ótimo",
    "otimo",
    "excelente",
    "perfeito",
    "adorei",
    "maravilh",
    "parabéns",
    "thank",
    "great",
    "excellent",
    "perfect",
    "awesome",
    "love",
];

const NEGATIVE_TERMS: &[&str] = &[
    "ruim",
    "péssim",
    "pessim",
    "horrível",
    "horrivel",
    "demora",
    "atrasad",
    "problema",
    "reclama",
    "insatisfeit",
    "bad",
    "terrible",
    "awful",
    "late",
    "problem",
    "disappoint",
];

/// Everything the pipeline knows about a request once storage has been consulted.
#[derive(Clone, Debug)]
pub struct ConversationContext {
    pub assistant: Assistant,
    pub conversation: Conversation,
    pub business_id: BusinessId,
    pub customer: CustomerProfile,
    /// Oldest first, at most the configured history limit.
    pub history: Vec<Message>,
}

pub struct ContextAggregator {
    repositories: Repositories,
}

impl ContextAggregator {
    pub fn new(repositories: Repositories) -> Self {
        Self { repositories }
    }

    pub async fn load(
        &self,
        request: &ResponseRequest,
        history_limit: usize,
    ) -> Result<ConversationContext, ResponseError> {
        let assistant = self
            .repositories
            .assistants
            .find_by_id(&request.business_id, &request.assistant_id)
            .await
            .map_err(storage_error)?
            .ok_or_else(|| ResponseError::not_found("assistant", request.assistant_id.as_str()))?;

        let conversation = self
            .repositories
            .conversations
            .find_by_id(&request.business_id, &request.assistant_id, &request.conversation_id)
            .await
            .map_err(storage_error)?
            .ok_or_else(|| {
                ResponseError::not_found("conversation", request.conversation_id.as_str())
            })?;

        let history = self
            .repositories
            .messages
            .recent(&request.conversation_id, history_limit)
            .await
            .map_err(storage_error)?;
        let customer_messages = self
            .repositories
            .messages
            .recent_by_role(&request.conversation_id, MessageRole::Customer, SENTIMENT_WINDOW)
            .await
            .map_err(storage_error)?;
        let previous_interactions = self
            .repositories
            .messages
            .count_by_role(&request.conversation_id, MessageRole::Customer)
            .await
            .map_err(storage_error)?;

        let customer = build_profile(
            request,
            &assistant,
            &conversation,
            &customer_messages,
            previous_interactions,
        );

        debug!(
            event_name = "pipeline.context_loaded",
            conversation_id = %request.conversation_id,
            assistant_id = %request.assistant_id,
            history = history.len(),
            previous_interactions,
            sentiment = customer.sentiment.as_str(),
            "conversation context loaded"
        );

        Ok(ConversationContext {
            assistant,
            conversation,
            business_id: request.business_id.clone(),
            customer,
            history,
        })
    }
}

fn storage_error(error: RepositoryError) -> ResponseError {
    ResponseError::processing(format!("context load failed: {error}"))
}

fn build_profile(
    request: &ResponseRequest,
    assistant: &Assistant,
    conversation: &Conversation,
    customer_messages: &[Message],
    previous_interactions: u64,
) -> CustomerProfile {
    let hints = request.customer.as_ref();
    let non_blank = |value: &Option<String>| value.clone().filter(|v| !v.trim().is_empty());

    let name = hints
        .and_then(|hints| non_blank(&hints.name))
        .or_else(|| non_blank(&conversation.customer_name));
    let phone = hints
        .and_then(|hints| non_blank(&hints.phone))
        .or_else(|| non_blank(&conversation.customer_phone));
    let preferred_language = hints
        .and_then(|hints| non_blank(&hints.language))
        .unwrap_or_else(|| assistant.language.clone());

    let sentiment = if customer_messages.is_empty() {
        hints.and_then(|hints| hints.sentiment).unwrap_or_default()
    } else {
        let texts: Vec<&str> =
            customer_messages.iter().map(|message| message.content.as_str()).collect();
        analyze_sentiment(&texts)
    };

    CustomerProfile { name, phone, previous_interactions, sentiment, preferred_language }
}

/// Keyword occurrence counts decide; ties are neutral.
///
/// Each word counts at most once per polarity, so `problema` is not also a `problem`.
pub fn analyze_sentiment(messages: &[&str]) -> Sentiment {
    let mut positive = 0usize;
    let mut negative = 0usize;
    for token in messages.iter().flat_map(|message| tokenize(message)) {
        let hits = |terms: &[&str]| terms.iter().any(|term| token_matches(&token, term));
        positive += usize::from(hits(POSITIVE_TERMS));
        negative += usize::from(hits(NEGATIVE_TERMS));
    }

    match positive.cmp(&negative) {
        std::cmp::Ordering::Greater => Sentiment::Positive,
        std::cmp::Ordering::Less => Sentiment::Negative,
        std::cmp::Ordering::Equal => Sentiment::Neutral,
    }
}
