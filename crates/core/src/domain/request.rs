use serde::{Deserialize, Serialize};

use crate::domain::assistant::{AssistantId, BusinessId};
use crate::domain::conversation::ConversationId;
use crate::domain::customer::CustomerMetadata;
use crate::errors::ValidationError;

/// Hard upper bound on inbound message size, in characters.
pub const MAX_MESSAGE_CHARS: usize = 4000;

/// Per-request overrides of pipeline settings.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingOptions {
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub confidence_threshold: Option<f64>,
    #[serde(default)]
    pub retrieval_limit: Option<usize>,
    #[serde(default)]
    pub retrieval_min_score: Option<f64>,
    #[serde(default)]
    pub personalize: Option<bool>,
}

/// One inbound customer message addressed to an assistant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponseRequest {
    pub message: String,
    pub conversation_id: ConversationId,
    pub assistant_id: AssistantId,
    pub business_id: BusinessId,
    #[serde(default)]
    pub customer: Option<CustomerMetadata>,
    #[serde(default)]
    pub options: Option<ProcessingOptions>,
}

impl ResponseRequest {
    pub fn new(
        message: impl Into<String>,
        conversation_id: ConversationId,
        assistant_id: AssistantId,
        business_id: BusinessId,
    ) -> Self {
        Self {
            message: message.into(),
            conversation_id,
            assistant_id,
            business_id,
            customer: None,
            options: None,
        }
    }

    pub fn with_customer(mut self, customer: CustomerMetadata) -> Self {
        self.customer = Some(customer);
        self
    }

    pub fn with_options(mut self, options: ProcessingOptions) -> Self {
        self.options = Some(options);
        self
    }

    pub fn options(&self) -> ProcessingOptions {
        self.options.clone().unwrap_or_default()
    }

    /// Rejects malformed requests before any I/O happens.
    ///
    /// `max_chars` may tighten the limit but never raises it above [`MAX_MESSAGE_CHARS`].
    pub fn validate(&self, max_chars: usize) -> Result<(), ValidationError> {
        if self.message.trim().is_empty() {
            return Err(ValidationError::EmptyMessage);
        }

        let limit = max_chars.min(MAX_MESSAGE_CHARS);
        let length = self.message.chars().count();
        if length > limit {
            return Err(ValidationError::MessageTooLong { length, limit });
        }

        if self.conversation_id.as_str().trim().is_empty() {
            return Err(ValidationError::MissingField("conversation_id"));
        }
        if self.assistant_id.as_str().trim().is_empty() {
            return Err(ValidationError::MissingField("assistant_id"));
        }
        if self.business_id.as_str().trim().is_empty() {
            return Err(ValidationError::MissingField("business_id"));
        }

        if let Some(options) = &self.options {
            if let Some(threshold) = options.confidence_threshold {
                if !(0.0..=1.0).contains(&threshold) {
                    return Err(ValidationError::InvalidOption(format!(
                        "confidence_threshold must be within 0..=1, got {threshold}"
                    )));
                }
            }
            if let Some(min_score) = options.retrieval_min_score {
                if !(0.0..=1.0).contains(&min_score) {
                    return Err(ValidationError::InvalidOption(format!(
                        "retrieval_min_score must be within 0..=1, got {min_score}"
                    )));
                }
            }
            if options.timeout_ms == Some(0) {
                return Err(ValidationError::InvalidOption(
                    "timeout_ms must be greater than zero".to_string(),
                ));
            }
        }

        Ok(())
    }
}
