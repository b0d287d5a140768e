use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

string_id!(AssistantId);
string_id!(BusinessId);

pub const DEFAULT_LANGUAGE: &str = "pt-BR";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Assistant {
    pub id: AssistantId,
    pub business_id: BusinessId,
    pub name: String,
    pub business_name: String,
    pub system_prompt: String,
    pub language: String,
    pub escalation_keywords: Vec<String>,
    pub usage: AssistantUsage,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Assistant {
    pub fn new(
        id: AssistantId,
        business_id: BusinessId,
        name: impl Into<String>,
        business_name: impl Into<String>,
        system_prompt: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            business_id,
            name: name.into(),
            business_name: business_name.into(),
            system_prompt: system_prompt.into(),
            language: DEFAULT_LANGUAGE.to_string(),
            escalation_keywords: Vec::new(),
            usage: AssistantUsage::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_escalation_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.escalation_keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }
}

/// Usage counters kept on the assistant record.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AssistantUsage {
    pub message_count: u64,
    pub avg_response_time_ms: f64,
}

impl AssistantUsage {
    /// Folds one handled response into the counters, keeping a running mean.
    pub fn record(&mut self, response_time_ms: u64) {
        let previous_total = self.avg_response_time_ms * self.message_count as f64;
        self.message_count += 1;
        self.avg_response_time_ms =
            (previous_total + response_time_ms as f64) / self.message_count as f64;
    }
}
