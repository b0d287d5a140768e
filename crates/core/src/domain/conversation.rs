use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::assistant::{AssistantId, BusinessId};

string_id!(ConversationId);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Active,
    Escalated,
    Closed,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Escalated => "escalated",
            Self::Closed => "closed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "active" => Some(Self::Active),
            "escalated" => Some(Self::Escalated),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub assistant_id: AssistantId,
    pub business_id: BusinessId,
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
    pub status: ConversationStatus,
    pub message_count: u64,
    pub last_message_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(id: ConversationId, assistant_id: AssistantId, business_id: BusinessId) -> Self {
        Self {
            id,
            assistant_id,
            business_id,
            customer_name: None,
            customer_phone: None,
            status: ConversationStatus::Active,
            message_count: 0,
            last_message_at: None,
            created_at: Utc::now(),
        }
    }

    /// Accounts for one customer message plus one assistant reply.
    pub fn record_exchange(&mut self, at: DateTime<Utc>, escalated: bool) {
        self.message_count += 2;
        self.last_message_at = Some(at);
        if escalated && self.status == ConversationStatus::Active {
            self.status = ConversationStatus::Escalated;
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{Conversation, ConversationId, ConversationStatus};
    use crate::domain::assistant::{AssistantId, BusinessId};

    fn conversation() -> Conversation {
        Conversation::new(
            ConversationId::new("c1"),
            AssistantId::new("a1"),
            BusinessId::new("b1"),
        )
    }

    #[test]
    fn status_round_trips_from_storage_encoding() {
        for status in
            [ConversationStatus::Active, ConversationStatus::Escalated, ConversationStatus::Closed]
        {
            assert_eq!(ConversationStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn escalated_exchange_marks_conversation() {
        let mut conversation = conversation();
        conversation.record_exchange(Utc::now(), true);

        assert_eq!(conversation.status, ConversationStatus::Escalated);
        assert_eq!(conversation.message_count, 2);
        assert!(conversation.last_message_at.is_some());
    }

    #[test]
    fn closed_conversation_is_not_reopened_by_escalation() {
        let mut conversation = conversation();
        conversation.status = ConversationStatus::Closed;
        conversation.record_exchange(Utc::now(), true);

        assert_eq!(conversation.status, ConversationStatus::Closed);
    }
}
