use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::ResponseError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Greeting,
    Pricing,
    Scheduling,
    OrderStatus,
    Support,
    Complaint,
    Farewell,
    EscalationRequest,
    #[default]
    General,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Greeting => "greeting",
            Self::Pricing => "pricing",
            Self::Scheduling => "scheduling",
            Self::OrderStatus => "order_status",
            Self::Support => "support",
            Self::Complaint => "complaint",
            Self::Farewell => "farewell",
            Self::EscalationRequest => "escalation_request",
            Self::General => "general",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "greeting" => Some(Self::Greeting),
            "pricing" => Some(Self::Pricing),
            "scheduling" => Some(Self::Scheduling),
            "order_status" => Some(Self::OrderStatus),
            "support" => Some(Self::Support),
            "complaint" => Some(Self::Complaint),
            "farewell" => Some(Self::Farewell),
            "escalation_request" => Some(Self::EscalationRequest),
            "general" => Some(Self::General),
            _ => None,
        }
    }
}

/// Where the content of an [`AiResponse`] came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseOrigin {
    Generated,
    Escalation,
    Fallback,
    Filtered,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SourceReference {
    pub source: String,
    pub source_id: String,
    pub score: f64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonetaryAmount {
    pub currency: String,
    pub value: Decimal,
    pub raw: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedEntities {
    pub phones: Vec<String>,
    pub emails: Vec<String>,
    pub amounts: Vec<MonetaryAmount>,
}

impl ExtractedEntities {
    pub fn is_empty(&self) -> bool {
        self.phones.is_empty() && self.emails.is_empty() && self.amounts.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AiResponse {
    pub content: String,
    pub confidence: f64,
    pub sources: Vec<SourceReference>,
    pub processing_time_ms: u64,
    pub should_escalate: bool,
    pub intent: Intent,
    pub entities: ExtractedEntities,
    pub origin: ResponseOrigin,
    pub tokens_used: Option<u32>,
}

/// Stages of one pass through the response pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Received,
    ContextLoaded,
    Escalated,
    Generated,
    PostProcessed,
    Formatted,
    Persisted,
    Done,
    Errored,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::ContextLoaded => "context_loaded",
            Self::Escalated => "escalated",
            Self::Generated => "generated",
            Self::PostProcessed => "post_processed",
            Self::Formatted => "formatted",
            Self::Persisted => "persisted",
            Self::Done => "done",
            Self::Errored => "errored",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Errored)
    }

    pub fn can_advance_to(&self, next: PipelineStage) -> bool {
        use PipelineStage::{
            ContextLoaded, Done, Errored, Escalated, Formatted, Generated, Persisted,
            PostProcessed, Received,
        };

        matches!(
            (self, next),
            (Received, ContextLoaded)
                | (ContextLoaded, Escalated)
                | (ContextLoaded, Generated)
                | (Escalated, PostProcessed)
                | (Generated, PostProcessed)
                | (PostProcessed, Formatted)
                | (Formatted, Persisted)
                | (Persisted, Done)
        ) || (next == Errored && !self.is_terminal())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResultMetadata {
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
    pub fallback_used: bool,
    pub content_filtered: bool,
    pub processing_time_ms: u64,
    pub stages: Vec<PipelineStage>,
}

impl ResultMetadata {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            timestamp: Utc::now(),
            fallback_used: false,
            content_filtered: false,
            processing_time_ms: 0,
            stages: Vec::new(),
        }
    }
}

/// The formatted reply together with the response it was rendered from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponsePayload {
    pub messages: Vec<String>,
    pub response: AiResponse,
}

/// Terminal artifact handed back to callers. Never persisted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResponseResult {
    Success { payload: ResponsePayload, metadata: ResultMetadata },
    Failure { error: ResponseError, metadata: ResultMetadata },
}

impl ResponseResult {
    pub fn success(payload: ResponsePayload, metadata: ResultMetadata) -> Self {
        Self::Success { payload, metadata }
    }

    pub fn failure(error: ResponseError, metadata: ResultMetadata) -> Self {
        Self::Failure { error, metadata }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn metadata(&self) -> &ResultMetadata {
        match self {
            Self::Success { metadata, .. } | Self::Failure { metadata, .. } => metadata,
        }
    }

    pub fn response(&self) -> Option<&AiResponse> {
        match self {
            Self::Success { payload, .. } => Some(&payload.response),
            Self::Failure { .. } => None,
        }
    }

    pub fn messages(&self) -> &[String] {
        match self {
            Self::Success { payload, .. } => &payload.messages,
            Self::Failure { .. } => &[],
        }
    }

    pub fn error(&self) -> Option<&ResponseError> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { error, .. } => Some(error),
        }
    }
}
