pub mod config;
pub mod domain;
pub mod errors;

pub use config::{AppConfig, ConfigError, LlmProvider, LoadOptions, LogFormat};
pub use domain::assistant::{Assistant, AssistantId, AssistantUsage, BusinessId};
pub use domain::conversation::{Conversation, ConversationId, ConversationStatus};
pub use domain::customer::{CustomerMetadata, CustomerProfile, Sentiment};
pub use domain::message::{Message, MessageId, MessageMetadata, MessageRole};
pub use domain::request::{ProcessingOptions, ResponseRequest, MAX_MESSAGE_CHARS};
pub use domain::response::{
    AiResponse, ExtractedEntities, Intent, MonetaryAmount, PipelineStage, ResponseOrigin,
    ResponsePayload, ResponseResult, ResultMetadata, SourceReference,
};
pub use errors::{ResponseError, ValidationError};
