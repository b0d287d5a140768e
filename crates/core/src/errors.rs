use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("message must not be empty")]
    EmptyMessage,
    #[error("message has {length} characters, limit is {limit}")]
    MessageTooLong { length: usize, limit: usize },
    #[error("required field `{0}` is missing")]
    MissingField(&'static str),
    #[error("invalid processing option: {0}")]
    InvalidOption(String),
}

/// Typed failure carried by a failed `ResponseResult`.
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResponseError {
    #[error("invalid request: {message}")]
    Validation { message: String },
    #[error("{resource} `{id}` was not found")]
    NotFound { resource: String, id: String },
    #[error("response budget of {budget_ms}ms exceeded")]
    Timeout { budget_ms: u64 },
    #[error("processing failure: {message}")]
    Processing { message: String },
    #[error("unexpected failure: {message}")]
    Unknown { message: String },
}

impl ResponseError {
    pub fn not_found(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound { resource: resource.into(), id: id.into() }
    }

    pub fn processing(message: impl Into<String>) -> Self {
        Self::Processing { message: message.into() }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::NotFound { .. } => "not_found",
            Self::Timeout { .. } => "timeout",
            Self::Processing { .. } => "processing",
            Self::Unknown { .. } => "unknown",
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Validation { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::NotFound { .. } => "The assistant or conversation could not be found.",
            Self::Timeout { .. } => "The response took too long. Please retry shortly.",
            Self::Processing { .. } | Self::Unknown { .. } => {
                "An unexpected internal error occurred."
            }
        }
    }
}

impl From<ValidationError> for ResponseError {
    fn from(value: ValidationError) -> Self {
        Self::Validation { message: value.to_string() }
    }
}
