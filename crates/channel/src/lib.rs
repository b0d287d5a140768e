//! Chat channel formatting
//!
//! Turns a finished [`AiResponse`] into the ordered text chunks the delivery layer sends.
//!
//! - **Formatter trait** (`ResponseFormatter`) - the seam the orchestrator calls
//! - **WhatsApp** (`whatsapp`) - markdown normalisation and size-bounded chunking
//!
//! Delivery itself (webhooks, retries, templates) lives outside this crate.

use async_trait::async_trait;
use thiserror::Error;

use concierge_core::domain::response::AiResponse;

pub mod whatsapp;

pub use whatsapp::WhatsAppFormatter;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormatError {
    #[error("response content is empty after formatting")]
    EmptyContent,
    #[error("invalid chunk limit {0}")]
    InvalidLimit(usize),
}

#[async_trait]
pub trait ResponseFormatter: Send + Sync {
    /// Renders a response into channel-ready chunks, in delivery order.
    async fn format(&self, response: &AiResponse) -> Result<Vec<String>, FormatError>;
}

/// Sends the content through untouched as a single chunk.
#[derive(Clone, Debug, Default)]
pub struct PlainTextFormatter;

#[async_trait]
impl ResponseFormatter for PlainTextFormatter {
    async fn format(&self, response: &AiResponse) -> Result<Vec<String>, FormatError> {
        let content = response.content.trim();
        if content.is_empty() {
            return Err(FormatError::EmptyContent);
        }
        Ok(vec![content.to_string()])
    }
}
