//! Response orchestration for conversational assistants
//!
//! Turns one inbound customer message into a single, quality-checked reply:
//!
//! 1. **Deduplication** (`dedup`) - identical in-flight messages share one pipeline run
//! 2. **Time budget** (`timeout`) - the pipeline is cancelled when the budget elapses
//! 3. **Context** (`context`) - assistant, conversation, history and customer profile
//! 4. **Escalation** (`escalation`) - hand-off decided before any model call
//! 5. **Generation** (`retrieval`, `prompt`, `llm`) - knowledge lookup and completion
//! 6. **Post-processing** (`postprocess`, `guardrails`, `confidence`) - filter, fact-check,
//!    personalize, threshold
//! 7. **Formatting and persistence** - via the channel formatter and repositories
//!
//! `ResponseOrchestrator` in `runtime` is the only entry point callers need.
//!
//! # Failure policy
//!
//! Validation and missing records fail the request. Retrieval and generation failures
//! degrade to a fallback reply that escalates. Persistence failures are logged only.
//! Nothing panics or errors past `generate_response`.

pub mod confidence;
pub mod context;
pub mod conversation;
pub mod dedup;
pub mod escalation;
pub mod guardrails;
pub mod llm;
pub mod postprocess;
pub mod prompt;
pub mod replies;
pub mod retrieval;
pub mod runtime;
pub mod stats;
pub mod timeout;

pub use runtime::{OrchestratorSettings, ResponseOrchestrator};
pub use stats::StatsSnapshot;
