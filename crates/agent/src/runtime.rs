use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::FutureExt;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use concierge_channel::ResponseFormatter;
use concierge_core::config::AppConfig;
use concierge_core::domain::message::{Message, MessageMetadata};
use concierge_core::domain::request::{ProcessingOptions, ResponseRequest};
use concierge_core::domain::response::{
    AiResponse, Intent, PipelineStage, ResponseOrigin, ResponsePayload, ResponseResult,
    ResultMetadata,
};
use concierge_core::errors::ResponseError;
use concierge_db::Repositories;

use crate::confidence::ConfidenceScorer;
use crate::context::{ContextAggregator, ConversationContext};
use crate::conversation::{IntentExtractor, MessageAnalysis};
use crate::dedup::{DedupKey, RequestDeduplicator};
use crate::escalation::EscalationClassifier;
use crate::llm::{GenerationRequest, LlmClient, LlmError};
use crate::postprocess::{PostProcessSettings, ResponsePostProcessor};
use crate::prompt::{build_context_text, build_system_prompt, history_turns};
use crate::replies::ReplyLanguage;
use crate::retrieval::{RetrievalError, Retriever};
use crate::stats::{PipelineStats, StatsSnapshot};
use crate::timeout::TimeoutGuard;

pub const ESCALATION_CONFIDENCE: f64 = 0.9;
pub const FALLBACK_CONFIDENCE: f64 = 0.3;

/// Pipeline knobs, resolved from configuration and overridable per request.
#[derive(Clone, Debug, PartialEq)]
pub struct OrchestratorSettings {
    pub timeout_ms: u64,
    pub confidence_threshold: f64,
    pub retrieval_limit: usize,
    pub retrieval_min_score: f64,
    pub history_limit: usize,
    pub max_message_chars: usize,
    pub personalize: bool,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl OrchestratorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            timeout_ms: config.pipeline.timeout_ms,
            confidence_threshold: config.pipeline.confidence_threshold,
            retrieval_limit: config.pipeline.retrieval_limit,
            retrieval_min_score: config.pipeline.retrieval_min_score,
            history_limit: config.pipeline.history_limit,
            max_message_chars: config.pipeline.max_message_chars,
            personalize: config.pipeline.personalize,
            temperature: config.llm.temperature,
            max_tokens: config.llm.max_tokens,
        }
    }

    /// Applies per-request overrides on top of the configured values.
    pub fn with_overrides(&self, options: &ProcessingOptions) -> Self {
        Self {
            timeout_ms: options.timeout_ms.unwrap_or(self.timeout_ms),
            confidence_threshold: options.confidence_threshold.unwrap_or(self.confidence_threshold),
            retrieval_limit: options.retrieval_limit.unwrap_or(self.retrieval_limit),
            retrieval_min_score: options.retrieval_min_score.unwrap_or(self.retrieval_min_score),
            personalize: options.personalize.unwrap_or(self.personalize),
            ..self.clone()
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

#[derive(Debug, Error)]
enum GenerationFailure {
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),
    #[error(transparent)]
    Llm(#[from] LlmError),
}

struct StageOutput {
    context: ConversationContext,
    payload: ResponsePayload,
    fallback_used: bool,
    content_filtered: bool,
}

/// Ordered record of the stages one request went through.
struct StageTrace {
    request_id: String,
    stages: Vec<PipelineStage>,
}

impl StageTrace {
    fn new(request_id: &str) -> Self {
        Self { request_id: request_id.to_string(), stages: vec![PipelineStage::Received] }
    }

    fn current(&self) -> PipelineStage {
        self.stages.last().copied().unwrap_or(PipelineStage::Received)
    }

    fn advance(&mut self, next: PipelineStage) {
        let current = self.current();
        if !current.can_advance_to(next) {
            warn!(
                event_name = "pipeline.invalid_transition",
                request_id = %self.request_id,
                from = current.as_str(),
                to = next.as_str(),
                "ignoring invalid stage transition"
            );
            return;
        }
        debug!(
            event_name = "pipeline.stage",
            request_id = %self.request_id,
            stage = next.as_str(),
            "pipeline stage reached"
        );
        self.stages.push(next);
    }

    fn fail(&mut self) {
        if !self.current().is_terminal() {
            self.stages.push(PipelineStage::Errored);
        }
    }
}

struct Pipeline {
    repositories: Repositories,
    context: ContextAggregator,
    retriever: Arc<dyn Retriever>,
    llm: Arc<dyn LlmClient>,
    formatter: Arc<dyn ResponseFormatter>,
    settings: OrchestratorSettings,
    escalation: EscalationClassifier,
    scorer: ConfidenceScorer,
    intents: IntentExtractor,
    post_processor: ResponsePostProcessor,
    stats: PipelineStats,
}

/// The entry point callers use: one inbound message in, one structured result out.
pub struct ResponseOrchestrator {
    pipeline: Arc<Pipeline>,
    dedup: RequestDeduplicator,
}

impl ResponseOrchestrator {
    pub fn new(
        repositories: Repositories,
        retriever: Arc<dyn Retriever>,
        llm: Arc<dyn LlmClient>,
        formatter: Arc<dyn ResponseFormatter>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            pipeline: Arc::new(Pipeline {
                context: ContextAggregator::new(repositories.clone()),
                repositories,
                retriever,
                llm,
                formatter,
                settings,
                escalation: EscalationClassifier::new(),
                scorer: ConfidenceScorer::new(),
                intents: IntentExtractor::new(),
                post_processor: ResponsePostProcessor::new(),
                stats: PipelineStats::new(),
            }),
            dedup: RequestDeduplicator::new(),
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.pipeline.settings
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.pipeline.stats.snapshot()
    }

    /// Failure result for input that never reached the pipeline, such as an undecodable body.
    pub fn reject(&self, error: ResponseError) -> ResponseResult {
        let request_id = Uuid::new_v4().to_string();
        info!(
            event_name = "pipeline.rejected",
            request_id = %request_id,
            error_kind = error.kind(),
            "request rejected before processing"
        );
        self.rejected(error, request_id, Instant::now())
    }

    fn rejected(&self, error: ResponseError, request_id: String, started: Instant) -> ResponseResult {
        let mut metadata = ResultMetadata::new(request_id);
        metadata.processing_time_ms = started.elapsed().as_millis() as u64;
        metadata.stages = vec![PipelineStage::Received, PipelineStage::Errored];
        let result = ResponseResult::failure(error, metadata);
        self.pipeline.stats.record(&result);
        result
    }

    /// Never fails and never panics: every outcome is a [`ResponseResult`].
    pub async fn generate_response(&self, request: ResponseRequest) -> ResponseResult {
        let request_id = Uuid::new_v4().to_string();
        let started = Instant::now();

        if let Err(error) = request.validate(self.pipeline.settings.max_message_chars) {
            let error = ResponseError::from(error);
            info!(
                event_name = "pipeline.rejected",
                request_id = %request_id,
                conversation_id = %request.conversation_id,
                error_kind = error.kind(),
                "request failed validation"
            );
            return self.rejected(error, request_id, started);
        }

        let key = DedupKey::new(&request.conversation_id, &request.message);
        let pipeline = self.pipeline.clone();
        self.dedup.run(key, async move { pipeline.execute(request, request_id).await }).await
    }
}

impl Pipeline {
    async fn execute(&self, request: ResponseRequest, request_id: String) -> ResponseResult {
        let started = Instant::now();
        let settings = self.settings.with_overrides(&request.options());
        let guard = TimeoutGuard::from_millis(settings.timeout_ms);
        let mut trace = StageTrace::new(&request_id);

        let outcome = guard
            .run(
                AssertUnwindSafe(self.run_stages(&request, &settings, &mut trace, started))
                    .catch_unwind(),
            )
            .await;

        let mut metadata = ResultMetadata::new(request_id.clone());
        let result = match outcome {
            Ok(Ok(Ok(output))) => {
                // Outside the guard so a late timeout cannot cut the writes in half.
                self.persist(&request, &output.context, &output.payload.response, &request_id)
                    .await;
                trace.advance(PipelineStage::Persisted);
                trace.advance(PipelineStage::Done);
                metadata.fallback_used = output.fallback_used;
                metadata.content_filtered = output.content_filtered;
                Ok(output.payload)
            }
            Ok(Ok(Err(error))) => Err(error),
            Ok(Err(panic)) => {
                Err(ResponseError::Unknown { message: panic_message(panic.as_ref()) })
            }
            Err(timeout) => Err(timeout),
        };

        metadata.processing_time_ms = started.elapsed().as_millis() as u64;
        let result = match result {
            Ok(payload) => {
                info!(
                    event_name = "pipeline.completed",
                    request_id = %request_id,
                    conversation_id = %request.conversation_id,
                    assistant_id = %request.assistant_id,
                    confidence = payload.response.confidence,
                    should_escalate = payload.response.should_escalate,
                    chunks = payload.messages.len(),
                    elapsed_ms = metadata.processing_time_ms,
                    "response generated"
                );
                metadata.stages = trace.stages;
                ResponseResult::success(payload, metadata)
            }
            Err(error) => {
                trace.fail();
                warn!(
                    event_name = "pipeline.failed",
                    request_id = %request_id,
                    conversation_id = %request.conversation_id,
                    assistant_id = %request.assistant_id,
                    error_kind = error.kind(),
                    error = %error,
                    elapsed_ms = metadata.processing_time_ms,
                    "response pipeline failed"
                );
                metadata.stages = trace.stages;
                ResponseResult::failure(error, metadata)
            }
        };

        self.stats.record(&result);
        result
    }

    async fn run_stages(
        &self,
        request: &ResponseRequest,
        settings: &OrchestratorSettings,
        trace: &mut StageTrace,
        started: Instant,
    ) -> Result<StageOutput, ResponseError> {
        let context = self.context.load(request, settings.history_limit).await?;
        trace.advance(PipelineStage::ContextLoaded);

        let analysis = self.intents.extract(&request.message);
        let language = ReplyLanguage::from_tag(&context.customer.preferred_language);
        let mut fallback_used = false;

        let draft = match self
            .escalation
            .classify(&request.message, &context.assistant.escalation_keywords)
        {
            Some(reason) => {
                info!(
                    event_name = "pipeline.escalated",
                    request_id = %trace.request_id,
                    conversation_id = %request.conversation_id,
                    reason = reason.as_str(),
                    "escalating before generation"
                );
                trace.advance(PipelineStage::Escalated);
                AiResponse {
                    content: language.escalation().to_string(),
                    confidence: ESCALATION_CONFIDENCE,
                    sources: Vec::new(),
                    processing_time_ms: 0,
                    should_escalate: true,
                    intent: Intent::EscalationRequest,
                    entities: analysis.entities,
                    origin: ResponseOrigin::Escalation,
                    tokens_used: None,
                }
            }
            None => {
                let draft = match self.generate(request, &context, settings, &analysis).await {
                    Ok(draft) => draft,
                    Err(error) => {
                        warn!(
                            event_name = "pipeline.generation_fallback",
                            request_id = %trace.request_id,
                            conversation_id = %request.conversation_id,
                            provider = self.llm.name(),
                            error = %error,
                            "generation failed, using fallback reply"
                        );
                        fallback_used = true;
                        AiResponse {
                            content: language.fallback().to_string(),
                            confidence: FALLBACK_CONFIDENCE,
                            sources: Vec::new(),
                            processing_time_ms: 0,
                            should_escalate: true,
                            intent: analysis.intent,
                            entities: analysis.entities,
                            origin: ResponseOrigin::Fallback,
                            tokens_used: None,
                        }
                    }
                };
                trace.advance(PipelineStage::Generated);
                draft
            }
        };

        let outcome = self.post_processor.process(
            draft,
            &context,
            &PostProcessSettings {
                confidence_threshold: settings.confidence_threshold,
                personalize: settings.personalize,
            },
        );
        trace.advance(PipelineStage::PostProcessed);

        let mut response = outcome.response;
        response.processing_time_ms = started.elapsed().as_millis() as u64;

        let messages = match self.formatter.format(&response).await {
            Ok(messages) if !messages.is_empty() => messages,
            Ok(_) => vec![response.content.clone()],
            Err(error) => {
                warn!(
                    event_name = "pipeline.format_failed",
                    request_id = %trace.request_id,
                    error = %error,
                    "formatter failed, sending raw content"
                );
                vec![response.content.clone()]
            }
        };
        trace.advance(PipelineStage::Formatted);

        Ok(StageOutput {
            context,
            payload: ResponsePayload { messages, response },
            fallback_used,
            content_filtered: outcome.content_filtered,
        })
    }

    async fn generate(
        &self,
        request: &ResponseRequest,
        context: &ConversationContext,
        settings: &OrchestratorSettings,
        analysis: &MessageAnalysis,
    ) -> Result<AiResponse, GenerationFailure> {
        let snippets = self
            .retriever
            .search(
                &request.message,
                &context.business_id,
                settings.retrieval_limit,
                settings.retrieval_min_score,
            )
            .await?;
        let sources: Vec<_> = snippets.iter().map(|snippet| snippet.reference()).collect();

        let generation = self
            .llm
            .generate(&GenerationRequest {
                system_prompt: build_system_prompt(&context.assistant, &context.customer),
                context_text: build_context_text(&snippets),
                history: history_turns(&context.history),
                message: request.message.clone(),
                temperature: settings.temperature,
                max_tokens: settings.max_tokens,
            })
            .await?;

        Ok(AiResponse {
            confidence: self.scorer.score(&generation.text, &sources),
            content: generation.text,
            sources,
            processing_time_ms: 0,
            should_escalate: false,
            intent: analysis.intent,
            entities: analysis.entities.clone(),
            origin: ResponseOrigin::Generated,
            tokens_used: generation.tokens_used,
        })
    }

    /// Every write is attempted; failures are logged and never change the result.
    async fn persist(
        &self,
        request: &ResponseRequest,
        context: &ConversationContext,
        response: &AiResponse,
        request_id: &str,
    ) {
        let now = Utc::now();

        let mut inbound = Message::customer(request.conversation_id.clone(), &request.message, now);
        inbound.intent = Some(response.intent.as_str().to_string());
        inbound.metadata.request_id = Some(request_id.to_string());

        let mut reply = Message::assistant(request.conversation_id.clone(), &response.content, now);
        reply.confidence = Some(response.confidence);
        reply.intent = Some(response.intent.as_str().to_string());
        reply.metadata = MessageMetadata {
            request_id: Some(request_id.to_string()),
            processing_time_ms: Some(response.processing_time_ms),
            should_escalate: response.should_escalate,
            sources: response
                .sources
                .iter()
                .map(|source| format!("{}:{}", source.source, source.source_id))
                .collect(),
        };

        let writes = [
            ("customer_message", self.repositories.messages.insert(inbound).await),
            ("assistant_message", self.repositories.messages.insert(reply).await),
            (
                "conversation",
                self.repositories
                    .conversations
                    .record_exchange(&context.conversation.id, now, response.should_escalate)
                    .await,
            ),
            (
                "assistant_usage",
                self.repositories
                    .assistants
                    .record_usage(&context.assistant.id, response.processing_time_ms)
                    .await,
            ),
        ];

        for (step, outcome) in writes {
            if let Err(error) = outcome {
                warn!(
                    event_name = "pipeline.persistence_failed",
                    request_id,
                    conversation_id = %request.conversation_id,
                    step,
                    error = %error,
                    "persistence step failed"
                );
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("pipeline panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("pipeline panicked: {message}")
    } else {
        "pipeline panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;

    use concierge_channel::{FormatError, PlainTextFormatter, ResponseFormatter};
    use concierge_core::domain::assistant::{Assistant, AssistantId, BusinessId};
    use concierge_core::domain::conversation::{Conversation, ConversationId, ConversationStatus};
    use concierge_core::domain::customer::CustomerMetadata;
    use concierge_core::domain::message::{Message, MessageRole};
    use concierge_core::domain::request::{ProcessingOptions, ResponseRequest};
    use concierge_core::domain::response::{
        AiResponse, Intent, PipelineStage, ResponseOrigin, ResponseResult,
    };
    use concierge_db::repositories::{MessageRepository, RepositoryError};
    use concierge_db::Repositories;

    use super::{OrchestratorSettings, ResponseOrchestrator};
    use crate::llm::{Generation, GenerationRequest, LlmClient, LlmError};
    use crate::replies::ReplyLanguage;
    use crate::retrieval::{KnowledgeSnippet, NoopRetriever, RetrievalError, Retriever};

    const LONG_ANSWER: &str = "Abrimos de segunda a sábado, das 7h às 19h, e aos domingos \
        das 7h às 12h. Também fazemos entregas no bairro todos os dias.";

    struct FakeLlm {
        calls: AtomicUsize,
        reply: Result<&'static str, ()>,
        delay: Duration,
    }

    impl FakeLlm {
        fn replying(reply: &'static str) -> Arc<Self> {
            Arc::new(Self { calls: AtomicUsize::new(0), reply: Ok(reply), delay: Duration::ZERO })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self { calls: AtomicUsize::new(0), reply: Err(()), delay: Duration::ZERO })
        }

        fn slow(reply: &'static str, delay: Duration) -> Arc<Self> {
            Arc::new(Self { calls: AtomicUsize::new(0), reply: Ok(reply), delay })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LlmClient for FakeLlm {
        fn name(&self) -> &str {
            "fake"
        }

        async fn generate(&self, request: &GenerationRequest) -> Result<Generation, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert!(!request.system_prompt.is_empty());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match self.reply {
                Ok(text) => Ok(Generation { text: text.to_string(), tokens_used: Some(64) }),
                Err(()) => Err(LlmError::Api { status: 500, message: "boom".to_string() }),
            }
        }
    }

    struct FixedRetriever(Vec<KnowledgeSnippet>);

    #[async_trait]
    impl Retriever for FixedRetriever {
        async fn search(
            &self,
            _query: &str,
            _business_id: &BusinessId,
            limit: usize,
            _min_score: f64,
        ) -> Result<Vec<KnowledgeSnippet>, RetrievalError> {
            Ok(self.0.iter().take(limit).cloned().collect())
        }
    }

    struct BrokenRetriever;

    #[async_trait]
    impl Retriever for BrokenRetriever {
        async fn search(
            &self,
            _query: &str,
            _business_id: &BusinessId,
            _limit: usize,
            _min_score: f64,
        ) -> Result<Vec<KnowledgeSnippet>, RetrievalError> {
            Err(RetrievalError::Unavailable("index offline".to_string()))
        }
    }

    struct PanickingFormatter;

    #[async_trait]
    impl ResponseFormatter for PanickingFormatter {
        async fn format(&self, _response: &AiResponse) -> Result<Vec<String>, FormatError> {
            panic!("formatter exploded");
        }
    }

    struct FailingFormatter;

    #[async_trait]
    impl ResponseFormatter for FailingFormatter {
        async fn format(&self, _response: &AiResponse) -> Result<Vec<String>, FormatError> {
            Err(FormatError::EmptyContent)
        }
    }

    struct FailingMessages;

    #[async_trait]
    impl MessageRepository for FailingMessages {
        async fn recent(
            &self,
            _conversation_id: &ConversationId,
            _limit: usize,
        ) -> Result<Vec<Message>, RepositoryError> {
            Ok(Vec::new())
        }

        async fn recent_by_role(
            &self,
            _conversation_id: &ConversationId,
            _role: MessageRole,
            _limit: usize,
        ) -> Result<Vec<Message>, RepositoryError> {
            Ok(Vec::new())
        }

        async fn insert(&self, _message: Message) -> Result<(), RepositoryError> {
            Err(RepositoryError::Decode("disk full".to_string()))
        }

        async fn count_by_role(
            &self,
            _conversation_id: &ConversationId,
            _role: MessageRole,
        ) -> Result<u64, RepositoryError> {
            Ok(0)
        }
    }

    struct SlowMessages {
        inner: Arc<dyn MessageRepository>,
        delay: Duration,
    }

    #[async_trait]
    impl MessageRepository for SlowMessages {
        async fn recent(
            &self,
            conversation_id: &ConversationId,
            limit: usize,
        ) -> Result<Vec<Message>, RepositoryError> {
            self.inner.recent(conversation_id, limit).await
        }

        async fn recent_by_role(
            &self,
            conversation_id: &ConversationId,
            role: MessageRole,
            limit: usize,
        ) -> Result<Vec<Message>, RepositoryError> {
            self.inner.recent_by_role(conversation_id, role, limit).await
        }

        async fn insert(&self, message: Message) -> Result<(), RepositoryError> {
            tokio::time::sleep(self.delay).await;
            self.inner.insert(message).await
        }

        async fn count_by_role(
            &self,
            conversation_id: &ConversationId,
            role: MessageRole,
        ) -> Result<u64, RepositoryError> {
            self.inner.count_by_role(conversation_id, role).await
        }
    }

    fn snippets(scores: &[f64]) -> Vec<KnowledgeSnippet> {
        scores
            .iter()
            .enumerate()
            .map(|(index, score)| KnowledgeSnippet {
                content: format!("snippet {index}"),
                score: *score,
                source: "faq".to_string(),
                source_id: format!("faq-{index}"),
            })
            .collect()
    }

    async fn seed(repositories: &Repositories) {
        repositories
            .assistants
            .save(
                Assistant::new(
                    AssistantId::new("a1"),
                    BusinessId::new("b1"),
                    "Luna",
                    "Padaria Central",
                    "Seja cordial.",
                )
                .with_escalation_keywords(["gerente"]),
            )
            .await
            .expect("seed assistant");
        repositories
            .conversations
            .save(Conversation::new(
                ConversationId::new("c1"),
                AssistantId::new("a1"),
                BusinessId::new("b1"),
            ))
            .await
            .expect("seed conversation");
    }

    async fn orchestrator(
        repositories: Repositories,
        retriever: Arc<dyn Retriever>,
        llm: Arc<FakeLlm>,
        formatter: Arc<dyn ResponseFormatter>,
    ) -> ResponseOrchestrator {
        seed(&repositories).await;
        ResponseOrchestrator::new(
            repositories,
            retriever,
            llm,
            formatter,
            OrchestratorSettings::default(),
        )
    }

    fn request(message: &str) -> ResponseRequest {
        ResponseRequest::new(
            message,
            ConversationId::new("c1"),
            AssistantId::new("a1"),
            BusinessId::new("b1"),
        )
    }

    fn response(result: &ResponseResult) -> &AiResponse {
        result.response().expect("expected a successful result")
    }

    #[tokio::test]
    async fn generated_reply_is_scored_formatted_and_persisted() {
        let repositories = Repositories::in_memory();
        let llm = FakeLlm::replying(LONG_ANSWER);
        let orchestrator = orchestrator(
            repositories.clone(),
            Arc::new(FixedRetriever(snippets(&[0.9, 0.9]))),
            llm.clone(),
            Arc::new(PlainTextFormatter),
        )
        .await;

        let result = orchestrator.generate_response(request("Qual o horário de sábado?")).await;

        let reply = response(&result);
        assert_eq!(reply.confidence, 0.98);
        assert!(!reply.should_escalate);
        assert_eq!(reply.origin, ResponseOrigin::Generated);
        assert_eq!(reply.sources.len(), 2);
        assert_eq!(reply.tokens_used, Some(64));
        assert_eq!(result.messages(), [LONG_ANSWER.to_string()]);
        assert_eq!(llm.calls(), 1);
        assert_eq!(
            result.metadata().stages,
            vec![
                PipelineStage::Received,
                PipelineStage::ContextLoaded,
                PipelineStage::Generated,
                PipelineStage::PostProcessed,
                PipelineStage::Formatted,
                PipelineStage::Persisted,
                PipelineStage::Done,
            ]
        );

        let history = repositories
            .messages
            .recent(&ConversationId::new("c1"), 10)
            .await
            .expect("history");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, MessageRole::Customer);
        assert_eq!(history[1].confidence, Some(0.98));
        assert_eq!(history[1].metadata.sources, vec!["faq:faq-0", "faq:faq-1"]);

        let conversation = repositories
            .conversations
            .find_by_id(&BusinessId::new("b1"), &AssistantId::new("a1"), &ConversationId::new("c1"))
            .await
            .expect("lookup")
            .expect("conversation");
        assert_eq!(conversation.message_count, 2);
        assert_eq!(conversation.status, ConversationStatus::Active);

        let assistant = repositories
            .assistants
            .find_by_id(&BusinessId::new("b1"), &AssistantId::new("a1"))
            .await
            .expect("lookup")
            .expect("assistant");
        assert_eq!(assistant.usage.message_count, 1);
    }

    #[tokio::test]
    async fn emotional_message_escalates_without_calling_the_model() {
        let repositories = Repositories::in_memory();
        let llm = FakeLlm::replying(LONG_ANSWER);
        let orchestrator = orchestrator(
            repositories.clone(),
            Arc::new(NoopRetriever),
            llm.clone(),
            Arc::new(PlainTextFormatter),
        )
        .await;

        let result =
            orchestrator.generate_response(request("quero cancelar, isso é um absurdo")).await;

        let reply = response(&result);
        assert_eq!(llm.calls(), 0);
        assert!(reply.should_escalate);
        assert_eq!(reply.confidence, 0.9);
        assert_eq!(reply.intent, Intent::EscalationRequest);
        assert_eq!(reply.content, ReplyLanguage::Portuguese.escalation());
        assert!(result.metadata().stages.contains(&PipelineStage::Escalated));
        assert!(!result.metadata().stages.contains(&PipelineStage::Generated));

        let conversation = repositories
            .conversations
            .find_by_id(&BusinessId::new("b1"), &AssistantId::new("a1"), &ConversationId::new("c1"))
            .await
            .expect("lookup")
            .expect("conversation");
        assert_eq!(conversation.status, ConversationStatus::Escalated);
    }

    #[tokio::test]
    async fn assistant_keyword_escalates() {
        let llm = FakeLlm::replying(LONG_ANSWER);
        let orchestrator = orchestrator(
            Repositories::in_memory(),
            Arc::new(NoopRetriever),
            llm.clone(),
            Arc::new(PlainTextFormatter),
        )
        .await;

        let result = orchestrator.generate_response(request("Quero falar com o GERENTE")).await;

        assert_eq!(response(&result).origin, ResponseOrigin::Escalation);
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn generation_failure_degrades_to_fallback() {
        let orchestrator = orchestrator(
            Repositories::in_memory(),
            Arc::new(NoopRetriever),
            FakeLlm::failing(),
            Arc::new(PlainTextFormatter),
        )
        .await;

        let result = orchestrator
            .generate_response(request("Oi, vocês entregam?").with_customer(CustomerMetadata {
                name: Some("Alex".to_string()),
                language: Some("en".to_string()),
                ..CustomerMetadata::default()
            }))
            .await;

        assert!(result.is_success());
        assert!(result.metadata().fallback_used);
        let reply = response(&result);
        assert!(reply.should_escalate);
        assert_eq!(reply.origin, ResponseOrigin::Fallback);
        assert_eq!(reply.confidence, 0.4);
        assert!(reply.content.starts_with("Alex, Sorry"));
        assert_eq!(orchestrator.stats().fallback_responses, 1);
    }

    #[tokio::test]
    async fn retrieval_failure_degrades_to_fallback() {
        let llm = FakeLlm::replying(LONG_ANSWER);
        let orchestrator = orchestrator(
            Repositories::in_memory(),
            Arc::new(BrokenRetriever),
            llm.clone(),
            Arc::new(PlainTextFormatter),
        )
        .await;

        let result = orchestrator.generate_response(request("Qual o horário?")).await;

        assert!(result.metadata().fallback_used);
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn hedged_short_reply_is_escalated_by_threshold() {
        let orchestrator = orchestrator(
            Repositories::in_memory(),
            Arc::new(NoopRetriever),
            FakeLlm::replying("Talvez abra às 7h."),
            Arc::new(PlainTextFormatter),
        )
        .await;

        let result = orchestrator.generate_response(request("Que horas abrem?")).await;

        let reply = response(&result);
        // 0.8 * 0.9 * 0.7 = 0.504, below the fact-check line.
        assert_eq!(reply.confidence, 0.5);
        assert!(reply.content.ends_with(ReplyLanguage::Portuguese.verification_disclaimer()));
        assert!(reply.should_escalate);
    }

    #[tokio::test]
    async fn request_override_can_lower_threshold() {
        let orchestrator = orchestrator(
            Repositories::in_memory(),
            Arc::new(NoopRetriever),
            FakeLlm::replying("Abrimos às 7h."),
            Arc::new(PlainTextFormatter),
        )
        .await;

        let result = orchestrator
            .generate_response(request("Que horas abrem?").with_options(ProcessingOptions {
                confidence_threshold: Some(0.5),
                ..ProcessingOptions::default()
            }))
            .await;

        // Short reply: 0.8 * 0.9 = 0.72.
        let reply = response(&result);
        assert_eq!(reply.confidence, 0.72);
        assert!(!reply.should_escalate);
    }

    #[tokio::test]
    async fn missing_conversation_fails_before_generation() {
        let llm = FakeLlm::replying(LONG_ANSWER);
        let orchestrator = orchestrator(
            Repositories::in_memory(),
            Arc::new(NoopRetriever),
            llm.clone(),
            Arc::new(PlainTextFormatter),
        )
        .await;
        let mut unknown = request("Oi");
        unknown.conversation_id = ConversationId::new("c404");

        let result = orchestrator.generate_response(unknown).await;

        assert_eq!(result.error().map(|error| error.kind()), Some("not_found"));
        assert_eq!(llm.calls(), 0);
        assert_eq!(
            result.metadata().stages,
            vec![PipelineStage::Received, PipelineStage::Errored]
        );
        assert_eq!(orchestrator.stats().failed_requests, 1);
    }

    #[tokio::test]
    async fn invalid_request_is_rejected_and_counted() {
        let orchestrator = orchestrator(
            Repositories::in_memory(),
            Arc::new(NoopRetriever),
            FakeLlm::replying(LONG_ANSWER),
            Arc::new(PlainTextFormatter),
        )
        .await;

        let result = orchestrator.generate_response(request("   ")).await;

        assert_eq!(result.error().map(|error| error.kind()), Some("validation"));
        let stats = orchestrator.stats();
        assert_eq!(stats.total_requests, 1);
        assert_eq!(stats.fallback_rate, 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_generation_times_out_without_persisting() {
        let repositories = Repositories::in_memory();
        let orchestrator = orchestrator(
            repositories.clone(),
            Arc::new(NoopRetriever),
            FakeLlm::slow(LONG_ANSWER, Duration::from_secs(60)),
            Arc::new(PlainTextFormatter),
        )
        .await;

        let result = orchestrator
            .generate_response(request("Qual o horário?").with_options(ProcessingOptions {
                timeout_ms: Some(500),
                ..ProcessingOptions::default()
            }))
            .await;

        assert_eq!(result.error().map(|error| error.kind()), Some("timeout"));
        assert_eq!(result.metadata().stages.last(), Some(&PipelineStage::Errored));

        tokio::time::sleep(Duration::from_secs(120)).await;
        let history = repositories
            .messages
            .recent(&ConversationId::new("c1"), 10)
            .await
            .expect("history");
        assert!(history.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_writes_complete_even_past_the_response_budget() {
        let mut repositories = Repositories::in_memory();
        let stored = repositories.messages.clone();
        repositories.messages =
            Arc::new(SlowMessages { inner: stored.clone(), delay: Duration::from_millis(400) });
        let orchestrator = orchestrator(
            repositories,
            Arc::new(NoopRetriever),
            FakeLlm::replying(LONG_ANSWER),
            Arc::new(PlainTextFormatter),
        )
        .await;

        let result = orchestrator
            .generate_response(request("Qual o horário?").with_options(ProcessingOptions {
                timeout_ms: Some(500),
                ..ProcessingOptions::default()
            }))
            .await;

        assert!(result.is_success());
        assert_eq!(result.metadata().stages.last(), Some(&PipelineStage::Done));
        let history = stored.recent(&ConversationId::new("c1"), 10).await.expect("history");
        assert_eq!(history.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_duplicates_call_the_model_once() {
        let llm = FakeLlm::slow(LONG_ANSWER, Duration::from_millis(200));
        let orchestrator = orchestrator(
            Repositories::in_memory(),
            Arc::new(NoopRetriever),
            llm.clone(),
            Arc::new(PlainTextFormatter),
        )
        .await;

        let (first, second) = tokio::join!(
            orchestrator.generate_response(request("Qual o horário?")),
            orchestrator.generate_response(request("Qual o horário?")),
        );

        assert_eq!(llm.calls(), 1);
        assert_eq!(first, second);
        assert_eq!(orchestrator.stats().total_requests, 1);

        orchestrator.generate_response(request("Qual o horário?")).await;
        assert_eq!(llm.calls(), 2);
    }

    #[tokio::test]
    async fn panics_become_unknown_failures() {
        let orchestrator = orchestrator(
            Repositories::in_memory(),
            Arc::new(NoopRetriever),
            FakeLlm::replying(LONG_ANSWER),
            Arc::new(PanickingFormatter),
        )
        .await;

        let result = orchestrator.generate_response(request("Qual o horário?")).await;

        let error = result.error().expect("failure");
        assert_eq!(error.kind(), "unknown");
        assert!(error.to_string().contains("formatter exploded"));
    }

    #[tokio::test]
    async fn formatter_errors_fall_back_to_raw_content() {
        let orchestrator = orchestrator(
            Repositories::in_memory(),
            Arc::new(NoopRetriever),
            FakeLlm::replying(LONG_ANSWER),
            Arc::new(FailingFormatter),
        )
        .await;

        let result = orchestrator.generate_response(request("Qual o horário?")).await;

        assert_eq!(result.messages().len(), 1);
        assert!(result.messages()[0].starts_with("Abrimos"));
    }

    #[tokio::test]
    async fn persistence_failures_do_not_fail_the_request() {
        let mut repositories = Repositories::in_memory();
        repositories.messages = Arc::new(FailingMessages);
        let orchestrator = orchestrator(
            repositories,
            Arc::new(NoopRetriever),
            FakeLlm::replying(LONG_ANSWER),
            Arc::new(PlainTextFormatter),
        )
        .await;

        let result = orchestrator.generate_response(request("Qual o horário?")).await;

        assert!(result.is_success());
        assert!(result.metadata().stages.contains(&PipelineStage::Persisted));
    }
}
