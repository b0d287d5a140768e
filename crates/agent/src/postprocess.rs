use tracing::{debug, warn};

use concierge_core::domain::response::{AiResponse, ResponseOrigin};

use crate::confidence::round_confidence;
use crate::context::ConversationContext;
use crate::guardrails::{ContentFilter, FilterDecision};
use crate::replies::ReplyLanguage;

pub const FILTERED_CONFIDENCE: f64 = 0.5;
pub const FACT_CHECK_BELOW: f64 = 0.6;
pub const FACT_CHECK_FLOOR: f64 = 0.4;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PostProcessSettings {
    pub confidence_threshold: f64,
    pub personalize: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PostProcessOutcome {
    pub response: AiResponse,
    pub content_filtered: bool,
}

/// Addresses the customer by name.
#[derive(Clone, Copy, Debug, Default)]
pub struct Personalizer;

impl Personalizer {
    pub fn new() -> Self {
        Self
    }

    /// Returns the content prefixed with `"{name}, "` unless the name already appears.
    pub fn personalize(&self, content: &str, name: Option<&str>) -> Option<String> {
        let name = name.map(str::trim).filter(|name| !name.is_empty())?;
        if content.to_lowercase().contains(&name.to_lowercase()) {
            return None;
        }
        Some(format!("{name}, {content}"))
    }
}

/// Filter, fact-check, personalize, then the escalation threshold. Each stage sees the
/// previous stage's output.
#[derive(Clone, Copy, Debug, Default)]
pub struct ResponsePostProcessor {
    filter: ContentFilter,
    personalizer: Personalizer,
}

impl ResponsePostProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process(
        &self,
        mut response: AiResponse,
        context: &ConversationContext,
        settings: &PostProcessSettings,
    ) -> PostProcessOutcome {
        let language = ReplyLanguage::from_tag(&context.customer.preferred_language);
        let mut content_filtered = false;

        if let FilterDecision::Block { reason_code } = self.filter.evaluate(&response.content) {
            warn!(
                event_name = "pipeline.content_filtered",
                conversation_id = %context.conversation.id,
                reason_code,
                "generated content blocked"
            );
            response.content = language.filtered().to_string();
            response.confidence = FILTERED_CONFIDENCE;
            response.should_escalate = true;
            response.origin = ResponseOrigin::Filtered;
            response.sources.clear();
            content_filtered = true;
        }

        if response.confidence < FACT_CHECK_BELOW {
            response.content.push_str(language.verification_disclaimer());
            response.confidence = response.confidence.max(FACT_CHECK_FLOOR);
        }

        if settings.personalize {
            if let Some(personalized) =
                self.personalizer.personalize(&response.content, context.customer.name.as_deref())
            {
                response.content = personalized;
            }
        }

        response.confidence = round_confidence(response.confidence);
        if response.confidence < settings.confidence_threshold && !response.should_escalate {
            debug!(
                event_name = "pipeline.threshold_escalation",
                conversation_id = %context.conversation.id,
                confidence = response.confidence,
                threshold = settings.confidence_threshold,
                "confidence below threshold"
            );
            response.should_escalate = true;
        }

        PostProcessOutcome { response, content_filtered }
    }
}
