use serde::Serialize;

/// Messages longer than this that also mention a problem go to a human.
pub const LONG_MESSAGE_CHARS: usize = 500;

const EMOTIONAL_INDICATORS: &[&str] = &[
    // pt
    "cancelar",
    "cancelamento",
    "absurdo",
    "ridículo",
    "ridiculo",
    "palhaçada",
    "palhacada",
    "inaceitável",
    "inaceitavel",
    "péssimo",
    "pessimo",
    "horrível",
    "horrivel",
    "revoltado",
    "revoltante",
    "irritado",
    "furioso",
    "procon",
    "reclame aqui",
    "advogado",
    "processar",
    "justiça",
    "reembolso",
    "estorno",
    "devolver meu dinheiro",
    // en
    "cancel",
    "refund",
    "chargeback",
    "lawyer",
    "attorney",
    "lawsuit",
    "legal action",
    "furious",
    "angry",
    "ridiculous",
    "unacceptable",
    "terrible",
    "worst",
];

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "term", rename_all = "snake_case")]
pub enum EscalationReason {
    Keyword(String),
    EmotionalIndicator(&'static str),
    LongProblemReport,
}

impl EscalationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Keyword(_) => "keyword",
            Self::EmotionalIndicator(_) => "emotional_indicator",
            Self::LongProblemReport => "long_problem_report",
        }
    }
}

/// Decides whether a message should skip generation and go to a human.
#[derive(Clone, Copy, Debug, Default)]
pub struct EscalationClassifier;

impl EscalationClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn should_escalate(&self, message: &str, escalation_keywords: &[String]) -> bool {
        self.classify(message, escalation_keywords).is_some()
    }

    /// Returns the first matching reason; keyword, then emotional indicator, then length.
    pub fn classify(
        &self,
        message: &str,
        escalation_keywords: &[String],
    ) -> Option<EscalationReason> {
        let lowered = message.to_lowercase();

        let keyword = escalation_keywords
            .iter()
            .map(|keyword| keyword.trim())
            .filter(|keyword| !keyword.is_empty())
            .find(|keyword| lowered.contains(&keyword.to_lowercase()));
        if let Some(keyword) = keyword {
            return Some(EscalationReason::Keyword(keyword.to_string()));
        }

        if let Some(indicator) =
            EMOTIONAL_INDICATORS.iter().find(|indicator| lowered.contains(**indicator))
        {
            return Some(EscalationReason::EmotionalIndicator(indicator));
        }

        if message.chars().count() > LONG_MESSAGE_CHARS && lowered.contains("problem") {
            return Some(EscalationReason::LongProblemReport);
        }

        None
    }
}
