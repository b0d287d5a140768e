use concierge_core::domain::response::SourceReference;

pub const BASE_CONFIDENCE: f64 = 0.8;
pub const SOURCE_BOOST_WEIGHT: f64 = 0.2;
pub const SHORT_RESPONSE_CHARS: usize = 50;
pub const SHORT_RESPONSE_PENALTY: f64 = 0.9;
pub const HEDGING_PENALTY: f64 = 0.7;

const HEDGING_PHRASES: &[&str] = &[
    "i think",
    "maybe",
    "possibly",
    "not sure",
    "don't know",
    "acho que",
    "talvez",
    "possivelmente",
    "não tenho certeza",
    "nao tenho certeza",
    "não sei",
    "nao sei",
];

/// Heuristic trust score for a generated reply.
#[derive(Clone, Copy, Debug, Default)]
pub struct ConfidenceScorer;

impl ConfidenceScorer {
    pub fn new() -> Self {
        Self
    }

    /// Base plus source boost, then length penalty, then hedging penalty.
    /// The result lies in `[0, 1]` and is rounded to two decimals.
    pub fn score(&self, response: &str, sources: &[SourceReference]) -> f64 {
        let mut confidence = BASE_CONFIDENCE;

        if !sources.is_empty() {
            let total: f64 = sources.iter().map(|source| source.score.clamp(0.0, 1.0)).sum();
            let mean = total / sources.len() as f64;
            confidence = (confidence + mean * SOURCE_BOOST_WEIGHT).min(1.0);
        }

        if response.chars().count() < SHORT_RESPONSE_CHARS {
            confidence *= SHORT_RESPONSE_PENALTY;
        }

        if contains_hedging(response) {
            confidence *= HEDGING_PENALTY;
        }

        round_confidence(confidence)
    }
}

pub fn contains_hedging(response: &str) -> bool {
    let lowered = response.to_lowercase();
    HEDGING_PHRASES.iter().any(|phrase| lowered.contains(phrase))
}

/// Clamps to `[0, 1]` and rounds to two decimal places.
pub fn round_confidence(value: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    (value.clamp(0.0, 1.0) * 100.0).round() / 100.0
}
