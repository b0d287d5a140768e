use std::sync::OnceLock;

use regex::Regex;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FilterDecision {
    Allow,
    Block { reason_code: &'static str },
}

impl FilterDecision {
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Block { .. })
    }
}

struct SensitivePatterns {
    credential_assignment: Regex,
    provider_key: Regex,
    aws_access_key: Regex,
    card_number: Regex,
    ssn: Regex,
    cpf: Regex,
}

fn patterns() -> &'static SensitivePatterns {
    static PATTERNS: OnceLock<SensitivePatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| SensitivePatterns {
        credential_assignment: Regex::new(
            r"(?i)\b(?:api[_-]?key|secret|password|passwd|senha|token|access[_-]?key)\b\s*[:=]\s*\S{6,}",
        )
        .expect("credential pattern is a compile-time constant"),
        provider_key: Regex::new(r"\bsk-[A-Za-z0-9_-]{16,}")
            .expect("provider key pattern is a compile-time constant"),
        aws_access_key: Regex::new(r"\bAKIA[0-9A-Z]{16}\b")
            .expect("aws key pattern is a compile-time constant"),
        card_number: Regex::new(r"\b\d{4}[ -]?\d{4}[ -]?\d{4}[ -]?\d{1,7}\b")
            .expect("card pattern is a compile-time constant"),
        ssn: Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").expect("ssn pattern is a compile-time constant"),
        cpf: Regex::new(r"\b\d{3}\.\d{3}\.\d{3}-\d{2}\b")
            .expect("cpf pattern is a compile-time constant"),
    })
}

/// Blocks generated replies that leak credentials or personal identifiers.
#[derive(Clone, Copy, Debug, Default)]
pub struct ContentFilter;

impl ContentFilter {
    pub fn new() -> Self {
        Self
    }

    pub fn evaluate(&self, text: &str) -> FilterDecision {
        let patterns = patterns();

        if patterns.credential_assignment.is_match(text) {
            return FilterDecision::Block { reason_code: "credential_assignment" };
        }
        if patterns.provider_key.is_match(text) || patterns.aws_access_key.is_match(text) {
            return FilterDecision::Block { reason_code: "api_key" };
        }
        let card_like = patterns.card_number.find_iter(text).any(|candidate| {
            let digits: Vec<u32> =
                candidate.as_str().chars().filter_map(|ch| ch.to_digit(10)).collect();
            (13..=19).contains(&digits.len()) && passes_luhn(&digits)
        });
        if card_like {
            return FilterDecision::Block { reason_code: "card_number" };
        }
        if patterns.ssn.is_match(text) {
            return FilterDecision::Block { reason_code: "ssn" };
        }
        if patterns.cpf.is_match(text) {
            return FilterDecision::Block { reason_code: "cpf" };
        }

        FilterDecision::Allow
    }
}

fn passes_luhn(digits: &[u32]) -> bool {
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(index, digit)| {
            if index % 2 == 1 {
                let doubled = digit * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                *digit
            }
        })
        .sum();
    sum % 10 == 0
}
