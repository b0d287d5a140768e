use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use rust_decimal::Decimal;

use concierge_core::domain::response::{ExtractedEntities, Intent, MonetaryAmount};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageAnalysis {
    pub intent: Intent,
    pub entities: ExtractedEntities,
}

/// Keyword-driven intent labels and regex entity extraction for inbound messages.
#[derive(Clone, Debug, Default)]
pub struct IntentExtractor;

const COMPLAINT_TERMS: &[&str] = &[
    "reclamação",
    "reclamacao",
    "reclamar",
    "insatisfeito",
    "insatisfeita",
    "decepcionado",
    "decepcionada",
    "errado",
    "quebrado",
    "defeito",
    "complaint",
    "complain",
    "disappointed",
    "wrong",
    "broken",
    "defective",
];

const ORDER_STATUS_TERMS: &[&str] = &[
    "pedido",
    "encomenda",
    "entrega",
    "rastreio",
    "rastrear",
    "order",
    "delivery",
    "tracking",
    "shipped",
    "shipping",
];

const SCHEDULING_TERMS: &[&str] = &[
    "agendar",
    "agendamento",
    "marcar",
    "reserva",
    "reservar",
    "disponibilidade",
    "schedule",
    "appointment",
    "booking",
    "reservation",
];

const PRICING_TERMS: &[&str] = &[
    "preço",
    "preco",
    "valor",
    "quanto custa",
    "custa",
    "orçamento",
    "orcamento",
    "promoção",
    "promocao",
    "desconto",
    "price",
    "pricing",
    "cost",
    "how much",
    "quote",
    "discount",
];

const SUPPORT_TERMS: &[&str] = &[
    "ajuda",
    "ajudar",
    "problema",
    "não funciona",
    "nao funciona",
    "erro",
    "suporte",
    "help",
    "support",
    "issue",
    "not working",
    "error",
];

const FAREWELL_TERMS: &[&str] = &[
    "tchau",
    "até logo",
    "ate logo",
    "até mais",
    "ate mais",
    "obrigado",
    "obrigada",
    "valeu",
    "bye",
    "goodbye",
    "thanks",
    "thank you",
];

const GREETING_TERMS: &[&str] = &[
    "oi",
    "olá",
    "ola",
    "bom dia",
    "boa tarde",
    "boa noite",
    "hello",
    "hi",
    "hey",
    "good morning",
    "good afternoon",
    "good evening",
];

impl IntentExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(&self, text: &str) -> MessageAnalysis {
        MessageAnalysis { intent: self.classify(text), entities: extract_entities(text) }
    }

    /// First matching label wins, most specific first.
    pub fn classify(&self, text: &str) -> Intent {
        let normalized = normalize_text(text);
        let tokens = tokenize(&normalized);

        let ordered: [(Intent, &[&str]); 7] = [
            (Intent::Complaint, COMPLAINT_TERMS),
            (Intent::OrderStatus, ORDER_STATUS_TERMS),
            (Intent::Scheduling, SCHEDULING_TERMS),
            (Intent::Pricing, PRICING_TERMS),
            (Intent::Support, SUPPORT_TERMS),
            (Intent::Farewell, FAREWELL_TERMS),
            (Intent::Greeting, GREETING_TERMS),
        ];

        ordered
            .iter()
            .find(|(_, terms)| terms.iter().any(|term| mentions(&normalized, &tokens, term)))
            .map(|(intent, _)| *intent)
            .unwrap_or(Intent::General)
    }
}

pub(crate) fn normalize_text(text: &str) -> String {
    text.to_lowercase()
}

/// Lowercased alphanumeric words.
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    text.split(|character: char| !character.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Phrases match as substrings; single words match whole tokens, or token prefixes
/// for words of four or more characters.
fn mentions(normalized: &str, tokens: &[String], term: &str) -> bool {
    if term.contains(' ') {
        return normalized.contains(term);
    }
    tokens.iter().any(|token| token_matches(token, term))
}

/// Whole-token match, or token prefix for terms of four or more characters.
pub(crate) fn token_matches(token: &str, term: &str) -> bool {
    token == term || (term.chars().count() >= 4 && token.starts_with(term))
}

struct EntityPatterns {
    email: Regex,
    phone: Regex,
    money: Regex,
}

fn entity_patterns() -> &'static EntityPatterns {
    static PATTERNS: OnceLock<EntityPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| EntityPatterns {
        email: Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}")
            .expect("email pattern is a compile-time constant"),
        phone: Regex::new(r"(?:\+\d{1,3}[\s-]?)?(?:\(?\d{2,3}\)?[\s-]?)?\d{4,5}[\s-]?\d{4}\b")
            .expect("phone pattern is a compile-time constant"),
        money: Regex::new(
            r"(R\$|US\$|\$|€)\s?(\d{1,3}(?:[.,]\d{3})+(?:[.,]\d{1,2})?|\d+(?:[.,]\d{1,2})?)",
        )
        .expect("money pattern is a compile-time constant"),
    })
}

pub fn extract_entities(text: &str) -> ExtractedEntities {
    let patterns = entity_patterns();

    let emails = unique(patterns.email.find_iter(text).map(|m| m.as_str().to_string()));

    let amounts: Vec<MonetaryAmount> = patterns
        .money
        .captures_iter(text)
        .filter_map(|captures| {
            let raw = captures.get(0)?.as_str().to_string();
            let currency = currency_code(captures.get(1)?.as_str());
            let value = parse_amount(captures.get(2)?.as_str())?;
            Some(MonetaryAmount { currency: currency.to_string(), value, raw })
        })
        .collect();

    // Digits already claimed by a monetary amount are not phone numbers.
    let money_spans: Vec<(usize, usize)> =
        patterns.money.find_iter(text).map(|m| (m.start(), m.end())).collect();
    let phones = unique(
        patterns
            .phone
            .find_iter(text)
            .filter(|m| {
                !money_spans.iter().any(|(start, end)| m.start() < *end && *start < m.end())
            })
            .map(|m| m.as_str().trim().to_string()),
    );

    ExtractedEntities { phones, emails, amounts }
}

fn unique(values: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = Vec::new();
    for value in values {
        if !seen.contains(&value) {
            seen.push(value);
        }
    }
    seen
}

fn currency_code(symbol: &str) -> &'static str {
    match symbol {
        "R$" => "BRL",
        "€" => "EUR",
        _ => "USD",
    }
}

/// Accepts `1.234,56` and `1,234.56`; a trailing group of one or two digits is the
/// fractional part, three digits are a thousands group.
fn parse_amount(raw: &str) -> Option<Decimal> {
    let last_separator = raw.rfind(|character: char| character == '.' || character == ',');
    let normalized = match last_separator {
        Some(index) if raw.len() - index - 1 <= 2 => {
            let (integer, fraction) = raw.split_at(index);
            let integer: String = integer.chars().filter(char::is_ascii_digit).collect();
            format!("{integer}.{}", &fraction[1..])
        }
        _ => raw.chars().filter(char::is_ascii_digit).collect(),
    };
    Decimal::from_str(&normalized).ok()
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use rust_decimal::Decimal;

    use concierge_core::domain::response::Intent;

    use super::{extract_entities, parse_amount, IntentExtractor};

    #[test]
    fn classifies_common_portuguese_intents() {
        let extractor = IntentExtractor::new();

        assert_eq!(extractor.classify("Oi, bom dia!"), Intent::Greeting);
        assert_eq!(extractor.classify("Quanto custa o bolo de cenoura?"), Intent::Pricing);
        assert_eq!(extractor.classify("Cadê meu pedido?"), Intent::OrderStatus);
        assert_eq!(extractor.classify("Quero agendar uma retirada"), Intent::Scheduling);
        assert_eq!(extractor.classify("Muito obrigada, tchau"), Intent::Farewell);
        assert_eq!(extractor.classify("Vocês vendem pão sem glúten?"), Intent::General);
    }

    #[test]
    fn complaint_outranks_order_status() {
        let intent = IntentExtractor::new().classify("My order arrived broken");
        assert_eq!(intent, Intent::Complaint);
    }

    #[test]
    fn short_greetings_do_not_match_inside_words() {
        let extractor = IntentExtractor::new();
        assert_eq!(extractor.classify("Comprei oito pães"), Intent::General);
        assert_eq!(extractor.classify("this is fine"), Intent::General);
    }

    #[test]
    fn prefixes_cover_plural_and_inflected_forms() {
        assert_eq!(IntentExtractor::new().classify("Quais os preços?"), Intent::Pricing);
        assert_eq!(IntentExtractor::new().classify("Preciso de suporte"), Intent::Support);
    }

    #[test]
    fn extracts_contacts_and_brazilian_amounts() {
        let entities = extract_entities(
            "Meu email é maria.silva@example.com, telefone (11) 98765-4321. Paguei R$ 1.234,56",
        );

        assert_eq!(entities.emails, vec!["maria.silva@example.com".to_string()]);
        assert_eq!(entities.phones, vec!["(11) 98765-4321".to_string()]);
        assert_eq!(entities.amounts.len(), 1);
        assert_eq!(entities.amounts[0].currency, "BRL");
        assert_eq!(entities.amounts[0].value, Decimal::from_str("1234.56").expect("decimal"));
    }

    #[test]
    fn extracts_us_and_euro_amounts() {
        let entities = extract_entities("It was $1,299.90 plus €15 shipping");
        let values: Vec<(String, Decimal)> = entities
            .amounts
            .iter()
            .map(|amount| (amount.currency.clone(), amount.value))
            .collect();

        assert_eq!(
            values,
            vec![
                ("USD".to_string(), Decimal::from_str("1299.90").expect("decimal")),
                ("EUR".to_string(), Decimal::from(15)),
            ]
        );
        assert!(entities.phones.is_empty());
    }

    #[test]
    fn amount_parsing_distinguishes_thousands_from_cents() {
        assert_eq!(parse_amount("1.500"), Some(Decimal::from(1500)));
        assert_eq!(parse_amount("12,5"), Some(Decimal::from_str("12.5").expect("decimal")));
        assert_eq!(parse_amount("1500"), Some(Decimal::from(1500)));
    }

    #[test]
    fn messages_without_entities_yield_empty_set() {
        assert!(extract_entities("Bom dia, tudo bem?").is_empty());
    }
}
