use std::fmt::Write as _;

use concierge_core::domain::assistant::Assistant;
use concierge_core::domain::customer::CustomerProfile;
use concierge_core::domain::message::{Message, MessageRole};

use crate::llm::{ChatTurn, TurnRole};
use crate::retrieval::KnowledgeSnippet;

const RESPONSE_RULES: &[&str] = &[
    "Answer only with information from the knowledge context or the conversation.",
    "If you do not know the answer, say so and offer to connect the customer with a person.",
    "Keep replies short and suitable for a chat message.",
    "Never ask for passwords, card numbers or other credentials.",
];

/// Assembles the system prompt from the assistant persona and the derived customer profile.
pub fn build_system_prompt(assistant: &Assistant, profile: &CustomerProfile) -> String {
    let mut prompt = String::new();
    let base = assistant.system_prompt.trim();
    if !base.is_empty() {
        prompt.push_str(base);
        prompt.push_str("\n\n");
    }

    let _ = writeln!(
        prompt,
        "You are {}, the virtual assistant of {}.",
        assistant.name, assistant.business_name
    );
    let _ = writeln!(prompt, "Reply in {}.", profile.preferred_language);

    prompt.push_str("\nCustomer:\n");
    if let Some(name) = profile.name.as_deref().filter(|name| !name.trim().is_empty()) {
        let _ = writeln!(prompt, "- name: {}", name.trim());
    }
    let _ = writeln!(prompt, "- sentiment: {}", profile.sentiment.as_str());
    let _ = writeln!(prompt, "- previous messages: {}", profile.previous_interactions);

    prompt.push_str("\nRules:\n");
    for rule in RESPONSE_RULES {
        let _ = writeln!(prompt, "- {rule}");
    }

    prompt.trim_end().to_string()
}

/// Numbers retrieved snippets so the model can cite them. Empty when nothing was found.
pub fn build_context_text(snippets: &[KnowledgeSnippet]) -> String {
    if snippets.is_empty() {
        return String::new();
    }

    let mut context = String::from("Knowledge context:\n");
    for (index, snippet) in snippets.iter().enumerate() {
        let _ = writeln!(
            context,
            "[{}] ({}:{}) {}",
            index + 1,
            snippet.source,
            snippet.source_id,
            snippet.content.trim()
        );
    }
    context.trim_end().to_string()
}

/// Maps stored history onto model turns. Human agent replies read as assistant turns.
pub fn history_turns(history: &[Message]) -> Vec<ChatTurn> {
    history
        .iter()
        .filter(|message| !message.content.trim().is_empty())
        .map(|message| ChatTurn {
            role: match message.role {
                MessageRole::Customer => TurnRole::User,
                MessageRole::Assistant | MessageRole::Agent => TurnRole::Assistant,
            },
            content: message.content.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use concierge_core::domain::assistant::{Assistant, AssistantId, BusinessId};
    use concierge_core::domain::conversation::ConversationId;
    use concierge_core::domain::customer::{CustomerProfile, Sentiment};
    use concierge_core::domain::message::{Message, MessageRole};

    use super::{build_context_text, build_system_prompt, history_turns};
    use crate::llm::TurnRole;
    use crate::retrieval::KnowledgeSnippet;

    fn profile(name: Option<&str>) -> CustomerProfile {
        CustomerProfile {
            name: name.map(str::to_string),
            phone: None,
            previous_interactions: 3,
            sentiment: Sentiment::Negative,
            preferred_language: "pt-BR".to_string(),
        }
    }

    #[test]
    fn system_prompt_carries_persona_profile_and_rules() {
        let assistant = Assistant::new(
            AssistantId::new("a1"),
            BusinessId::new("b1"),
            "Luna",
            "Padaria Central",
            "Seja cordial.",
        );

        let prompt = build_system_prompt(&assistant, &profile(Some("Maria")));

        assert!(prompt.starts_with("Seja cordial."));
        assert!(prompt.contains("You are Luna, the virtual assistant of Padaria Central."));
        assert!(prompt.contains("Reply in pt-BR."));
        assert!(prompt.contains("- name: Maria"));
        assert!(prompt.contains("- sentiment: negative"));
        assert!(prompt.contains("- previous messages: 3"));
        assert!(prompt.contains("Rules:"));
    }

    #[test]
    fn anonymous_customer_has_no_name_line() {
        let assistant =
            Assistant::new(AssistantId::new("a1"), BusinessId::new("b1"), "Luna", "Padaria", "");
        let prompt = build_system_prompt(&assistant, &profile(None));
        assert!(!prompt.contains("- name:"));
        assert!(prompt.starts_with("You are Luna"));
    }

    #[test]
    fn context_text_numbers_snippets_with_sources() {
        let snippets = vec![
            KnowledgeSnippet {
                content: "Abrimos às 7h.".to_string(),
                score: 0.9,
                source: "faq".to_string(),
                source_id: "hours".to_string(),
            },
            KnowledgeSnippet {
                content: "Entregamos no bairro.".to_string(),
                score: 0.5,
                source: "faq".to_string(),
                source_id: "delivery".to_string(),
            },
        ];

        let context = build_context_text(&snippets);

        assert_eq!(
            context,
            "Knowledge context:\n[1] (faq:hours) Abrimos às 7h.\n[2] (faq:delivery) Entregamos no bairro."
        );
        assert!(build_context_text(&[]).is_empty());
    }

    #[test]
    fn history_maps_roles_and_skips_blank_messages() {
        let conversation = ConversationId::new("c1");
        let now = Utc::now();
        let mut agent = Message::assistant(conversation.clone(), "Sou a Ana, da loja.", now);
        agent.role = MessageRole::Agent;
        let history = vec![
            Message::customer(conversation.clone(), "Oi", now),
            Message::assistant(conversation.clone(), "  ", now),
            agent,
        ];

        let turns = history_turns(&history);

        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, TurnRole::User);
        assert_eq!(turns[1].role, TurnRole::Assistant);
        assert_eq!(turns[1].content, "Sou a Ana, da loja.");
    }
}
