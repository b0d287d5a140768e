/// Language used for canned replies; Portuguese unless the tag says English.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplyLanguage {
    Portuguese,
    English,
}

impl ReplyLanguage {
    pub fn from_tag(tag: &str) -> Self {
        if tag.trim().to_ascii_lowercase().starts_with("en") {
            Self::English
        } else {
            Self::Portuguese
        }
    }

    pub fn escalation(&self) -> &'static str {
        match self {
            Self::Portuguese => {
                "Entendo a sua situação e quero garantir que você receba a melhor ajuda. \
                 Vou transferir a nossa conversa para um atendente humano, que vai continuar \
                 o seu atendimento em instantes."
            }
            Self::English => {
                "I understand your situation and want to make sure you get the best help. \
                 I'm transferring this conversation to a human agent who will follow up \
                 with you shortly."
            }
        }
    }

    pub fn fallback(&self) -> &'static str {
        match self {
            Self::Portuguese => {
                "Desculpe, não consegui processar a sua mensagem agora. \
                 Um atendente humano vai dar continuidade ao seu atendimento em breve."
            }
            Self::English => {
                "Sorry, I couldn't process your message right now. \
                 A human agent will follow up with you shortly."
            }
        }
    }

    pub fn filtered(&self) -> &'static str {
        match self {
            Self::Portuguese => {
                "Desculpe, não posso compartilhar essa informação por aqui. \
                 Vou encaminhar a sua solicitação para um atendente humano."
            }
            Self::English => {
                "Sorry, I can't share that information here. \
                 I'm forwarding your request to a human agent."
            }
        }
    }

    pub fn verification_disclaimer(&self) -> &'static str {
        match self {
            Self::Portuguese => {
                "\n\n_Posso não ter todas as informações. Se precisar, confirme com a nossa equipe._"
            }
            Self::English => {
                "\n\n_I may not have complete information. Please confirm with our team if needed._"
            }
        }
    }
}
