use geolens_contracts::chat::ChatRole;
use geolens_contracts::error::{ContractError, ContractResult};
use geolens_contracts::language::is_azerbaijani;
use geolens_contracts::models::ModelSpec;

use crate::transport::{HistoryTurn, Transport, TransportRequest};

pub fn persona_instruction(language: &str) -> String {
    format!(
        "You are a professional, experienced geologist and mineralogist named \"GeoLens Geological Assistant\". \
Answer questions about geology, minerals, gemstones and earth science in depth and in an engaging way. \
Be scientifically accurate but easy to understand. Reply only in {language}."
    )
}

/// User-facing fixed strings of the chat screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatCopy {
    pub greeting: String,
    pub empty_reply: String,
    pub apology: String,
}

impl ChatCopy {
    pub fn for_language(language: &str) -> Self {
        if is_azerbaijani(language) {
            return Self {
                greeting: "Salam! Mən sizin rəqəmsal geoloqunuzam. Minerallar, süxur növləri, Yerin geoloji dövrləri və ya xüsusi daşların xassələri haqqında suallarınızı cavablaya bilərəm. Nədən başlayaq?".to_string(),
                empty_reply: "Üzr istəyirəm, hal-hazırda geoloji verilənlər bazasına daxil ola bilmirəm.".to_string(),
                apology: "Sistemdə texniki gecikmə yarandı. Zəhmət olmasa bir qədər sonra yenidən soruşun.".to_string(),
            };
        }
        Self {
            greeting: "Hello! I am your digital geologist. Ask me about minerals, rock types, the geological eras of the Earth or the properties of particular stones. Where shall we start?".to_string(),
            empty_reply: "Sorry, I cannot reach the geological database right now.".to_string(),
            apology: "The system hit a technical delay. Please ask again in a little while.".to_string(),
        }
    }
}

/// Conversational contract holding the resent turn history.
#[derive(Debug, Clone)]
pub struct ConversationContract {
    model: String,
    persona: String,
    copy: ChatCopy,
    history: Vec<HistoryTurn>,
}

impl ConversationContract {
    pub fn new(model: &ModelSpec, language: &str) -> Self {
        Self {
            model: model.name.clone(),
            persona: persona_instruction(language),
            copy: ChatCopy::for_language(language),
            history: Vec::new(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn copy(&self) -> &ChatCopy {
        &self.copy
    }

    pub fn history(&self) -> &[HistoryTurn] {
        &self.history
    }

    pub fn build_request(&self, text: &str) -> ContractResult<TransportRequest> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ContractError::rejected("chat message is empty"));
        }
        Ok(TransportRequest::conversational(
            &self.model,
            &self.persona,
            self.history.clone(),
            text.to_string(),
        ))
    }

    /// Sends one turn and returns the text to show, which may be the
    /// empty-reply fallback. History only grows when the model said something.
    pub fn send(&mut self, transport: &dyn Transport, text: &str) -> ContractResult<String> {
        let request = self.build_request(text)?;
        let reply = transport.call(&request)?;
        Ok(self.accept_reply(&request.prompt, &reply.text))
    }

    /// Text to show for a raw reply. A non-empty reply is recorded as an
    /// exchange; the local fallback copy never enters history.
    pub fn accept_reply(&mut self, user_text: &str, raw: &str) -> String {
        let shown = self.reply_text(raw);
        if !raw.trim().is_empty() {
            self.record_exchange(user_text, &shown);
        }
        shown
    }

    fn reply_text(&self, raw: &str) -> String {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            self.copy.empty_reply.clone()
        } else {
            trimmed.to_string()
        }
    }

    fn record_exchange(&mut self, user_text: &str, model_text: &str) {
        self.history.push(HistoryTurn {
            role: ChatRole::User,
            text: user_text.to_string(),
        });
        self.history.push(HistoryTurn {
            role: ChatRole::Model,
            text: model_text.to_string(),
        });
    }
}
