use std::collections::BTreeMap;
use std::sync::Arc;

use geolens_contracts::analysis::ImagePayload;
use geolens_contracts::chat::ChatRole;
use geolens_contracts::error::ContractResult;
use geolens_contracts::models;
use serde_json::Value;

use crate::config::EngineConfig;
use crate::dryrun::DryrunTransport;
use crate::gemini::GeminiTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Structured,
    Grounded,
    Conversational,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Structured => models::STRUCTURED,
            Self::Grounded => models::GROUNDED,
            Self::Conversational => models::CONVERSATIONAL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryTurn {
    pub role: ChatRole,
    pub text: String,
}

/// One outbound call: target capability, payload, and per-capability config.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportRequest {
    pub capability: Capability,
    pub model: String,
    pub prompt: String,
    pub image: Option<ImagePayload>,
    pub history: Vec<HistoryTurn>,
    pub response_schema: Option<Value>,
    pub web_search: bool,
    pub system_instruction: Option<String>,
    pub thinking_budget: Option<u32>,
}

impl TransportRequest {
    fn base(capability: Capability, model: &str, prompt: String) -> Self {
        Self {
            capability,
            model: model.to_string(),
            prompt,
            image: None,
            history: Vec::new(),
            response_schema: None,
            web_search: false,
            system_instruction: None,
            thinking_budget: None,
        }
    }

    pub fn structured(model: &str, image: ImagePayload, prompt: String, schema: Value) -> Self {
        let mut request = Self::base(Capability::Structured, model, prompt);
        request.image = Some(image);
        request.response_schema = Some(schema);
        request
    }

    pub fn grounded(model: &str, prompt: String) -> Self {
        let mut request = Self::base(Capability::Grounded, model, prompt);
        request.web_search = true;
        request
    }

    pub fn conversational(
        model: &str,
        persona: &str,
        history: Vec<HistoryTurn>,
        text: String,
    ) -> Self {
        let mut request = Self::base(Capability::Conversational, model, text);
        request.system_instruction = Some(persona.to_string());
        request.history = history;
        request
    }

    pub fn with_thinking_budget(mut self, budget: Option<u32>) -> Self {
        self.thinking_budget = budget;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawCitation {
    pub title: Option<String>,
    pub uri: Option<String>,
}

/// Upstream reply, reduced to what the contracts read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawReply {
    pub text: String,
    pub citations: Vec<RawCitation>,
    pub finish_reason: Option<String>,
    pub model: String,
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
}

pub trait Transport: Send + Sync {
    fn name(&self) -> &str;
    fn call(&self, request: &TransportRequest) -> ContractResult<RawReply>;
}

#[derive(Default)]
pub struct TransportRegistry {
    transports: BTreeMap<String, Arc<dyn Transport>>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: Transport + 'static>(&mut self, transport: T) {
        self.transports
            .insert(transport.name().to_string(), Arc::new(transport));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Transport>> {
        self.transports.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.transports.keys().cloned().collect()
    }
}

pub fn default_transport_registry(config: &EngineConfig) -> TransportRegistry {
    let mut transports = TransportRegistry::new();
    transports.register(DryrunTransport);
    transports.register(GeminiTransport::new(config));
    transports
}
