pub mod config;
pub mod conversation;
pub mod dryrun;
pub mod gemini;
pub mod identify;
pub mod image_input;
pub mod insight;
pub mod session;
pub mod transport;

#[cfg(test)]
mod testing;

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use geolens_contracts::analysis::{ImagePayload, InsightResult};
use geolens_contracts::error::ContractResult;
use geolens_contracts::events::{event_payload, EventPayload, EventWriter};
use geolens_contracts::models::{ModelSelection, ModelSelector};
use serde_json::{json, Value};

pub use config::EngineConfig;
pub use conversation::{ChatCopy, ConversationContract};
pub use identify::IdentificationContract;
pub use insight::InsightContract;
pub use session::{ChatSession, ChatSnapshot, ChatTurn, IdentifySession, IdentifySnapshot, ScanOutcome};
pub use transport::{default_transport_registry, Capability, Transport, TransportRegistry};

pub const DEFAULT_STRUCTURED_MODEL: &str = "gemini-2.5-flash-lite";
pub const DEFAULT_GROUNDED_MODEL: &str = "gemini-flash-lite-latest";
pub const DEFAULT_CHAT_MODEL: &str = "gemini-2.5-flash";

/// Wires configuration, transport and model choices into sessions.
pub struct GeoEngine {
    config: EngineConfig,
    events: EventWriter,
    transport: Arc<dyn Transport>,
    model_selector: ModelSelector,
    structured: ModelSelection,
    grounded: ModelSelection,
    conversational: ModelSelection,
}

impl GeoEngine {
    pub fn new(config: EngineConfig, events: EventWriter) -> Result<Self> {
        let transports = default_transport_registry(&config);
        let transport = transports.get(&config.transport).ok_or_else(|| {
            anyhow!(
                "unknown transport '{}' (available: {})",
                config.transport,
                transports.names().join(", ")
            )
        })?;
        Self::with_transport(config, events, transport)
    }

    pub fn with_transport(
        config: EngineConfig,
        events: EventWriter,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let model_selector = ModelSelector::new(None);
        let provider = provider_filter(&model_selector, transport.name());
        let structured = select_for(
            &model_selector,
            Capability::Structured,
            config.structured_model.as_deref(),
            provider.as_deref(),
        )?;
        let grounded = select_for(
            &model_selector,
            Capability::Grounded,
            config.grounded_model.as_deref(),
            provider.as_deref(),
        )?;
        let conversational = select_for(
            &model_selector,
            Capability::Conversational,
            config.chat_model.as_deref(),
            provider.as_deref(),
        )?;

        let engine = Self {
            config,
            events,
            transport,
            model_selector,
            structured,
            grounded,
            conversational,
        };
        engine.events.emit(
            "session_started",
            event_payload(json!({
                "transport": engine.transport.name(),
                "language": engine.config.language,
                "structured_model": engine.structured.model.name,
                "grounded_model": engine.grounded.model.name,
                "chat_model": engine.conversational.model.name,
                "fallback_reasons": engine.fallback_reasons(),
            })),
        )?;
        Ok(engine)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn transport_name(&self) -> &str {
        self.transport.name()
    }

    pub fn event_writer(&self) -> EventWriter {
        self.events.clone()
    }

    pub fn emit_event(&self, event_type: &str, payload: EventPayload) -> Result<Value> {
        self.events.emit(event_type, payload)
    }

    pub fn selection(&self, capability: Capability) -> &ModelSelection {
        match capability {
            Capability::Structured => &self.structured,
            Capability::Grounded => &self.grounded,
            Capability::Conversational => &self.conversational,
        }
    }

    /// Re-resolves the model for one capability. Existing sessions keep their
    /// contract until handed a fresh one.
    pub fn select_model(
        &mut self,
        capability: Capability,
        requested: &str,
    ) -> Result<&ModelSelection> {
        let provider = provider_filter(&self.model_selector, self.transport.name());
        let selection = select_for(
            &self.model_selector,
            capability,
            Some(requested),
            provider.as_deref(),
        )?;
        let slot = match capability {
            Capability::Structured => &mut self.structured,
            Capability::Grounded => &mut self.grounded,
            Capability::Conversational => &mut self.conversational,
        };
        *slot = selection;
        Ok(&*slot)
    }

    pub fn identification_contract(&self) -> IdentificationContract {
        IdentificationContract::new(&self.structured.model, &self.config.language)
    }

    pub fn insight_contract(&self) -> InsightContract {
        InsightContract::new(&self.grounded.model, &self.config.language)
    }

    pub fn conversation_contract(&self) -> ConversationContract {
        ConversationContract::new(&self.conversational.model, &self.config.language)
    }

    pub fn identify_session(&self) -> IdentifySession {
        IdentifySession::new(
            Arc::clone(&self.transport),
            self.identification_contract(),
            self.insight_contract(),
            self.events.clone(),
        )
    }

    pub fn chat_session(&self) -> ChatSession {
        ChatSession::new(
            Arc::clone(&self.transport),
            self.conversation_contract(),
            self.events.clone(),
        )
    }

    pub fn set_language(&mut self, language: &str) -> Result<()> {
        let language = language.trim();
        if language.is_empty() {
            bail!("language must not be empty");
        }
        self.config.language = language.to_string();
        Ok(())
    }

    /// One-off insight query outside any identify session.
    pub fn fetch_insights(&self, name: &str) -> ContractResult<InsightResult> {
        let contract = self.insight_contract();
        let result = contract.fetch(self.transport.as_ref(), name);
        match &result {
            Ok(insights) => self.events.emit_lossy(
                "insights_completed",
                event_payload(json!({
                    "model": contract.model(),
                    "name": name.trim(),
                    "sources": insights.sources.len(),
                })),
            ),
            Err(err) => self.events.emit_lossy(
                "insights_failed",
                event_payload(json!({
                    "model": contract.model(),
                    "name": name.trim(),
                    "kind": err.kind(),
                    "error": err.to_string(),
                })),
            ),
        }
        result
    }

    pub fn load_image(&self, path: &Path) -> Result<ImagePayload> {
        image_input::load_image_payload(path, self.config.max_image_dim)
    }

    fn fallback_reasons(&self) -> Vec<String> {
        [&self.structured, &self.grounded, &self.conversational]
            .iter()
            .filter_map(|selection| selection.fallback_reason.clone())
            .collect()
    }
}

/// Restricts selection to the transport's own models when it has any.
fn provider_filter(selector: &ModelSelector, transport: &str) -> Option<String> {
    if selector.registry.by_provider(transport).is_empty() {
        None
    } else {
        Some(transport.to_string())
    }
}

fn select_for(
    selector: &ModelSelector,
    capability: Capability,
    requested: Option<&str>,
    provider: Option<&str>,
) -> Result<ModelSelection> {
    let fallback = match provider {
        None | Some("gemini") => Some(default_model(capability)),
        Some(_) => None,
    };
    let mut selection = selector
        .select(requested.or(fallback), capability.as_str(), provider)
        .map_err(|err| anyhow!(err))?;
    if requested.is_none() && fallback.is_some() {
        selection.requested = None;
    }
    Ok(selection)
}

fn default_model(capability: Capability) -> &'static str {
    match capability {
        Capability::Structured => DEFAULT_STRUCTURED_MODEL,
        Capability::Grounded => DEFAULT_GROUNDED_MODEL,
        Capability::Conversational => DEFAULT_CHAT_MODEL,
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Arc;

    use geolens_contracts::analysis::ImagePayload;
    use geolens_contracts::chat::ChatRole;
    use geolens_contracts::error::ContractError;
    use geolens_contracts::events::EventWriter;
    use serde_json::Value;

    use super::{Capability, EngineConfig, GeoEngine};
    use crate::testing::{quartz_json, text, ScriptedTransport};

    fn dryrun_config() -> EngineConfig {
        EngineConfig {
            transport: "dryrun".to_string(),
            ..EngineConfig::default()
        }
    }

    #[test]
    fn gemini_defaults_pick_one_model_per_capability() -> anyhow::Result<()> {
        let engine = GeoEngine::new(EngineConfig::default(), EventWriter::disabled())?;
        assert_eq!(engine.transport_name(), "gemini");
        assert_eq!(
            engine.selection(Capability::Structured).model.name,
            "gemini-2.5-flash-lite"
        );
        assert_eq!(
            engine.selection(Capability::Grounded).model.name,
            "gemini-flash-lite-latest"
        );
        assert_eq!(
            engine.selection(Capability::Conversational).model.name,
            "gemini-2.5-flash"
        );
        assert!(engine.selection(Capability::Structured).fallback_reason.is_none());
        Ok(())
    }

    #[test]
    fn dryrun_transport_uses_dryrun_model() -> anyhow::Result<()> {
        let engine = GeoEngine::new(dryrun_config(), EventWriter::disabled())?;
        for capability in [
            Capability::Structured,
            Capability::Grounded,
            Capability::Conversational,
        ] {
            assert_eq!(engine.selection(capability).model.name, "dryrun-geo-1");
        }
        Ok(())
    }

    #[test]
    fn unknown_transport_is_an_error() {
        let config = EngineConfig {
            transport: "carrier-pigeon".to_string(),
            ..EngineConfig::default()
        };
        let err = GeoEngine::new(config, EventWriter::disabled())
            .err()
            .map(|err| err.to_string())
            .unwrap_or_default();
        assert!(err.contains("unknown transport 'carrier-pigeon'"));
        assert!(err.contains("dryrun, gemini"));
    }

    #[test]
    fn overrides_and_fallbacks_are_reported() -> anyhow::Result<()> {
        let config = EngineConfig {
            structured_model: Some("gemini-flash-lite-latest".to_string()),
            chat_model: Some("gemini-3-flash-preview".to_string()),
            ..EngineConfig::default()
        };
        let mut engine = GeoEngine::new(config, EventWriter::disabled())?;

        let structured = engine.selection(Capability::Structured);
        assert_eq!(structured.model.name, "gemini-2.5-flash-lite");
        assert!(structured.fallback_reason.is_some());

        let chat = engine.selection(Capability::Conversational);
        assert_eq!(chat.model.name, "gemini-3-flash-preview");
        assert!(chat.fallback_reason.is_some());

        let switched = engine.select_model(Capability::Grounded, "gemini-2.5-flash")?;
        assert_eq!(switched.model.name, "gemini-2.5-flash");
        assert_eq!(engine.insight_contract().model(), "gemini-2.5-flash");
        Ok(())
    }

    #[test]
    fn session_started_event_lists_models() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("logs").join("events.jsonl");
        let _engine = GeoEngine::new(
            dryrun_config(),
            EventWriter::new(Some(path.clone()), "session-7"),
        )?;
        let line = fs::read_to_string(&path)?;
        let event: Value = serde_json::from_str(line.trim())?;
        assert_eq!(event["type"], "session_started");
        assert_eq!(event["session_id"], "session-7");
        assert_eq!(event["transport"], "dryrun");
        assert_eq!(event["chat_model"], "dryrun-geo-1");
        Ok(())
    }

    #[test]
    fn quartz_scan_through_engine() -> anyhow::Result<()> {
        let transport = Arc::new(ScriptedTransport::new(vec![
            text(&quartz_json()),
            text("Quartz is mined in Brazil and Arkansas."),
        ]));
        let engine = GeoEngine::with_transport(
            EngineConfig::default(),
            EventWriter::disabled(),
            transport.clone(),
        )?;
        let session = engine.identify_session();
        session.select_image(ImagePayload::new(b"sample.jpg".to_vec(), "image/jpeg"))?;
        let outcome = session.scan()?;

        let values: Vec<&str> = outcome.analysis.fields().iter().map(|(_, v)| *v).collect();
        assert_eq!(values.len(), 8);
        assert!(values.iter().all(|value| !value.is_empty()));
        let requests = transport.requests();
        assert_eq!(requests[0].model, "gemini-2.5-flash-lite");
        assert_eq!(requests[1].model, "gemini-flash-lite-latest");
        assert!(requests[1].prompt.contains("Quartz"));
        Ok(())
    }

    #[test]
    fn identification_network_error_keeps_scan_available() -> anyhow::Result<()> {
        let transport = Arc::new(ScriptedTransport::new(vec![Err(ContractError::transport(
            "dns error: no such host",
        ))]));
        let engine = GeoEngine::with_transport(
            EngineConfig::default(),
            EventWriter::disabled(),
            transport,
        )?;
        let session = engine.identify_session();
        session.select_image(ImagePayload::new(vec![1, 2, 3], "image/png"))?;
        assert!(session.scan().is_err());
        let snapshot = session.snapshot();
        assert!(snapshot.analysis.is_none());
        assert!(!snapshot.busy);
        assert!(snapshot.image_digest.is_some());
        Ok(())
    }

    #[test]
    fn language_change_flows_into_new_contracts() -> anyhow::Result<()> {
        let mut engine = GeoEngine::new(dryrun_config(), EventWriter::disabled())?;
        assert!(engine.set_language("  ").is_err());
        engine.set_language("English")?;
        assert_eq!(engine.config().language, "English");
        let greeting = engine.chat_session().messages()[0].text.clone();
        assert!(greeting.starts_with("Hello!"));
        Ok(())
    }

    #[test]
    fn standalone_insights_drop_unresolved_sources() -> anyhow::Result<()> {
        let engine = GeoEngine::new(dryrun_config(), EventWriter::disabled())?;
        let insights = engine.fetch_insights("Basalt")?;
        assert!(insights.text.contains("Basalt"));
        assert_eq!(insights.sources.len(), 1);
        assert_eq!(engine.fetch_insights(" ").unwrap_err().kind(), "rejected");
        Ok(())
    }

    #[test]
    fn dryrun_chat_replies_to_salam() -> anyhow::Result<()> {
        let engine = GeoEngine::new(dryrun_config(), EventWriter::disabled())?;
        let chat = engine.chat_session();
        let turn = chat.send("Salam")?;
        assert!(turn.error.is_none());
        let messages = chat.messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].role, ChatRole::User);
        assert_eq!(messages[2].role, ChatRole::Model);
        assert!(messages[2].text.ends_with("Salam"));
        Ok(())
    }
}
