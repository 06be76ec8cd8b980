use geolens_contracts::analysis::{ImagePayload, RockAnalysis, ROCK_ANALYSIS_FIELDS};
use geolens_contracts::error::{ContractError, ContractResult};
use geolens_contracts::models::ModelSpec;
use serde_json::{json, Map, Value};

use crate::transport::{RawReply, Transport, TransportRequest};

/// Upper bound on the thinking budget sent with identification requests.
pub const IDENTIFY_THINKING_BUDGET: u32 = 24_576;

pub fn identification_instruction(language: &str) -> String {
    format!(
        "Analyse the geological specimen (rock, mineral or crystal) in this photo in depth. \
Answer as a professional geologist and write every value only in {language}.
Return a single JSON object with exactly these fields, all required, all plain strings:
- name: the full scientific name
- category: the geological class (for example igneous, metamorphic, sedimentary, mineral)
- chemicalFormula: the chemical composition
- hardness: hardness on the Mohs scale
- description: physical and visual characteristics
- geologicalContext: how and where it forms
- rarity: how frequently it occurs in nature
- funFact: a little-known interesting fact about this specimen
Do not add any text outside the JSON object."
    )
}

/// Response schema requiring every analysis field as a string.
pub fn identification_schema() -> Value {
    let mut properties = Map::new();
    for field in ROCK_ANALYSIS_FIELDS {
        properties.insert(field.to_string(), json!({ "type": "STRING" }));
    }
    json!({
        "type": "OBJECT",
        "properties": properties,
        "required": ROCK_ANALYSIS_FIELDS,
        "propertyOrdering": ROCK_ANALYSIS_FIELDS,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentificationContract {
    model: String,
    language: String,
    thinking_budget: Option<u32>,
}

impl IdentificationContract {
    pub fn new(model: &ModelSpec, language: &str) -> Self {
        Self {
            model: model.name.clone(),
            language: language.to_string(),
            thinking_budget: model
                .thinking_budget
                .map(|budget| budget.min(IDENTIFY_THINKING_BUDGET)),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn build_request(&self, image: &ImagePayload) -> ContractResult<TransportRequest> {
        if image.is_empty() {
            return Err(ContractError::rejected("no image selected"));
        }
        Ok(TransportRequest::structured(
            &self.model,
            image.clone(),
            identification_instruction(&self.language),
            identification_schema(),
        )
        .with_thinking_budget(self.thinking_budget))
    }

    pub fn decode(reply: &RawReply) -> ContractResult<RockAnalysis> {
        RockAnalysis::from_reply_text(&reply.text)
    }

    pub fn identify(
        &self,
        transport: &dyn Transport,
        image: &ImagePayload,
    ) -> ContractResult<RockAnalysis> {
        let request = self.build_request(image)?;
        let reply = transport.call(&request)?;
        Self::decode(&reply)
    }
}
