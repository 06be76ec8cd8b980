use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ContractError, ContractResult};

/// Wire names of the identification schema, in display order.
pub const ROCK_ANALYSIS_FIELDS: [&str; 8] = [
    "name",
    "category",
    "chemicalFormula",
    "hardness",
    "description",
    "geologicalContext",
    "rarity",
    "funFact",
];

/// Sentinel uri assigned to grounding chunks without a resolvable link.
pub const UNRESOLVED_SOURCE_URI: &str = "#";

/// Image bytes selected by the user, plus the MIME type sent upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl ImagePayload {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }
}

/// Identification result. Only ever constructed fully populated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RockAnalysis {
    pub name: String,
    pub category: String,
    pub chemical_formula: String,
    pub hardness: String,
    pub description: String,
    pub geological_context: String,
    pub rarity: String,
    pub fun_fact: String,
}

impl RockAnalysis {
    /// Decodes a structured-generation reply body.
    ///
    /// Accepts a bare JSON object or one wrapped in a markdown code fence.
    /// Any missing, non-string, or blank field fails the whole decode.
    pub fn from_reply_text(text: &str) -> ContractResult<Self> {
        let body = strip_code_fence(text);
        if body.is_empty() {
            return Err(ContractError::decode("identification reply was empty"));
        }
        let value: Value = serde_json::from_str(&body)
            .map_err(|err| ContractError::decode(format!("identification reply is not JSON: {err}")))?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> ContractResult<Self> {
        let Some(object) = value.as_object() else {
            return Err(ContractError::decode(
                "identification reply is not a JSON object",
            ));
        };
        for field in ROCK_ANALYSIS_FIELDS {
            match object.get(field) {
                None | Some(Value::Null) => {
                    return Err(ContractError::decode(format!("field '{field}' is missing")));
                }
                Some(Value::String(text)) if text.trim().is_empty() => {
                    return Err(ContractError::decode(format!("field '{field}' is empty")));
                }
                Some(Value::String(_)) => {}
                Some(_) => {
                    return Err(ContractError::decode(format!(
                        "field '{field}' is not a string"
                    )));
                }
            }
        }
        let analysis: RockAnalysis = serde_json::from_value(value)
            .map_err(|err| ContractError::decode(err.to_string()))?;
        Ok(analysis.trimmed())
    }

    /// `(wire name, value)` pairs in schema order.
    pub fn fields(&self) -> [(&'static str, &str); 8] {
        [
            ("name", self.name.as_str()),
            ("category", self.category.as_str()),
            ("chemicalFormula", self.chemical_formula.as_str()),
            ("hardness", self.hardness.as_str()),
            ("description", self.description.as_str()),
            ("geologicalContext", self.geological_context.as_str()),
            ("rarity", self.rarity.as_str()),
            ("funFact", self.fun_fact.as_str()),
        ]
    }

    fn trimmed(self) -> Self {
        Self {
            name: self.name.trim().to_string(),
            category: self.category.trim().to_string(),
            chemical_formula: self.chemical_formula.trim().to_string(),
            hardness: self.hardness.trim().to_string(),
            description: self.description.trim().to_string(),
            geological_context: self.geological_context.trim().to_string(),
            rarity: self.rarity.trim().to_string(),
            fun_fact: self.fun_fact.trim().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundingSource {
    pub title: String,
    pub uri: String,
}

impl GroundingSource {
    /// Builds a source from an upstream citation, or `None` when the uri does
    /// not resolve. Untitled citations get `fallback_title`.
    pub fn from_citation(
        title: Option<&str>,
        uri: Option<&str>,
        fallback_title: &str,
    ) -> Option<Self> {
        let title = title
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(fallback_title);
        let uri = uri
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(UNRESOLVED_SOURCE_URI);
        if uri == UNRESOLVED_SOURCE_URI {
            return None;
        }
        Some(Self {
            title: title.to_string(),
            uri: uri.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsightResult {
    pub text: String,
    pub sources: Vec<GroundingSource>,
}

/// Unwraps a markdown code fence, dropping an info string such as `json`.
/// The closing fence may share a line with the body.
pub fn strip_code_fence(text: &str) -> String {
    let raw = text.trim();
    if raw.len() < 6 || !(raw.starts_with("```") && raw.ends_with("```")) {
        return raw.to_string();
    }
    let inner = raw[3..raw.len() - 3].trim_end_matches('`');
    let (info, body) = match inner.split_once('\n') {
        Some((info, rest)) if is_info_string(info) => (info.trim(), rest),
        Some(_) => ("", inner),
        None => ("", inner),
    };
    let body = body.trim();
    if info.is_empty() {
        if let Some(tag) = body.get(..4) {
            if tag.eq_ignore_ascii_case("json") {
                return body[4..].trim().to_string();
            }
        }
    }
    body.to_string()
}

fn is_info_string(line: &str) -> bool {
    line.trim()
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
}
