use geolens_contracts::analysis::{GroundingSource, InsightResult};
use geolens_contracts::error::{ContractError, ContractResult};
use geolens_contracts::language::source_title_for_language;
use geolens_contracts::models::ModelSpec;

use crate::transport::{RawReply, Transport, TransportRequest};

pub fn insight_query(name: &str, language: &str) -> String {
    format!(
        "Find current geological and market information about {name}.
In particular cover the main countries where it is found, its industrial or jewellery importance, and any recent scientific news.
Write the answer only in {language}."
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsightContract {
    model: String,
    language: String,
}

impl InsightContract {
    pub fn new(model: &ModelSpec, language: &str) -> Self {
        Self {
            model: model.name.clone(),
            language: language.to_string(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn build_request(&self, name: &str) -> ContractResult<TransportRequest> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ContractError::rejected("specimen name is empty"));
        }
        Ok(TransportRequest::grounded(
            &self.model,
            insight_query(name, &self.language),
        ))
    }

    /// Citations without a usable uri are dropped; order is preserved.
    /// Untitled ones are named in the answer language.
    pub fn decode(&self, reply: &RawReply) -> ContractResult<InsightResult> {
        let text = reply.text.trim();
        if text.is_empty() {
            return Err(ContractError::decode("insight reply carried no text"));
        }
        let fallback_title = source_title_for_language(&self.language);
        let sources = reply
            .citations
            .iter()
            .filter_map(|citation| {
                GroundingSource::from_citation(
                    citation.title.as_deref(),
                    citation.uri.as_deref(),
                    fallback_title,
                )
            })
            .collect();
        Ok(InsightResult {
            text: text.to_string(),
            sources,
        })
    }

    pub fn fetch(&self, transport: &dyn Transport, name: &str) -> ContractResult<InsightResult> {
        let request = self.build_request(name)?;
        let reply = transport.call(&request)?;
        self.decode(&reply)
    }
}
