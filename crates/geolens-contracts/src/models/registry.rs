use indexmap::IndexMap;

use super::{CONVERSATIONAL, GROUNDED, STRUCTURED, VISION};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub provider: String,
    pub capabilities: Vec<String>,
    pub context_window: Option<u64>,
    pub thinking_budget: Option<u32>,
}

impl ModelSpec {
    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|item| item == capability)
    }
}

#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
}

impl ModelRegistry {
    pub fn new(models: Option<IndexMap<String, ModelSpec>>) -> Self {
        Self {
            models: models.unwrap_or_else(default_models),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.models.get(name)
    }

    pub fn list(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.values()
    }

    pub fn by_capability(&self, capability: &str) -> Vec<ModelSpec> {
        self.models
            .values()
            .filter(|model| model.supports(capability))
            .cloned()
            .collect()
    }

    pub fn by_provider(&self, provider: &str) -> Vec<ModelSpec> {
        self.models
            .values()
            .filter(|model| model.provider == provider)
            .cloned()
            .collect()
    }

    pub fn ensure(&self, name: &str, capability: &str) -> Option<ModelSpec> {
        let model = self.get(name)?;
        if model.supports(capability) {
            return Some(model.clone());
        }
        None
    }
}

fn default_models() -> IndexMap<String, ModelSpec> {
    let mut map = IndexMap::new();

    let mut insert = |name: &str,
                      provider: &str,
                      capabilities: &[&str],
                      context_window: Option<u64>,
                      thinking_budget: Option<u32>| {
        map.insert(
            name.to_string(),
            ModelSpec {
                name: name.to_string(),
                provider: provider.to_string(),
                capabilities: capabilities
                    .iter()
                    .map(|item| (*item).to_string())
                    .collect(),
                context_window,
                thinking_budget,
            },
        );
    };

    insert(
        "gemini-2.5-flash-lite",
        "gemini",
        &[STRUCTURED, VISION, GROUNDED],
        Some(1_048_576),
        Some(24_576),
    );
    insert(
        "gemini-flash-lite-latest",
        "gemini",
        &[GROUNDED],
        Some(1_048_576),
        None,
    );
    insert(
        "gemini-2.5-flash",
        "gemini",
        &[CONVERSATIONAL, GROUNDED, STRUCTURED, VISION],
        Some(1_048_576),
        Some(24_576),
    );
    insert(
        "gemini-2.5-pro",
        "gemini",
        &[CONVERSATIONAL, GROUNDED, STRUCTURED, VISION],
        Some(1_048_576),
        Some(32_768),
    );
    insert(
        "dryrun-geo-1",
        "dryrun",
        &[STRUCTURED, VISION, GROUNDED, CONVERSATIONAL],
        Some(8192),
        None,
    );

    map
}
