use super::registry::{ModelRegistry, ModelSpec};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub model: ModelSpec,
    pub requested: Option<String>,
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ModelSelector {
    pub registry: ModelRegistry,
}

impl ModelSelector {
    pub fn new(registry: Option<ModelRegistry>) -> Self {
        Self {
            registry: registry.unwrap_or_else(|| ModelRegistry::new(None)),
        }
    }

    /// Resolves `requested` for `capability`, falling back to the first
    /// capable model. When `provider` is given only its models are eligible.
    pub fn select(
        &self,
        requested: Option<&str>,
        capability: &str,
        provider: Option<&str>,
    ) -> Result<ModelSelection, String> {
        let eligible = |model: &ModelSpec| provider.map(|name| model.provider == name).unwrap_or(true);
        let requested = requested.map(str::trim).filter(|value| !value.is_empty());

        let (fallback_reason, requested_text) = if let Some(requested_value) = requested {
            if let Some(model) = self
                .registry
                .ensure(requested_value, capability)
                .filter(|model| eligible(model))
            {
                return Ok(ModelSelection {
                    model,
                    requested: Some(requested_value.to_string()),
                    fallback_reason: None,
                });
            }
            if self.registry.get(requested_value).is_none() && provider.is_some() {
                // Unregistered names are passed through for the chosen provider.
                return Ok(ModelSelection {
                    model: ModelSpec {
                        name: requested_value.to_string(),
                        provider: provider.unwrap_or_default().to_string(),
                        capabilities: vec![capability.to_string()],
                        context_window: None,
                        thinking_budget: None,
                    },
                    requested: Some(requested_value.to_string()),
                    fallback_reason: Some(format!(
                        "Model '{requested_value}' is not registered; passing it through unchanged."
                    )),
                });
            }
            (
                Some(format!(
                    "Requested model '{requested_value}' unavailable for capability '{capability}'."
                )),
                Some(requested_value.to_string()),
            )
        } else {
            (Some("No model specified; using default.".to_string()), None)
        };

        let candidates = self.registry.by_capability(capability);
        let Some(model) = candidates.into_iter().find(|model| eligible(model)) else {
            return Err(format!(
                "No models available for capability '{capability}'."
            ));
        };
        Ok(ModelSelection {
            model,
            requested: requested_text,
            fallback_reason,
        })
    }
}
