use std::env;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub use geolens_contracts::language::DEFAULT_LANGUAGE;

pub const API_KEY_ENV_VARS: &[&str] = &["GEMINI_API_KEY", "GOOGLE_API_KEY", "API_KEY"];

/// Process-level settings, read from the environment and overridable by flags.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub transport: String,
    pub api_base: String,
    pub language: String,
    pub structured_model: Option<String>,
    pub grounded_model: Option<String>,
    pub chat_model: Option<String>,
    pub request_timeout_s: f64,
    pub transport_retries: usize,
    pub retry_backoff_s: f64,
    pub max_image_dim: Option<u32>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            transport: "gemini".to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            language: DEFAULT_LANGUAGE.to_string(),
            structured_model: None,
            grounded_model: None,
            chat_model: None,
            request_timeout_s: 90.0,
            transport_retries: 0,
            retry_backoff_s: 1.2,
            max_image_dim: None,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            transport: defaults.transport,
            api_base: non_empty_env("GEMINI_API_BASE")
                .map(|value| value.trim_end_matches('/').to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or(defaults.api_base),
            language: non_empty_env("GEOLENS_LANGUAGE").unwrap_or(defaults.language),
            structured_model: non_empty_env("GEOLENS_STRUCTURED_MODEL"),
            grounded_model: non_empty_env("GEOLENS_GROUNDED_MODEL"),
            chat_model: non_empty_env("GEOLENS_CHAT_MODEL"),
            request_timeout_s: env_f64_clamped(
                "GEOLENS_REQUEST_TIMEOUT",
                defaults.request_timeout_s,
                15.0,
                300.0,
            ),
            transport_retries: env_f64_clamped(
                "GEOLENS_TRANSPORT_RETRIES",
                defaults.transport_retries as f64,
                0.0,
                4.0,
            )
            .round() as usize,
            retry_backoff_s: env_f64_clamped(
                "GEOLENS_RETRY_BACKOFF",
                defaults.retry_backoff_s,
                0.1,
                10.0,
            ),
            max_image_dim: non_empty_env("GEOLENS_MAX_IMAGE_DIM")
                .and_then(|value| value.parse::<u32>().ok())
                .filter(|value| *value > 0)
                .map(|value| value.max(128)),
        }
    }
}

pub fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn first_non_empty_env(keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| non_empty_env(key))
}

fn env_f64_clamped(key: &str, default: f64, min: f64, max: f64) -> f64 {
    parse_f64_clamped(non_empty_env(key).as_deref(), default, min, max)
}

pub(crate) fn parse_f64_clamped(raw: Option<&str>, default: f64, min: f64, max: f64) -> f64 {
    let Some(parsed) = raw.and_then(|value| value.trim().parse::<f64>().ok()) else {
        return default;
    };
    if !parsed.is_finite() {
        return default;
    }
    parsed.clamp(min, max)
}
