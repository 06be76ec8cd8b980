use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use geolens_contracts::chat::ChatRole;
use geolens_contracts::error::{ContractError, ContractResult};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Map, Value};

use crate::config::{first_non_empty_env, EngineConfig, API_KEY_ENV_VARS};
use crate::transport::{Capability, RawCitation, RawReply, Transport, TransportRequest};

const API_KEY_HEADER: &str = "x-goog-api-key";
const REDACTED: &str = "[redacted]";

/// `generateContent` transport for the Gemini REST API.
///
/// The key travels in a header so it never appears in URLs, and any text
/// derived from a failed call has it masked before leaving the transport.
pub struct GeminiTransport {
    api_base: String,
    http: HttpClient,
    request_timeout_s: f64,
    transport_retries: usize,
    retry_backoff_s: f64,
    api_key_vars: &'static [&'static str],
}

impl GeminiTransport {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            api_base: config.api_base.trim().trim_end_matches('/').to_string(),
            http: HttpClient::new(),
            request_timeout_s: config.request_timeout_s,
            transport_retries: config.transport_retries,
            retry_backoff_s: config.retry_backoff_s,
            api_key_vars: API_KEY_ENV_VARS,
        }
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    fn build_payload(request: &TransportRequest) -> Value {
        let mut contents: Vec<Value> = request
            .history
            .iter()
            .map(|turn| {
                json!({
                    "role": role_name(turn.role),
                    "parts": [{ "text": turn.text }],
                })
            })
            .collect();

        let mut parts = Vec::new();
        if let Some(image) = request.image.as_ref() {
            parts.push(json!({
                "inlineData": {
                    "mimeType": image.mime_type,
                    "data": BASE64.encode(&image.bytes),
                }
            }));
        }
        parts.push(json!({ "text": request.prompt }));
        contents.push(json!({ "role": "user", "parts": parts }));

        let mut payload = Map::new();
        payload.insert("contents".to_string(), Value::Array(contents));

        if let Some(instruction) = request.system_instruction.as_ref() {
            payload.insert(
                "systemInstruction".to_string(),
                json!({ "parts": [{ "text": instruction }] }),
            );
        }

        if request.web_search {
            payload.insert("tools".to_string(), json!([{ "googleSearch": {} }]));
        }

        let mut generation_config = Map::new();
        if let Some(schema) = request.response_schema.as_ref() {
            generation_config.insert(
                "responseMimeType".to_string(),
                Value::String("application/json".to_string()),
            );
            generation_config.insert("responseSchema".to_string(), schema.clone());
        }
        if let Some(budget) = request.thinking_budget {
            generation_config.insert(
                "thinkingConfig".to_string(),
                json!({ "thinkingBudget": budget }),
            );
        }
        if !generation_config.is_empty() {
            payload.insert(
                "generationConfig".to_string(),
                Value::Object(generation_config),
            );
        }

        Value::Object(payload)
    }

    fn post_with_transport_retries(
        &self,
        endpoint: &str,
        api_key: &str,
        payload: &Value,
    ) -> Result<HttpResponse> {
        for attempt in 0..=self.transport_retries {
            let response = self
                .http
                .post(endpoint)
                .header(API_KEY_HEADER, api_key)
                .timeout(Duration::from_secs_f64(self.request_timeout_s))
                .json(payload)
                .send();

            match response {
                Ok(ok) => return Ok(ok),
                Err(raw) => {
                    let err = anyhow::Error::new(raw.without_url())
                        .context(format!("Gemini request failed ({endpoint})"));
                    if !is_retryable_transport_error(&err) || attempt >= self.transport_retries {
                        return Err(err);
                    }
                    eprintln!(
                        "Gemini transport retry {}/{} after transient request failure.",
                        attempt + 1,
                        self.transport_retries
                    );
                    let delay_s = self.retry_backoff_s * (attempt as f64 + 1.0);
                    thread::sleep(Duration::from_secs_f64(delay_s));
                }
            }
        }

        bail!("Gemini request was never attempted ({endpoint})")
    }

    fn decode_reply(model: &str, payload: &Value) -> Result<RawReply> {
        let usage = payload.get("usageMetadata");
        let mut reply = RawReply {
            model: payload
                .get("modelVersion")
                .and_then(Value::as_str)
                .unwrap_or(model)
                .to_string(),
            input_tokens: usage
                .and_then(|usage| usage.get("promptTokenCount"))
                .and_then(Value::as_i64),
            output_tokens: usage
                .and_then(|usage| usage.get("candidatesTokenCount"))
                .and_then(Value::as_i64),
            ..RawReply::default()
        };

        let Some(candidate) = payload
            .get("candidates")
            .and_then(Value::as_array)
            .and_then(|rows| rows.first())
        else {
            if let Some(reason) = payload
                .pointer("/promptFeedback/blockReason")
                .and_then(Value::as_str)
            {
                bail!("Gemini blocked the prompt ({reason})");
            }
            return Ok(reply);
        };

        reply.text = candidate
            .pointer("/content/parts")
            .and_then(Value::as_array)
            .map(|parts| {
                parts
                    .iter()
                    .filter(|part| !part.get("thought").and_then(Value::as_bool).unwrap_or(false))
                    .filter_map(|part| part.get("text").and_then(Value::as_str))
                    .collect::<String>()
            })
            .unwrap_or_default();
        reply.finish_reason = candidate
            .get("finishReason")
            .and_then(Value::as_str)
            .map(str::to_string);
        reply.citations = candidate
            .pointer("/groundingMetadata/groundingChunks")
            .and_then(Value::as_array)
            .map(|chunks| {
                chunks
                    .iter()
                    .map(|chunk| RawCitation {
                        title: chunk
                            .pointer("/web/title")
                            .and_then(Value::as_str)
                            .map(str::to_string),
                        uri: chunk
                            .pointer("/web/uri")
                            .and_then(Value::as_str)
                            .map(str::to_string),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(reply)
    }

    fn call_inner(&self, request: &TransportRequest, api_key: &str) -> Result<RawReply> {
        if request.capability == Capability::Structured && request.image.is_none() {
            bail!("structured request carries no image");
        }
        let endpoint = self.endpoint_for_model(&request.model);
        let payload = Self::build_payload(request);
        let response = self.post_with_transport_retries(&endpoint, api_key, &payload)?;
        let response_payload = response_json_or_error("Gemini", response)?;
        Self::decode_reply(&request.model, &response_payload)
    }
}

impl Transport for GeminiTransport {
    fn name(&self) -> &str {
        "gemini"
    }

    fn call(&self, request: &TransportRequest) -> ContractResult<RawReply> {
        let Some(api_key) = first_non_empty_env(self.api_key_vars) else {
            return Err(ContractError::transport(format!(
                "{} not set",
                self.api_key_vars.join(" or ")
            )));
        };
        self.call_inner(request, &api_key).map_err(|err| {
            let text = redact_secret(&error_chain_text(&err, usize::MAX), &api_key);
            ContractError::transport(truncate_text(&text, 600))
        })
    }
}

fn role_name(role: ChatRole) -> &'static str {
    match role {
        ChatRole::User => "user",
        ChatRole::Model => "model",
    }
}

fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{provider} request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}

fn is_retryable_transport_error(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<reqwest::Error>()
            .map(|reqwest_err| {
                reqwest_err.is_timeout() || reqwest_err.is_connect() || reqwest_err.is_request()
            })
            .unwrap_or(false)
    })
}

pub(crate) fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts
            .last()
            .map(|existing| existing == trimmed)
            .unwrap_or(false)
        {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

fn redact_secret(text: &str, secret: &str) -> String {
    if secret.is_empty() {
        return text.to_string();
    }
    text.replace(secret, REDACTED)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
