use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde_json::{json, Value};
use thiserror::Error;

use flowops_core::config::LlmConfig;

/// How much of a malformed model response makes it into the error message.
const SNIPPET_LEN: usize = 300;

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("no API key configured; set llm.api_key or FLOWOPS_LLM_API_KEY")]
    MissingApiKey,
    #[error("generation request timed out after {0}s")]
    Timeout(u64),
    #[error("generation request failed: {0}")]
    Http(String),
    #[error("generation endpoint returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed generation output: {0}")]
    MalformedOutput(String),
}

/// One structured-output request. The schema is enforced server side, so
/// a successful response is already shaped JSON.
pub struct GenerateRequest<'a> {
    pub system: String,
    pub user: String,
    pub schema_name: &'static str,
    pub schema: &'a Value,
}

#[async_trait]
pub trait StructuredGenerator: Send + Sync {
    async fn generate(&self, request: GenerateRequest<'_>) -> Result<Value, GenerateError>;
}

/// Client for an OpenAI-compatible `/responses` endpoint with JSON-schema
/// structured outputs.
pub struct OpenAiGenerator {
    client: reqwest::Client,
    config: LlmConfig,
}

impl OpenAiGenerator {
    pub fn new(config: LlmConfig) -> Self {
        Self { client: reqwest::Client::new(), config }
    }
}

#[async_trait]
impl StructuredGenerator for OpenAiGenerator {
    async fn generate(&self, request: GenerateRequest<'_>) -> Result<Value, GenerateError> {
        let api_key = self.config.api_key.as_ref().ok_or(GenerateError::MissingApiKey)?;

        let body = json!({
            "model": self.config.model,
            "input": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.user },
            ],
            "text": {
                "format": {
                    "type": "json_schema",
                    "name": request.schema_name,
                    "strict": true,
                    "schema": request.schema,
                }
            },
        });

        let url = format!("{}/responses", self.config.base_url.trim_end_matches('/'));
        let timeout = std::time::Duration::from_secs(self.config.timeout_secs);

        let send = self
            .client
            .post(&url)
            .bearer_auth(api_key.expose_secret())
            .json(&body)
            .send();

        let response = tokio::time::timeout(timeout, send)
            .await
            .map_err(|_| GenerateError::Timeout(self.config.timeout_secs))?
            .map_err(|err| GenerateError::Http(err.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|err| GenerateError::Http(err.to_string()))?;

        if !status.is_success() {
            return Err(GenerateError::Status {
                status: status.as_u16(),
                body: snippet(&text),
            });
        }

        let envelope: Value = serde_json::from_str(&text)
            .map_err(|_| GenerateError::MalformedOutput(snippet(&text)))?;
        let output = extract_output_text(&envelope)
            .ok_or_else(|| GenerateError::MalformedOutput(snippet(&text)))?;

        serde_json::from_str(output).map_err(|_| GenerateError::MalformedOutput(snippet(output)))
    }
}

/// Pulls the model's text out of a `/responses` envelope. Prefers the
/// convenience `output_text` field and falls back to walking the output
/// items.
pub(crate) fn extract_output_text(envelope: &Value) -> Option<&str> {
    if let Some(text) = envelope.get("output_text").and_then(Value::as_str) {
        if !text.is_empty() {
            return Some(text);
        }
    }

    let items = envelope.get("output")?.as_array()?;
    for item in items {
        if item.get("type").and_then(Value::as_str) != Some("message") {
            continue;
        }
        let parts = item.get("content")?.as_array()?;
        for part in parts {
            if part.get("type").and_then(Value::as_str) == Some("output_text") {
                if let Some(text) = part.get("text").and_then(Value::as_str) {
                    return Some(text);
                }
            }
        }
    }
    None
}

fn snippet(text: &str) -> String {
    if text.len() <= SNIPPET_LEN {
        return text.to_string();
    }
    let mut end = SNIPPET_LEN;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &text[..end])
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{extract_output_text, snippet};

    #[test]
    fn prefers_the_output_text_convenience_field() {
        let envelope = json!({ "output_text": "{\"a\":1}" });
        assert_eq!(extract_output_text(&envelope), Some("{\"a\":1}"));
    }

    #[test]
    fn walks_output_items_when_the_convenience_field_is_absent() {
        let envelope = json!({
            "output": [
                { "type": "reasoning", "content": [] },
                {
                    "type": "message",
                    "content": [
                        { "type": "refusal", "refusal": "no" },
                        { "type": "output_text", "text": "{\"b\":2}" },
                    ],
                },
            ],
        });
        assert_eq!(extract_output_text(&envelope), Some("{\"b\":2}"));
    }

    #[test]
    fn missing_text_yields_none() {
        assert_eq!(extract_output_text(&json!({ "output": [] })), None);
        assert_eq!(extract_output_text(&json!({})), None);
    }

    #[test]
    fn snippet_truncates_long_bodies() {
        let long = "x".repeat(500);
        let cut = snippet(&long);
        assert!(cut.chars().count() <= 301);
        assert!(cut.ends_with('…'));
        assert_eq!(snippet("short"), "short");
    }
}
