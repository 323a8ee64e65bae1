//! Anthropic Messages API provider.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::Result;
use crate::prompts::Prompt;

use super::{
    build_client, map_transport_error, parse_provider_error, GenerateOptions, LLMProvider,
    LLMResponse, ProviderError, Usage,
};

const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
/// The Messages API requires `max_tokens`.
const DEFAULT_MAX_TOKENS: u32 = 1500;

/// Claude via the Anthropic Messages API.
pub struct ClaudeProvider {
    api_key: String,
    model: String,
    api_base: String,
    client: Client,
}

impl std::fmt::Debug for ClaudeProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaudeProvider")
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl ClaudeProvider {
    pub fn new(api_key: &str, model: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            api_base: ANTHROPIC_API_BASE.to_string(),
            client: build_client(timeout)?,
        })
    }

    /// Point at a different host (proxy or test server).
    pub fn with_api_base(mut self, base: &str) -> Self {
        self.api_base = base.trim_end_matches('/').to_string();
        self
    }

    fn api_url(&self) -> String {
        format!("{}/v1/messages", self.api_base)
    }

    fn build_request_body(&self, prompt: &Prompt, options: &GenerateOptions) -> Value {
        let mut body = json!({
            "model": self.model,
            "max_tokens": options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "system": prompt.system,
            "messages": [
                { "role": "user", "content": prompt.user }
            ]
        });
        if let Some(temp) = options.temperature {
            body["temperature"] = json!(temp);
        }
        body
    }

    /// Concatenate the `text` blocks of a Messages API response.
    pub fn extract_text(response: &Value) -> Option<String> {
        let blocks = response["content"].as_array()?;
        let text: Vec<&str> = blocks
            .iter()
            .filter(|b| b["type"] == "text")
            .filter_map(|b| b["text"].as_str())
            .collect();
        if text.is_empty() {
            None
        } else {
            Some(text.join(""))
        }
    }

    fn extract_usage(response: &Value) -> Option<Usage> {
        let usage = response.get("usage")?;
        let input = usage["input_tokens"].as_u64()? as u32;
        let output = usage["output_tokens"].as_u64()? as u32;
        Some(Usage::new(input, output))
    }
}

#[async_trait]
impl LLMProvider for ClaudeProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn default_model(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        prompt: &Prompt,
        options: &GenerateOptions,
    ) -> std::result::Result<LLMResponse, ProviderError> {
        let body = self.build_request_body(prompt, options);
        debug!(model = %self.model, "Anthropic request");

        let response = self
            .client
            .post(self.api_url())
            .header("x-api-key", self.api_key.as_str())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| map_transport_error("Anthropic", &e))?;

        let status = response.status();
        if status.is_success() {
            let json: Value = response
                .json()
                .await
                .map_err(|e| map_transport_error("Anthropic", &e))?;
            let content = Self::extract_text(&json).ok_or_else(|| {
                ProviderError::Provider("Anthropic response had no text content".into())
            })?;
            let mut llm_response = LLMResponse::text(&content);
            if let Some(u) = Self::extract_usage(&json) {
                llm_response = llm_response.with_usage(u);
            }
            return Ok(llm_response);
        }

        let error_text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<Value>(&error_text)
            .ok()
            .and_then(|v| v["error"]["message"].as_str().map(String::from))
            .unwrap_or(error_text);
        Err(parse_provider_error(status.as_u16(), &message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn prompt() -> Prompt {
        Prompt {
            system: "You are a coach".into(),
            user: "Write starters".into(),
            version: "v1/n5".into(),
        }
    }

    fn provider(base: &str) -> ClaudeProvider {
        ClaudeProvider::new("sk-ant-test", "claude-test", Duration::from_secs(5))
            .unwrap()
            .with_api_base(base)
    }

    #[test]
    fn test_request_body_shape() {
        let p = provider("http://localhost");
        let opts = GenerateOptions::new().with_max_tokens(800).with_temperature(0.3);
        let body = p.build_request_body(&prompt(), &opts);
        assert_eq!(body["model"], "claude-test");
        assert_eq!(body["max_tokens"], 800);
        assert_eq!(body["system"], "You are a coach");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "Write starters");
        assert!((body["temperature"].as_f64().unwrap() - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_request_body_defaults_max_tokens() {
        let p = provider("http://localhost");
        let body = p.build_request_body(&prompt(), &GenerateOptions::default());
        assert_eq!(body["max_tokens"], DEFAULT_MAX_TOKENS);
        assert!(body.get("temperature").is_none());
    }

    #[test]
    fn test_extract_text_joins_text_blocks() {
        let response = json!({
            "content": [
                { "type": "text", "text": "{\"a\":" },
                { "type": "tool_use", "id": "x" },
                { "type": "text", "text": "1}" }
            ]
        });
        assert_eq!(
            ClaudeProvider::extract_text(&response).as_deref(),
            Some("{\"a\":1}")
        );
        assert!(ClaudeProvider::extract_text(&json!({ "content": [] })).is_none());
    }

    #[test]
    fn test_debug_redacts_key() {
        let p = provider("http://localhost");
        let dbg = format!("{:?}", p);
        assert!(!dbg.contains("sk-ant-test"));
    }

    #[tokio::test]
    async fn test_generate_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "sk-ant-test"))
            .and(header("anthropic-version", ANTHROPIC_VERSION))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": [{ "type": "text", "text": "hello" }],
                "usage": { "input_tokens": 12, "output_tokens": 3 }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let resp = provider(&server.uri())
            .generate(&prompt(), &GenerateOptions::default())
            .await
            .unwrap();
        assert_eq!(resp.content, "hello");
        assert_eq!(resp.usage, Some(Usage::new(12, 3)));
    }

    #[tokio::test]
    async fn test_generate_maps_401_to_auth() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "type": "error",
                "error": { "type": "authentication_error", "message": "invalid x-api-key" }
            })))
            .mount(&server)
            .await;

        let err = provider(&server.uri())
            .generate(&prompt(), &GenerateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Auth(msg) if msg.contains("invalid x-api-key")));
    }

    #[tokio::test]
    async fn test_generate_maps_429_to_rate_limit() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("too many"))
            .mount(&server)
            .await;

        let err = provider(&server.uri())
            .generate(&prompt(), &GenerateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::RateLimit(_)));
    }

    #[tokio::test]
    async fn test_generate_connection_refused_is_transient() {
        // Nothing listens on port 9 (discard) in the test environment.
        let err = provider("http://127.0.0.1:9")
            .generate(&prompt(), &GenerateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::TransientNetwork(_)));
    }
}
