//! OpenAI Chat Completions provider.

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

const OPENAI_API_BASE: &str = "https://api.openai.com";

/// GPT via the OpenAI Chat Completions API.
pub struct OpenAIProvider {
    api_key: String,
    model: String,
    api_base: String,
    client: Client,
}

impl std::fmt::Debug for OpenAIProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAIProvider")
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl OpenAIProvider {
    pub fn new(api_key: &str, model: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            api_base: OPENAI_API_BASE.to_string(),
            client: build_client(timeout)?,
        })
    }

    pub fn with_api_base(mut self, base: &str) -> Self {
        self.api_base = base.trim_end_matches('/').to_string();
        self
    }

    fn api_url(&self) -> String {
        format!("{}/v1/chat/completions", self.api_base)
    }

    fn build_request_body(&self, prompt: &Prompt, options: &GenerateOptions) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": prompt.system },
                { "role": "user", "content": prompt.user }
            ]
        });
        if let Some(max_tokens) = options.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if let Some(temp) = options.temperature {
            body["temperature"] = json!(temp);
        }
        if options.json_output {
            body["response_format"] = json!({ "type": "json_object" });
        }
        body
    }

    pub fn extract_text(response: &Value) -> Option<String> {
        response["choices"][0]["message"]["content"]
            .as_str()
            .filter(|s| !s.is_empty())
            .map(String::from)
    }

    fn extract_usage(response: &Value) -> Option<Usage> {
        let usage = response.get("usage")?;
        let prompt = usage["prompt_tokens"].as_u64()? as u32;
        let completion = usage["completion_tokens"].as_u64()? as u32;
        Some(Usage::new(prompt, completion))
    }
}

#[async_trait]
impl LLMProvider for OpenAIProvider {
    fn name(&self) -> &str {
        "openai"
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
        debug!(model = %self.model, "OpenAI request");

        let response = self
            .client
            .post(self.api_url())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| map_transport_error("OpenAI", &e))?;

        let status = response.status();
        if status.is_success() {
            let json: Value = response
                .json()
                .await
                .map_err(|e| map_transport_error("OpenAI", &e))?;
            let content = Self::extract_text(&json).ok_or_else(|| {
                ProviderError::Provider("OpenAI response had no message content".into())
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
