//! LLM provider abstraction.
//!
//! [`LLMProvider`] has one capability, `generate`, and two HTTP backends:
//! [`ClaudeProvider`] and [`OpenAIProvider`]. [`RetryProvider`] wraps either
//! one with bounded exponential backoff. [`create_provider`] is the only
//! place that picks a backend.

pub mod claude;
pub mod openai;
pub mod retry;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::config::{Config, ProviderKind};
use crate::error::{BriefError, Result};
use crate::prompts::Prompt;

pub use claude::ClaudeProvider;
pub use openai::OpenAIProvider;
pub use retry::{RetryPolicy, RetryProvider};

/// Shared error taxonomy for every backend.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    /// Credential missing or rejected.
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("rate limited: {0}")]
    RateLimit(String),
    /// Timeouts, connection failures, gateway errors.
    #[error("network error: {0}")]
    TransientNetwork(String),
    /// The backend refused the request as malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// Any other backend failure.
    #[error("provider error: {0}")]
    Provider(String),
    #[error("gave up after {attempts} attempt(s): {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<ProviderError>,
    },
}

/// How a failed call may be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    Never,
    Once,
    Bounded,
}

impl ProviderError {
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::RateLimit(_) | Self::TransientNetwork(_) => RetryClass::Bounded,
            Self::Provider(_) => RetryClass::Once,
            Self::Auth(_) | Self::InvalidRequest(_) | Self::RetriesExhausted { .. } => {
                RetryClass::Never
            }
        }
    }

    /// Innermost error, looking through `RetriesExhausted`.
    pub fn root(&self) -> &ProviderError {
        match self {
            Self::RetriesExhausted { last, .. } => last.root(),
            other => other,
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self.root(), Self::Auth(_))
    }
}

/// Map an HTTP error status and message to the shared taxonomy.
pub fn parse_provider_error(status: u16, message: &str) -> ProviderError {
    let msg = format!("HTTP {status}: {message}");
    match status {
        401 | 403 => ProviderError::Auth(msg),
        429 => ProviderError::RateLimit(msg),
        400 | 404 | 413 | 422 => ProviderError::InvalidRequest(msg),
        408 | 502 | 503 | 504 | 529 => ProviderError::TransientNetwork(msg),
        _ => ProviderError::Provider(msg),
    }
}

/// Map a transport-level reqwest failure.
pub(crate) fn map_transport_error(provider: &str, err: &reqwest::Error) -> ProviderError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        ProviderError::TransientNetwork(format!("{provider} request failed: {err}"))
    } else if err.is_decode() || err.is_body() {
        ProviderError::Provider(format!("{provider} response unreadable: {err}"))
    } else {
        ProviderError::Provider(format!("{provider} request failed: {err}"))
    }
}

/// Per-call generation options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerateOptions {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    /// Ask the backend for a JSON object when it supports that.
    pub json_output: bool,
}

impl GenerateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_json_output(mut self) -> Self {
        self.json_output = true;
        self
    }
}

/// Token counts reported by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }
}

/// Raw text returned by a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct LLMResponse {
    pub content: String,
    pub usage: Option<Usage>,
}

impl LLMResponse {
    pub fn text(content: &str) -> Self {
        Self {
            content: content.to_string(),
            usage: None,
        }
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }
}

/// A text-generation backend.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Short backend name, e.g. `"anthropic"`.
    fn name(&self) -> &str;

    fn default_model(&self) -> &str;

    /// Stable identity used in cache fingerprints.
    fn identity(&self) -> String {
        format!("{}:{}", self.name(), self.default_model())
    }

    async fn generate(
        &self,
        prompt: &Prompt,
        options: &GenerateOptions,
    ) -> std::result::Result<LLMResponse, ProviderError>;
}

/// Build the configured backend wrapped in [`RetryProvider`].
pub fn create_provider(config: &Config) -> Result<Arc<dyn LLMProvider>> {
    let settings = config.active_provider();
    let api_key = settings
        .api_key
        .as_deref()
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| {
            let var = match config.provider {
                ProviderKind::Anthropic => "ANTHROPIC_API_KEY",
                ProviderKind::OpenAI => "OPENAI_API_KEY",
            };
            BriefError::Config(format!(
                "no API key for provider '{}'; set {}",
                config.provider.as_str(),
                var
            ))
        })?;
    let model = config.active_model();
    let timeout = Duration::from_secs(config.generation.http_timeout_secs);

    let inner: Box<dyn LLMProvider> = match config.provider {
        ProviderKind::Anthropic => {
            let mut p = ClaudeProvider::new(api_key, &model, timeout)?;
            if let Some(base) = &settings.api_base {
                p = p.with_api_base(base);
            }
            Box::new(p)
        }
        ProviderKind::OpenAI => {
            let mut p = OpenAIProvider::new(api_key, &model, timeout)?;
            if let Some(base) = &settings.api_base {
                p = p.with_api_base(base);
            }
            Box::new(p)
        }
    };
    info!(provider = inner.name(), model = %model, "Using LLM provider");

    Ok(Arc::new(RetryProvider::new(
        inner,
        RetryPolicy::from_config(&config.retry),
    )))
}

/// Build the shared reqwest client for a backend.
pub(crate) fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| BriefError::Config(format!("failed to build HTTP client: {e}")))
}
