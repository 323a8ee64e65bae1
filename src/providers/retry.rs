//! Retry decorator with bounded exponential backoff.
//!
//! `RetryProvider` wraps an inner [`LLMProvider`] and retries failed
//! `generate()` calls according to the error's [`RetryClass`]:
//!
//! - `Bounded` (rate limits, network failures): up to `max_attempts` total.
//! - `Once` (unexpected backend errors): at most two attempts.
//! - `Never` (auth, malformed request): returned immediately.
//!
//! Delay before attempt `n + 1` is `base_delay * 2^(n-1)`, capped at
//! `max_delay`. When attempts run out the last error is wrapped in
//! [`ProviderError::RetriesExhausted`].

use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::config::RetryConfig;
use crate::prompts::Prompt;

use super::{GenerateOptions, LLMProvider, LLMResponse, ProviderError, RetryClass};

/// Backoff parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    /// Policy with no sleeping between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Total attempts allowed for an error of this class.
    pub fn attempts_for(&self, class: RetryClass) -> u32 {
        match class {
            RetryClass::Never => 1,
            RetryClass::Once => self.max_attempts.min(2),
            RetryClass::Bounded => self.max_attempts,
        }
    }

    /// Delay after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }
}

/// An [`LLMProvider`] that retries its inner provider.
pub struct RetryProvider {
    inner: Box<dyn LLMProvider>,
    policy: RetryPolicy,
}

impl RetryProvider {
    pub fn new(inner: Box<dyn LLMProvider>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

impl std::fmt::Debug for RetryProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryProvider")
            .field("provider", &self.inner.name())
            .field("policy", &self.policy)
            .finish()
    }
}

#[async_trait]
impl LLMProvider for RetryProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn default_model(&self) -> &str {
        self.inner.default_model()
    }

    async fn generate(
        &self,
        prompt: &Prompt,
        options: &GenerateOptions,
    ) -> Result<LLMResponse, ProviderError> {
        let mut attempt = 1;
        loop {
            let err = match self.inner.generate(prompt, options).await {
                Ok(response) => return Ok(response),
                Err(err) => err,
            };

            let allowed = self.policy.attempts_for(err.retry_class());
            if allowed == 1 {
                return Err(err);
            }
            if attempt >= allowed {
                return Err(ProviderError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(err),
                });
            }

            let delay = self.policy.delay_after(attempt);
            warn!(
                provider = self.inner.name(),
                attempt,
                max_attempts = allowed,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "LLM call failed, retrying"
            );
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            attempt += 1;
        }
    }
}
