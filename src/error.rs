//! Error types for SchoolBrief.
//!
//! `BriefError` is the crate-wide error. Provider adapters report the narrower
//! [`ProviderError`](crate::providers::ProviderError), which the insight
//! service folds into `BriefError` once retries are settled.

use thiserror::Error;

use crate::providers::ProviderError;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, BriefError>;

/// Errors surfaced by the record store, cache, and insight service.
#[derive(Debug, Error)]
pub enum BriefError {
    /// Input data is missing or malformed. Fatal at startup.
    #[error("Data source error: {0}")]
    DataSource(String),

    /// No school with the requested identifier.
    #[error("School not found: {0}")]
    NotFound(String),

    /// The provider rejected our credential. Never retried.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Generation did not produce a usable result.
    ///
    /// `raw_response` keeps whatever text the provider returned so a failed
    /// parse can be diagnosed.
    #[error("Generation failed: {message}")]
    GenerationFailed {
        message: String,
        raw_response: Option<String>,
    },

    /// Invalid configuration value.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Provider error outside the insight pipeline.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BriefError {
    /// Shorthand for a generation failure without a raw response.
    pub fn generation(message: impl Into<String>) -> Self {
        Self::GenerationFailed {
            message: message.into(),
            raw_response: None,
        }
    }

    /// Text suitable for showing to the person at the keyboard.
    pub fn user_message(&self) -> String {
        match self {
            Self::DataSource(msg) => format!("The school data could not be loaded: {msg}"),
            Self::NotFound(id) => format!("No school found with id '{id}'."),
            Self::Auth(_) => {
                "The AI provider rejected the API key. Check ANTHROPIC_API_KEY / OPENAI_API_KEY."
                    .to_string()
            }
            Self::GenerationFailed { message, .. } => {
                format!("Could not generate conversation starters: {message}")
            }
            Self::Config(msg) => format!("Configuration problem: {msg}"),
            Self::Provider(e) => format!("The AI provider returned an error: {e}"),
            Self::Io(e) => format!("File error: {e}"),
            Self::Json(e) => format!("Malformed JSON: {e}"),
        }
    }

    /// Raw provider output retained for diagnostics, if any.
    pub fn raw_response(&self) -> Option<&str> {
        match self {
            Self::GenerationFailed { raw_response, .. } => raw_response.as_deref(),
            _ => None,
        }
    }
}
