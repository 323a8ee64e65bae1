//! Configuration for SchoolBrief.
//!
//! Built once at startup and passed by reference to the store, provider
//! factory, and cache. Values come from `~/.schoolbrief/config.json` (every
//! section optional) with environment overrides applied on top.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{BriefError, Result};

/// Default Claude model.
pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-sonnet-4-20250514";
/// Default GPT model.
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

/// Which generation backend to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Anthropic,
    #[serde(alias = "gpt")]
    OpenAI,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAI => "openai",
        }
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = BriefError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anthropic" | "claude" => Ok(Self::Anthropic),
            "openai" | "gpt" => Ok(Self::OpenAI),
            other => Err(BriefError::Config(format!(
                "unknown provider '{other}' (expected 'anthropic' or 'openai')"
            ))),
        }
    }
}

/// Credentials and endpoint for one provider.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    /// Model override. Falls back to the provider default.
    pub model: Option<String>,
    /// Base URL override, mostly for proxies and tests.
    pub api_base: Option<String>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("model", &self.model)
            .field("api_base", &self.api_base)
            .finish()
    }
}

/// Generation request settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub temperature: f32,
    pub max_tokens: u32,
    /// Conversation starters requested per school.
    pub num_starters: usize,
    /// Prompt template version. Part of the cache fingerprint.
    pub prompt_version: String,
    /// Overall deadline for one generation, retries included.
    pub request_timeout_secs: u64,
    /// Per-HTTP-call timeout inside the provider adapter.
    pub http_timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            max_tokens: 1500,
            num_starters: 5,
            prompt_version: crate::prompts::DEFAULT_PROMPT_VERSION.to_string(),
            request_timeout_secs: 180,
            http_timeout_secs: 60,
        }
    }
}

/// Backoff settings for transient provider failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 8000,
        }
    }
}

/// Response cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_secs: u64,
    /// Cache directory. Defaults to `~/.schoolbrief/cache`.
    pub dir: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 24 * 60 * 60,
            dir: None,
        }
    }
}

impl CacheConfig {
    pub fn resolved_dir(&self) -> PathBuf {
        self.dir
            .clone()
            .unwrap_or_else(|| Config::dir().join("cache"))
    }
}

/// Where the school table lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub csv_path: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            csv_path: PathBuf::from("data/schools.csv"),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub provider: ProviderKind,
    pub anthropic: ProviderConfig,
    pub openai: ProviderConfig,
    pub generation: GenerationConfig,
    pub retry: RetryConfig,
    pub cache: CacheConfig,
    pub data: DataConfig,
}

impl Config {
    /// `~/.schoolbrief`
    pub fn dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".schoolbrief")
    }

    /// `~/.schoolbrief/config.json`
    pub fn path() -> PathBuf {
        Self::dir().join("config.json")
    }

    /// Load `.env`, the config file (if present), and environment overrides.
    pub fn load() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            debug!("No .env loaded: {}", e);
        }
        let path = Self::path();
        let mut config = if path.exists() {
            Self::load_from_path(&path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a config file without touching the environment.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            BriefError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&data)
            .map_err(|e| BriefError::Config(format!("invalid {}: {}", path.display(), e)))
    }

    /// Apply overrides from a variable lookup (normally `std::env::var`).
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(provider) = get("SCHOOLBRIEF_PROVIDER") {
            self.provider = provider.parse()?;
        }
        if let Some(key) = get("ANTHROPIC_API_KEY") {
            self.anthropic.api_key = Some(key);
        }
        if let Some(key) = get("OPENAI_API_KEY") {
            self.openai.api_key = Some(key);
        }
        if let Some(model) = get("SCHOOLBRIEF_MODEL") {
            self.active_provider_mut().model = Some(model);
        }
        if let Some(path) = get("SCHOOLBRIEF_DATA_PATH") {
            self.data.csv_path = PathBuf::from(path);
        }
        if let Some(dir) = get("SCHOOLBRIEF_CACHE_DIR") {
            self.cache.dir = Some(PathBuf::from(dir));
        }
        Ok(())
    }

    /// Reject values that would make the pipeline misbehave.
    pub fn validate(&self) -> Result<()> {
        let g = &self.generation;
        if !(0.0..=2.0).contains(&g.temperature) {
            return Err(BriefError::Config(format!(
                "generation.temperature must be within 0.0..=2.0, got {}",
                g.temperature
            )));
        }
        if g.num_starters == 0 || g.num_starters > 20 {
            return Err(BriefError::Config(format!(
                "generation.num_starters must be within 1..=20, got {}",
                g.num_starters
            )));
        }
        if g.max_tokens == 0 {
            return Err(BriefError::Config("generation.max_tokens must be > 0".into()));
        }
        if g.request_timeout_secs == 0 || g.http_timeout_secs == 0 {
            return Err(BriefError::Config("timeouts must be > 0 seconds".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(BriefError::Config("retry.max_attempts must be >= 1".into()));
        }
        if self.cache.ttl_secs == 0 {
            return Err(BriefError::Config("cache.ttl_secs must be > 0".into()));
        }
        Ok(())
    }

    /// Settings of the provider selected by `provider`.
    pub fn active_provider(&self) -> &ProviderConfig {
        match self.provider {
            ProviderKind::Anthropic => &self.anthropic,
            ProviderKind::OpenAI => &self.openai,
        }
    }

    fn active_provider_mut(&mut self) -> &mut ProviderConfig {
        match self.provider {
            ProviderKind::Anthropic => &mut self.anthropic,
            ProviderKind::OpenAI => &mut self.openai,
        }
    }

    /// Model of the active provider, with the built-in default as fallback.
    pub fn active_model(&self) -> String {
        self.active_provider().model.clone().unwrap_or_else(|| {
            match self.provider {
                ProviderKind::Anthropic => DEFAULT_ANTHROPIC_MODEL,
                ProviderKind::OpenAI => DEFAULT_OPENAI_MODEL,
            }
            .to_string()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_config_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.provider, ProviderKind::Anthropic);
        assert_eq!(cfg.generation.num_starters, 5);
        assert_eq!(cfg.generation.max_tokens, 1500);
        assert_eq!(cfg.cache.ttl_secs, 86_400);
        assert!(cfg.cache.enabled);
        assert_eq!(cfg.retry.max_attempts, 3);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_config_deserialize_partial() {
        let json = r#"{"provider": "openai", "cache": {"ttl_secs": 60}}"#;
        let cfg: Config = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.provider, ProviderKind::OpenAI);
        assert_eq!(cfg.cache.ttl_secs, 60);
        assert!(cfg.cache.enabled); // default
        assert_eq!(cfg.generation.temperature, 0.3);
    }

    #[test]
    fn test_env_overrides_keys_and_provider() {
        let mut cfg = Config::default();
        cfg.apply_env_overrides(env(&[
            ("SCHOOLBRIEF_PROVIDER", "gpt"),
            ("OPENAI_API_KEY", "sk-test"),
            ("SCHOOLBRIEF_MODEL", "gpt-4o"),
        ]))
        .unwrap();
        assert_eq!(cfg.provider, ProviderKind::OpenAI);
        assert_eq!(cfg.openai.api_key.as_deref(), Some("sk-test"));
        assert_eq!(cfg.active_model(), "gpt-4o");
        assert!(cfg.anthropic.model.is_none());
    }

    #[test]
    fn test_env_overrides_ignore_blank_values() {
        let mut cfg = Config::default();
        cfg.anthropic.api_key = Some("from-file".into());
        cfg.apply_env_overrides(env(&[("ANTHROPIC_API_KEY", "  ")]))
            .unwrap();
        assert_eq!(cfg.anthropic.api_key.as_deref(), Some("from-file"));
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let mut cfg = Config::default();
        let err = cfg
            .apply_env_overrides(env(&[("SCHOOLBRIEF_PROVIDER", "llama")]))
            .unwrap_err();
        assert!(matches!(err, BriefError::Config(_)));
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let mut cfg = Config::default();
        cfg.retry.max_attempts = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_active_model_defaults_per_provider() {
        let mut cfg = Config::default();
        assert_eq!(cfg.active_model(), DEFAULT_ANTHROPIC_MODEL);
        cfg.provider = ProviderKind::OpenAI;
        assert_eq!(cfg.active_model(), DEFAULT_OPENAI_MODEL);
    }

    #[test]
    fn test_provider_config_debug_redacts_key() {
        let pc = ProviderConfig {
            api_key: Some("sk-secret".into()),
            ..Default::default()
        };
        let dbg = format!("{:?}", pc);
        assert!(!dbg.contains("sk-secret"));
        assert!(dbg.contains("REDACTED"));
    }

    #[test]
    fn test_load_from_path_reports_bad_json() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = Config::load_from_path(&path).unwrap_err();
        assert!(matches!(err, BriefError::Config(_)));
    }
}
