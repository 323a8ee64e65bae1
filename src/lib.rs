//! SchoolBrief: conversation-starter briefings for school sales calls.
//!
//! Loads a table of schools, asks an LLM (Claude or GPT) for talking points
//! about one of them, and caches the answer on disk for a day.
//!
//! ```text
//! SchoolStore ──► PromptBuilder ──► LLMProvider (RetryProvider) ──► parse
//!       ▲                                                            │
//!       └──────────── InsightService ◄──── ResponseCache ◄───────────┘
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod insights;
pub mod prompts;
pub mod providers;
pub mod schools;
pub mod utils;

pub use cache::{CacheStats, ResponseCache};
pub use config::Config;
pub use error::{BriefError, Result};
pub use insights::{ConversationStarter, GenerationResult, InsightService, SalesPriority};
pub use prompts::{Prompt, PromptBuilder};
pub use providers::{create_provider, LLMProvider, ProviderError};
pub use schools::{School, SchoolStore};
