//! Insight orchestration: lookup, cache, prompt, generate, parse, store.
//!
//! A request that misses the cache takes a per-fingerprint async lock and
//! re-checks the cache before calling the provider, so concurrent requests
//! for the same school wait for one generation instead of racing.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cache::{CacheStats, ResponseCache};
use crate::config::Config;
use crate::error::{BriefError, Result};
use crate::prompts::PromptBuilder;
use crate::providers::{GenerateOptions, LLMProvider, ProviderError};
use crate::schools::{School, SchoolStatistics, SchoolStore};

use super::result::{parse_generation, GenerationResult, SalesPriority};

/// Default request-level deadline, retries included.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

/// Combined dashboard counters.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceStatistics {
    pub schools: SchoolStatistics,
    pub cache: CacheStats,
    pub provider: String,
    /// Counts by effective priority (cached rating, else the estimate).
    pub priorities: PriorityCounts,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PriorityCounts {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    /// How many of the above come from a cached briefing.
    pub rated: usize,
}

/// Where a school's priority came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrioritySource {
    /// `sales_priority` of a fresh cached briefing.
    Rated,
    /// [`FinancialData::estimated_priority`](crate::schools::FinancialData::estimated_priority).
    Estimated,
}

/// A school with its effective priority.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankedSchool<'a> {
    pub school: &'a School,
    pub priority: SalesPriority,
    pub source: PrioritySource,
}

/// Holds one in-flight slot. On drop, removes the map entry when no other
/// request still holds it, so cancelled requests do not leak entries.
struct InflightSlot<'a> {
    map: &'a DashMap<String, Arc<Mutex<()>>>,
    key: &'a str,
    slot: Arc<Mutex<()>>,
}

impl<'a> InflightSlot<'a> {
    fn acquire(map: &'a DashMap<String, Arc<Mutex<()>>>, key: &'a str) -> Self {
        let slot = Arc::clone(&map.entry(key.to_string()).or_default());
        Self { map, key, slot }
    }

    async fn lock(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.slot.lock().await
    }
}

impl Drop for InflightSlot<'_> {
    fn drop(&mut self) {
        // Map and this holder only. Clones happen under the shard lock
        // that `remove_if` also takes.
        self.map
            .remove_if(self.key, |_, slot| Arc::strong_count(slot) == 2);
    }
}

pub struct InsightService {
    store: Arc<SchoolStore>,
    provider: Arc<dyn LLMProvider>,
    cache: ResponseCache,
    prompts: PromptBuilder,
    options: GenerateOptions,
    request_timeout: Duration,
    provider_id: String,
    inflight: DashMap<String, Arc<Mutex<()>>>,
}

impl std::fmt::Debug for InsightService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InsightService")
            .field("store", &self.store)
            .field("cache", &self.cache)
            .field("prompts", &self.prompts)
            .field("options", &self.options)
            .field("request_timeout", &self.request_timeout)
            .field("provider_id", &self.provider_id)
            .finish_non_exhaustive()
    }
}

impl InsightService {
    pub fn new(
        store: Arc<SchoolStore>,
        provider: Arc<dyn LLMProvider>,
        cache: ResponseCache,
        prompts: PromptBuilder,
    ) -> Self {
        let provider_id = provider.identity();
        Self {
            store,
            provider,
            cache,
            prompts,
            options: GenerateOptions::new().with_json_output(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            provider_id,
            inflight: DashMap::new(),
        }
    }

    /// Wire the service from configuration.
    pub fn from_config(
        config: &Config,
        store: Arc<SchoolStore>,
        provider: Arc<dyn LLMProvider>,
    ) -> Result<Self> {
        let g = &config.generation;
        let prompts = PromptBuilder::new(&g.prompt_version, g.num_starters)?;
        let cache = ResponseCache::from_config(&config.cache);
        Ok(Self::new(store, provider, cache, prompts)
            .with_options(
                GenerateOptions::new()
                    .with_max_tokens(g.max_tokens)
                    .with_temperature(g.temperature)
                    .with_json_output(),
            )
            .with_request_timeout(Duration::from_secs(g.request_timeout_secs)))
    }

    pub fn with_options(mut self, options: GenerateOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Conversation starters for one school.
    ///
    /// Served from cache when a fresh entry exists and `force_refresh` is
    /// false. Otherwise generates, stores, and returns a new result.
    ///
    /// # Errors
    ///
    /// - [`BriefError::NotFound`] for an unknown id. The provider is not called.
    /// - [`BriefError::Auth`] when the provider rejects the credential.
    /// - [`BriefError::GenerationFailed`] for every other provider failure,
    ///   a request timeout, or output that fails validation.
    pub async fn get_insights(
        &self,
        subject_id: &str,
        force_refresh: bool,
    ) -> Result<GenerationResult> {
        let school = self.store.lookup(subject_id)?;
        let key = self.fingerprint(school);

        if !force_refresh {
            if let Some(hit) = self.cache.get(&key) {
                debug!(school = %school.urn, "Serving cached insights");
                return Ok(hit);
            }
        }

        let slot = InflightSlot::acquire(&self.inflight, &key);
        let _guard = slot.lock().await;
        self.generate_locked(school, &key, force_refresh).await
    }

    /// Runs with the fingerprint's in-flight lock held.
    async fn generate_locked(
        &self,
        school: &School,
        key: &str,
        force_refresh: bool,
    ) -> Result<GenerationResult> {

        // Another request may have filled the entry while we waited.
        if !force_refresh {
            if let Some(hit) = self.cache.get(key) {
                debug!(school = %school.urn, "Insights generated by concurrent request");
                return Ok(hit);
            }
        }

        let prompt = self.prompts.build(school);
        let started = Instant::now();
        info!(
            school = %school.urn,
            provider = %self.provider_id,
            prompt_version = %prompt.version,
            force_refresh,
            "Generating insights"
        );

        let call = self.provider.generate(&prompt, &self.options);
        let response = match tokio::time::timeout(self.request_timeout, call).await {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                warn!(school = %school.urn, error = %err, "Generation failed");
                return Err(fold_provider_error(err));
            }
            Err(_) => {
                warn!(
                    school = %school.urn,
                    timeout_secs = self.request_timeout.as_secs_f64(),
                    "Generation timed out"
                );
                return Err(BriefError::generation(format!(
                    "request timed out after {:.1}s",
                    self.request_timeout.as_secs_f64()
                )));
            }
        };

        let result = parse_generation(
            &response.content,
            self.prompts.num_starters(),
            &self.provider_id,
            Utc::now(),
        )
        .inspect_err(|e| warn!(school = %school.urn, error = %e, "Unusable model output"))?;

        info!(
            school = %school.urn,
            starters = result.starters.len(),
            priority = %result.sales_priority,
            tokens = response.usage.map(|u| u.total_tokens),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Generated insights"
        );

        if let Err(e) = self.cache.put(key, &school.urn, &result) {
            warn!(school = %school.urn, error = %e, "Failed to cache insights");
        }
        Ok(result)
    }

    /// All schools in load order.
    pub fn schools(&self) -> &[School] {
        self.store.all()
    }

    pub fn school(&self, subject_id: &str) -> Result<&School> {
        self.store.lookup(subject_id)
    }

    pub fn store(&self) -> &SchoolStore {
        &self.store
    }

    pub fn statistics(&self) -> Result<ServiceStatistics> {
        Ok(ServiceStatistics {
            schools: self.store.statistics(),
            cache: self.cache.stats()?,
            provider: self.provider_id.clone(),
            priorities: self.priority_counts(),
        })
    }

    /// Priority of one school: the cached briefing's rating when a fresh one
    /// exists, else the spend-based estimate. Never calls the provider.
    pub fn priority_of<'a>(&self, school: &'a School) -> RankedSchool<'a> {
        match self.cache.get(&self.fingerprint(school)) {
            Some(result) => RankedSchool {
                school,
                priority: result.sales_priority,
                source: PrioritySource::Rated,
            },
            None => RankedSchool {
                school,
                priority: school.financial.estimated_priority(),
                source: PrioritySource::Estimated,
            },
        }
    }

    /// All schools, `HIGH` first. Ties keep load order.
    pub fn ranked_schools(&self) -> Vec<RankedSchool<'_>> {
        let mut ranked: Vec<RankedSchool<'_>> = self
            .store
            .all()
            .iter()
            .map(|s| self.priority_of(s))
            .collect();
        ranked.sort_by_key(|r| r.priority);
        ranked
    }

    /// The `limit` schools most worth calling.
    pub fn high_priority_schools(&self, limit: usize) -> Vec<RankedSchool<'_>> {
        let mut ranked = self.ranked_schools();
        ranked.truncate(limit);
        ranked
    }

    fn priority_counts(&self) -> PriorityCounts {
        let mut counts = PriorityCounts::default();
        for ranked in self.ranked_schools() {
            match ranked.priority {
                SalesPriority::High => counts.high += 1,
                SalesPriority::Medium => counts.medium += 1,
                SalesPriority::Low => counts.low += 1,
            }
            if ranked.source == PrioritySource::Rated {
                counts.rated += 1;
            }
        }
        counts
    }

    /// Delete expired and unreadable cache entries.
    pub fn purge_expired_cache(&self) -> Result<usize> {
        let purged = self.cache.purge_expired()?;
        info!(purged, "Purged expired cache entries");
        Ok(purged)
    }

    /// Drop the cached entry for one school, or every entry.
    /// Returns the number of entries removed.
    pub fn clear_cache(&self, subject_id: Option<&str>) -> Result<usize> {
        match subject_id {
            Some(id) => {
                let school = self.store.lookup(id)?;
                let removed = self.cache.invalidate(&self.fingerprint(school))?;
                info!(school = %school.urn, removed, "Invalidated cached insights");
                Ok(usize::from(removed))
            }
            None => self.cache.clear_all(),
        }
    }

    /// Identity of the active provider, e.g. `anthropic:claude-sonnet-4-20250514`.
    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    fn fingerprint(&self, school: &School) -> String {
        ResponseCache::fingerprint(&school.urn, &self.prompts.version_tag(), &self.provider_id)
    }
}

/// Auth stays distinct; everything else becomes a generation failure.
fn fold_provider_error(err: ProviderError) -> BriefError {
    match err.root() {
        ProviderError::Auth(msg) => BriefError::Auth(msg.clone()),
        _ => BriefError::generation(err.to_string()),
    }
}
