//! Generation result cache with TTL expiry and per-entry file persistence.
//!
//! Each entry lives in `<dir>/<fingerprint>.json`. The fingerprint is a
//! SHA-256 digest of `(subject_id, template_version, provider_id)`. Entries
//! older than the TTL read as absent and are deleted lazily. Unreadable or
//! corrupt files also read as absent: the cache is best-effort and never
//! fails a lookup.
//!
//! Writes go to a temp file in the same directory and are renamed into
//! place, so a reader never sees a half-written entry.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::error::{BriefError, Result};
use crate::insights::GenerationResult;

/// On-disk cache record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub fingerprint: String,
    pub subject_id: String,
    pub created_at: DateTime<Utc>,
    pub result: GenerationResult,
}

/// File-backed response cache.
#[derive(Debug, Clone)]
pub struct ResponseCache {
    dir: PathBuf,
    ttl: Duration,
    enabled: bool,
}

impl ResponseCache {
    pub fn new(dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            dir: dir.into(),
            ttl,
            enabled: true,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            dir: config.resolved_dir(),
            ttl: Duration::from_secs(config.ttl_secs),
            enabled: config.enabled,
        }
    }

    /// A disabled cache always misses and never writes.
    pub fn disabled() -> Self {
        Self {
            dir: PathBuf::new(),
            ttl: Duration::ZERO,
            enabled: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Deterministic cache key.
    ///
    /// Length-prefixed so that `("a|b", "c")` and `("a", "b|c")` differ.
    pub fn fingerprint(subject_id: &str, template_version: &str, provider_id: &str) -> String {
        let mut hasher = Sha256::new();
        for part in [subject_id, template_version, provider_id] {
            hasher.update((part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// Look up a fresh entry.
    pub fn get(&self, key: &str) -> Option<GenerationResult> {
        self.get_at(key, Utc::now())
    }

    pub(crate) fn get_at(&self, key: &str, now: DateTime<Utc>) -> Option<GenerationResult> {
        if !self.enabled || !is_valid_key(key) {
            return None;
        }
        let path = self.entry_path(key);
        let entry = read_entry(&path)?;
        if entry.fingerprint != key {
            warn!(key = short(key), "Cache entry fingerprint mismatch, ignoring");
            return None;
        }
        if self.is_expired(&entry, now) {
            debug!(key = short(key), "Cache entry expired, removing");
            let _ = std::fs::remove_file(&path);
            return None;
        }
        debug!(key = short(key), subject = %entry.subject_id, "Cache hit");
        Some(entry.result)
    }

    /// Store or overwrite an entry stamped with the current time.
    pub fn put(&self, key: &str, subject_id: &str, result: &GenerationResult) -> Result<()> {
        self.put_at(key, subject_id, result, Utc::now())
    }

    pub(crate) fn put_at(
        &self,
        key: &str,
        subject_id: &str,
        result: &GenerationResult,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        check_key(key)?;
        let entry = CacheEntry {
            fingerprint: key.to_string(),
            subject_id: subject_id.to_string(),
            created_at: now,
            result: result.clone(),
        };
        let data = serde_json::to_vec_pretty(&entry)?;

        std::fs::create_dir_all(&self.dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(&data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.entry_path(key)).map_err(|e| e.error)?;

        debug!(
            key = short(key),
            subject = subject_id,
            starters = result.starters.len(),
            "Cached generation result"
        );
        Ok(())
    }

    /// Remove one entry. Returns whether a file was deleted.
    pub fn invalidate(&self, key: &str) -> Result<bool> {
        check_key(key)?;
        if !self.enabled {
            return Ok(false);
        }
        match std::fs::remove_file(self.entry_path(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove every entry. Returns the number deleted.
    pub fn clear_all(&self) -> Result<usize> {
        let mut count = 0;
        for path in self.entry_paths()? {
            match std::fs::remove_file(&path) {
                Ok(()) => count += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        info!(count, dir = %self.dir.display(), "Cleared response cache");
        Ok(count)
    }

    /// Delete expired and unreadable entries. Returns the number deleted.
    pub fn purge_expired(&self) -> Result<usize> {
        let now = Utc::now();
        let mut count = 0;
        for path in self.entry_paths()? {
            let stale = match read_entry(&path) {
                Some(entry) => self.is_expired(&entry, now),
                None => true,
            };
            if stale && std::fs::remove_file(&path).is_ok() {
                count += 1;
            }
        }
        Ok(count)
    }

    pub fn stats(&self) -> Result<CacheStats> {
        let now = Utc::now();
        let mut stats = CacheStats::default();
        for path in self.entry_paths()? {
            stats.total_entries += 1;
            match read_entry(&path) {
                Some(entry) if !self.is_expired(&entry, now) => {}
                _ => stats.expired_entries += 1,
            }
        }
        Ok(stats)
    }

    pub fn len(&self) -> usize {
        self.entry_paths().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // -- private helpers ---------------------------------------------------

    fn is_expired(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        let age_ms = (now - entry.created_at).num_milliseconds();
        age_ms > self.ttl.as_millis().min(i64::MAX as u128) as i64
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    /// Paths of all entry files. A missing directory means no entries.
    fn entry_paths(&self) -> Result<Vec<PathBuf>> {
        if !self.enabled {
            return Ok(Vec::new());
        }
        let read_dir = match std::fs::read_dir(&self.dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut paths = Vec::new();
        for dirent in read_dir {
            let path = dirent?.path();
            let is_entry = path.extension().is_some_and(|ext| ext == "json")
                && path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .is_some_and(is_valid_key);
            if is_entry {
                paths.push(path);
            }
        }
        Ok(paths)
    }
}

/// Aggregate cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Entry files on disk, fresh or not.
    pub total_entries: usize,
    /// Entries past their TTL or unreadable.
    pub expired_entries: usize,
}

fn read_entry(path: &Path) -> Option<CacheEntry> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!(path = %path.display(), "Failed to read cache entry: {}", e);
            return None;
        }
    };
    match serde_json::from_slice(&data) {
        Ok(entry) => Some(entry),
        Err(e) => {
            warn!(path = %path.display(), "Cache entry is corrupt, treating as miss: {}", e);
            None
        }
    }
}

/// Keys become file names, so only hex is accepted.
fn is_valid_key(key: &str) -> bool {
    !key.is_empty() && key.len() <= 128 && key.bytes().all(|b| b.is_ascii_hexdigit())
}

fn check_key(key: &str) -> Result<()> {
    if is_valid_key(key) {
        Ok(())
    } else {
        Err(BriefError::Config(format!("invalid cache key '{key}'")))
    }
}

fn short(key: &str) -> &str {
    &key[..8.min(key.len())]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insights::{ConversationStarter, SalesPriority};
    use chrono::TimeDelta;
    use tempfile::TempDir;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    fn test_cache() -> (TempDir, ResponseCache) {
        let tmp = TempDir::new().unwrap();
        let cache = ResponseCache::new(tmp.path().join("cache"), DAY);
        (tmp, cache)
    }

    fn result(topic: &str) -> GenerationResult {
        GenerationResult {
            starters: vec![ConversationStarter {
                topic: topic.to_string(),
                detail: "A detail".into(),
                source: Some("agency_supply_costs".into()),
                relevance_score: Some(0.8),
            }],
            summary: Some("Summary".into()),
            sales_priority: SalesPriority::Medium,
            model: "anthropic:claude".into(),
            generated_at: Utc::now(),
        }
    }

    fn key(id: &str) -> String {
        ResponseCache::fingerprint(id, "v1/n5", "anthropic:claude")
    }

    #[test]
    fn test_fingerprint_deterministic() {
        assert_eq!(key("school-002"), key("school-002"));
        assert_eq!(key("school-002").len(), 64);
    }

    #[test]
    fn test_fingerprint_changes_with_each_input() {
        let base = ResponseCache::fingerprint("s", "v1", "p");
        assert_ne!(base, ResponseCache::fingerprint("t", "v1", "p"));
        assert_ne!(base, ResponseCache::fingerprint("s", "v2", "p"));
        assert_ne!(base, ResponseCache::fingerprint("s", "v1", "q"));
    }

    #[test]
    fn test_fingerprint_no_separator_collision() {
        assert_ne!(
            ResponseCache::fingerprint("a|b", "", "c"),
            ResponseCache::fingerprint("a", "b", "c")
        );
    }

    #[test]
    fn test_put_then_get_roundtrip() {
        let (_tmp, cache) = test_cache();
        let k = key("school-002");
        assert!(cache.get(&k).is_none());
        let r = result("Agency spend");
        cache.put(&k, "school-002", &r).unwrap();
        assert_eq!(cache.get(&k), Some(r));
    }

    #[test]
    fn test_put_overwrites() {
        let (_tmp, cache) = test_cache();
        let k = key("school-002");
        cache.put(&k, "school-002", &result("first")).unwrap();
        cache.put(&k, "school-002", &result("second")).unwrap();
        assert_eq!(cache.get(&k).unwrap().starters[0].topic, "second");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_expiry_boundary() {
        let (_tmp, cache) = test_cache();
        let k = key("school-002");
        let written = Utc::now();
        cache.put_at(&k, "school-002", &result("x"), written).unwrap();

        let ttl = TimeDelta::from_std(DAY).unwrap();
        let eps = TimeDelta::seconds(1);
        assert!(cache.get_at(&k, written + ttl - eps).is_some());
        assert!(cache.get_at(&k, written + ttl + eps).is_none());
        // Expired entries are purged on read.
        assert!(cache.is_empty());
    }

    #[test]
    fn test_survives_new_instance() {
        let (tmp, cache) = test_cache();
        let k = key("school-002");
        cache.put(&k, "school-002", &result("persisted")).unwrap();
        let reopened = ResponseCache::new(tmp.path().join("cache"), DAY);
        assert_eq!(reopened.get(&k).unwrap().starters[0].topic, "persisted");
    }

    #[test]
    fn test_corrupt_entry_is_miss() {
        let (_tmp, cache) = test_cache();
        let k = key("school-002");
        std::fs::create_dir_all(cache.dir()).unwrap();
        std::fs::write(cache.dir().join(format!("{k}.json")), "{ truncated").unwrap();
        assert!(cache.get(&k).is_none());
        assert_eq!(cache.stats().unwrap().expired_entries, 1);
        assert_eq!(cache.purge_expired().unwrap(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_entry_under_wrong_name_is_miss() {
        let (_tmp, cache) = test_cache();
        let a = key("school-001");
        let b = key("school-002");
        cache.put(&a, "school-001", &result("a")).unwrap();
        std::fs::copy(
            cache.dir().join(format!("{a}.json")),
            cache.dir().join(format!("{b}.json")),
        )
        .unwrap();
        assert!(cache.get(&b).is_none());
    }

    #[test]
    fn test_invalidate() {
        let (_tmp, cache) = test_cache();
        let k = key("school-002");
        cache.put(&k, "school-002", &result("x")).unwrap();
        assert!(cache.invalidate(&k).unwrap());
        assert!(!cache.invalidate(&k).unwrap());
        assert!(cache.get(&k).is_none());
    }

    #[test]
    fn test_clear_all_counts_entries_only() {
        let (_tmp, cache) = test_cache();
        for id in ["a", "b", "c"] {
            cache.put(&key(id), id, &result(id)).unwrap();
        }
        std::fs::write(cache.dir().join("notes.txt"), "keep me").unwrap();
        assert_eq!(cache.clear_all().unwrap(), 3);
        assert!(cache.is_empty());
        assert!(cache.dir().join("notes.txt").exists());
    }

    #[test]
    fn test_clear_all_on_missing_dir() {
        let (_tmp, cache) = test_cache();
        assert_eq!(cache.clear_all().unwrap(), 0);
    }

    #[test]
    fn test_invalid_key_rejected() {
        let (_tmp, cache) = test_cache();
        assert!(cache.get("../etc/passwd").is_none());
        assert!(cache.put("../evil", "x", &result("x")).is_err());
        assert!(cache.invalidate("not-hex!").is_err());
    }

    #[test]
    fn test_disabled_cache_never_stores() {
        let cache = ResponseCache::disabled();
        let k = key("school-002");
        cache.put(&k, "school-002", &result("x")).unwrap();
        assert!(cache.get(&k).is_none());
        assert_eq!(cache.clear_all().unwrap(), 0);
    }

    #[test]
    fn test_disabled_cache_invalidate_touches_nothing() {
        let tmp = TempDir::new().unwrap();
        let k = key("school-002");
        // A disabled cache has an empty dir, which would resolve to the cwd.
        let cache = ResponseCache {
            dir: tmp.path().to_path_buf(),
            ..ResponseCache::disabled()
        };
        let stray = tmp.path().join(format!("{k}.json"));
        std::fs::write(&stray, "{}").unwrap();
        assert!(!cache.invalidate(&k).unwrap());
        assert!(stray.exists());
        assert!(!ResponseCache::disabled().invalidate(&k).unwrap());
    }

    #[test]
    fn test_stats() {
        let (_tmp, cache) = test_cache();
        cache.put(&key("a"), "a", &result("a")).unwrap();
        let old = Utc::now() - TimeDelta::days(2);
        cache.put_at(&key("b"), "b", &result("b"), old).unwrap();
        let stats = cache.stats().unwrap();
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.expired_entries, 1);
    }

    #[test]
    fn test_from_config() {
        let cfg = CacheConfig {
            enabled: false,
            ttl_secs: 60,
            dir: Some(PathBuf::from("/tmp/x")),
        };
        let cache = ResponseCache::from_config(&cfg);
        assert!(!cache.is_enabled());
        assert_eq!(cache.ttl(), Duration::from_secs(60));
        assert_eq!(cache.dir(), Path::new("/tmp/x"));
    }
}
